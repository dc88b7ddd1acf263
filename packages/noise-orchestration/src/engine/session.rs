use super::{
    registration_statements, ConnectError, EngineConnection, EngineConnector, EngineLauncher,
    EngineProcess, RetryPolicy,
};
use crate::error::{NoiseError, Result};
use tracing::{debug, info, warn};

/// One engine process plus its connection, owned by a single job
///
/// `open` only returns once a connection is established; every failure on
/// the way terminates the process it launched. `close` always terminates
/// the process, whether or not closing the connection worked.
pub struct EngineSession {
    process: Box<dyn EngineProcess>,
    connection: Option<Box<dyn EngineConnection>>,
    attempts: u32,
}

impl EngineSession {
    /// Launch the engine and connect with bounded retry
    pub async fn open(
        launcher: &dyn EngineLauncher,
        connector: &dyn EngineConnector,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        let mut process = launcher
            .launch()
            .await
            .map_err(|e| NoiseError::EngineBootstrap {
                attempts: 0,
                reason: format!("launch failed: {}", e),
            })?;
        let port = process.port();
        info!(pid = ?process.id(), port, "engine process launched");

        tokio::time::sleep(policy.boot_delay).await;

        let mut attempts = 0;
        loop {
            if let Some(status) = process.try_exit_status() {
                return Err(
                    abort(process, attempts, format!("engine exited during startup ({})", status))
                        .await,
                );
            }

            attempts += 1;
            match connector.connect(port).await {
                Ok(connection) => {
                    info!(port, attempts, "engine connection established");
                    return Ok(Self {
                        process,
                        connection: Some(connection),
                        attempts,
                    });
                }
                Err(ConnectError::NotListening(reason)) if attempts < policy.max_attempts => {
                    warn!(
                        port,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        "engine not listening yet ({}), retrying in {:?}",
                        reason,
                        policy.backoff
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => return Err(abort(process, attempts, e.to_string()).await),
            }
        }
    }

    /// Connect attempts it took to open the session
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Register the engine functions the stages call
    pub async fn initialize(&mut self) -> Result<()> {
        let attempts = self.attempts;
        let connection = self.connection()?;
        for statement in registration_statements() {
            debug!(sql = %statement, "registering engine function");
            connection
                .execute(&statement)
                .await
                .map_err(|e| NoiseError::EngineBootstrap {
                    attempts,
                    reason: format!("function registration failed: {}", e),
                })?;
        }
        Ok(())
    }

    pub fn connection(&mut self) -> Result<&mut dyn EngineConnection> {
        match self.connection.as_deref_mut() {
            Some(connection) => Ok(connection),
            None => Err(NoiseError::EngineBootstrap {
                attempts: self.attempts,
                reason: "engine connection already closed".to_string(),
            }),
        }
    }

    /// Close the connection, then terminate the process
    ///
    /// Both steps always run; the first error is returned.
    pub async fn close(mut self) -> Result<()> {
        let closed = match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        };
        let terminated = self.process.terminate().await;
        info!(port = self.process.port(), "engine session closed");
        closed.and(terminated)
    }
}

async fn abort(mut process: Box<dyn EngineProcess>, attempts: u32, reason: String) -> NoiseError {
    if let Err(e) = process.terminate().await {
        warn!("failed to terminate engine after bootstrap failure: {}", e);
    }
    NoiseError::EngineBootstrap { attempts, reason }
}
