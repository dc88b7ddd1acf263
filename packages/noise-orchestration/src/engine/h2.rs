//! H2/H2GIS engine: a `java` subprocess speaking the PostgreSQL protocol

use super::{ConnectError, EngineConnection, EngineConnector, EngineLauncher, EngineProcess};
use crate::config::{absolute_path, EngineConfig};
use crate::error::{NoiseError, Result};
use crate::statement::Statement;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::debug;

/// Listening ports handed out to concurrently running engines
///
/// Every job owns its engine process, so two live engines must never share
/// a port. The pool holds one port per worker slot.
#[derive(Debug, Clone)]
pub struct PortPool {
    free: Arc<Mutex<Vec<u16>>>,
}

impl PortPool {
    /// `slots` consecutive ports starting at `base`
    pub fn new(base: u16, slots: usize) -> Self {
        let mut ports: Vec<u16> = (0..slots)
            .filter_map(|offset| u16::try_from(offset).ok())
            .filter_map(|offset| base.checked_add(offset))
            .collect();
        // Lowest port is handed out first
        ports.reverse();
        Self {
            free: Arc::new(Mutex::new(ports)),
        }
    }

    pub fn acquire(&self) -> Option<u16> {
        self.free.lock().pop()
    }

    pub fn release(&self, port: u16) {
        let mut free = self.free.lock();
        if !free.contains(&port) {
            free.push(port);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

/// Spawns `java ... org.h2.tools.Server -pg` in the engine directory
pub struct H2Launcher {
    config: EngineConfig,
    ports: PortPool,
}

impl H2Launcher {
    pub fn new(config: EngineConfig, ports: PortPool) -> Self {
        Self { config, ports }
    }

    fn spawn(&self, port: u16) -> Result<Child> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_file)?;

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("-pgPort")
            .arg(port.to_string())
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

#[async_trait]
impl EngineLauncher for H2Launcher {
    async fn launch(&self) -> Result<Box<dyn EngineProcess>> {
        let port = self
            .ports
            .acquire()
            .ok_or_else(|| NoiseError::Other(anyhow::anyhow!("no free engine port")))?;

        match self.spawn(port) {
            Ok(child) => Ok(Box::new(H2Process {
                child,
                port,
                ports: self.ports.clone(),
            })),
            Err(e) => {
                self.ports.release(port);
                Err(e)
            }
        }
    }
}

/// Running engine; its port goes back to the pool on drop
pub struct H2Process {
    child: Child,
    port: u16,
    ports: PortPool,
}

#[async_trait]
impl EngineProcess for H2Process {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn try_exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("status unavailable: {}", e)),
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        self.child.start_kill()?;
        let status = self.child.wait().await?;
        debug!(port = self.port, %status, "engine process terminated");
        Ok(())
    }
}

impl Drop for H2Process {
    fn drop(&mut self) {
        self.ports.release(self.port);
    }
}

/// Connects with sqlx; each engine port gets its own database file
pub struct PgEngineConnector {
    host: String,
    user: String,
    password: String,
    database: PathBuf,
}

impl PgEngineConnector {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let database = absolute_path(&config.database)?;
        Ok(Self {
            host: config.host.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            database,
        })
    }

    /// Database name sent to the engine for the given port
    pub fn database_name(&self, port: u16) -> String {
        format!("{}_{}", self.database.to_string_lossy(), port).replace('\\', "/")
    }

    fn options(&self, port: u16) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database_name(port))
    }
}

#[async_trait]
impl EngineConnector for PgEngineConnector {
    async fn connect(
        &self,
        port: u16,
    ) -> std::result::Result<Box<dyn EngineConnection>, ConnectError> {
        match PgConnection::connect_with(&self.options(port)).await {
            Ok(conn) => Ok(Box::new(PgEngineConnection { conn })),
            Err(sqlx::Error::Io(e)) if is_not_listening(e.kind()) => {
                Err(ConnectError::NotListening(e.to_string()))
            }
            Err(e) => Err(ConnectError::Fatal(e.to_string())),
        }
    }
}

fn is_not_listening(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut
    )
}

pub struct PgEngineConnection {
    conn: PgConnection,
}

#[async_trait]
impl EngineConnection for PgEngineConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let sql = statement.sql();
        debug!(sql = %sql, "engine statement");
        // Simple query protocol: the engine's PG server has no prepared statements
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn read_geojson(&mut self, path: &Path) -> Result<Value> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}
