//! Spatial engine boundary
//!
//! The engine is an external process (an H2/H2GIS database with the noise
//! functions on its classpath) reached over the PostgreSQL wire protocol.
//! The ports below keep the sequencer independent of both the process
//! handling and the driver, so the whole pipeline runs against fakes in tests.

pub mod h2;
pub mod session;

pub use h2::{H2Launcher, H2Process, PgEngineConnection, PgEngineConnector, PortPool};
pub use session::EngineSession;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::statement::Statement;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Open connection to a running engine
#[async_trait]
pub trait EngineConnection: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<()>;

    /// Read back a GeoJSON document the engine wrote
    async fn read_geojson(&mut self, path: &Path) -> Result<Value>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Connect failure, split by whether a retry can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Engine is not accepting connections yet
    #[error("engine not listening: {0}")]
    NotListening(String),

    #[error("{0}")]
    Fatal(String),
}

#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Connect to the engine listening on `port`
    async fn connect(
        &self,
        port: u16,
    ) -> std::result::Result<Box<dyn EngineConnection>, ConnectError>;
}

/// Handle on a launched engine process
#[async_trait]
pub trait EngineProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Port the engine listens on
    fn port(&self) -> u16;

    /// Exit status if the process has already exited
    fn try_exit_status(&mut self) -> Option<String>;

    async fn terminate(&mut self) -> Result<()>;
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EngineProcess>>;
}

/// Bootstrap retry policy (fixed backoff)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Grace period between launch and the first connect attempt
    pub boot_delay: Duration,
    pub backoff: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            boot_delay: Duration::from_millis(config.boot_delay_ms),
            backoff: Duration::from_millis(config.connect_backoff_ms),
            max_attempts: config.max_connect_attempts,
        }
    }

    /// No waiting at all (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            boot_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Engine functions registered at session start: (alias, implementing method)
pub const ENGINE_FUNCTIONS: [(&str, &str); 8] = [
    ("H2GIS_SPATIAL", "org.h2gis.functions.factory.H2GISFunctions.load"),
    ("BR_PtGrid3D", "org.orbisgis.noisemap.h2.BR_PtGrid3D.noisePropagation"),
    ("BR_PtGrid", "org.orbisgis.noisemap.h2.BR_PtGrid.noisePropagation"),
    (
        "BR_SpectrumRepartition",
        "org.orbisgis.noisemap.h2.BR_SpectrumRepartition.spectrumRepartition",
    ),
    ("BR_EvalSource", "org.orbisgis.noisemap.h2.BR_EvalSource.evalSource"),
    ("BTW_EvalSource", "org.orbisgis.noisemap.h2.BTW_EvalSource.evalSource"),
    ("BR_TriGrid", "org.orbisgis.noisemap.h2.BR_TriGrid.noisePropagation"),
    ("BR_TriGrid3D", "org.orbisgis.noisemap.h2.BR_TriGrid3D.noisePropagation"),
];

/// Alias registration followed by the spatial extension bootstrap
pub fn registration_statements() -> Vec<Statement> {
    ENGINE_FUNCTIONS
        .iter()
        .map(|&(alias, class)| Statement::CreateAlias { alias, class })
        .chain(std::iter::once(Statement::sql_text("CALL H2GIS_SPATIAL()")))
        .collect()
}
