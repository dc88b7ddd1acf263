use crate::config::ConfigError;
use crate::job::StageId;
use crate::road_graph::GraphResolutionError;
use noise_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, NoiseError>;

#[derive(Error, Debug)]
pub enum NoiseError {
    /// Rejected at submit time, never scheduled
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported geometry in {collection}: expected {expected}, found {found}")]
    UnsupportedGeometry {
        collection: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error(transparent)]
    GraphResolution(#[from] GraphResolutionError),

    #[error("Engine bootstrap failed after {attempts} attempt(s): {reason}")]
    EngineBootstrap { attempts: u32, reason: String },

    #[error("Stage {stage} failed: {cause}")]
    EngineStage { stage: StageId, cause: String },

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] StorageError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("DAG cycle detected")]
    DagCycleDetected,

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Engine driver error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NoiseError {
    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn stage<E: std::fmt::Display>(stage: StageId, cause: E) -> Self {
        Self::EngineStage {
            stage,
            cause: cause.to_string(),
        }
    }

    /// Category recorded on failed jobs
    pub fn category(&self) -> ErrorCategory {
        match self {
            NoiseError::EngineStage { .. } | NoiseError::Timeout(_) => ErrorCategory::Transient,
            NoiseError::EngineBootstrap { .. }
            | NoiseError::CacheUnavailable(_)
            | NoiseError::Driver(_)
            | NoiseError::Io(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }

    /// Stage the error is attributed to, if any
    pub fn failed_stage(&self) -> Option<StageId> {
        match self {
            NoiseError::EngineStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Error category for failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error (e.g., stage timeout, engine hiccup)
    Transient,
    /// Permanent error (e.g., invalid input, unresolvable road graph)
    Permanent,
    /// Infrastructure error (e.g., engine could not boot, driver failure)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(NoiseError::parse(format!("Invalid error category: {}", s))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors returned by the result query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} has not finished yet")]
    NotReady(Uuid),

    #[error("Job {job_id} failed: {cause}")]
    Failed { job_id: Uuid, cause: String },
}

impl ResultError {
    /// HTTP status class a front end should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            ResultError::NotFound(_) | ResultError::NotReady(_) => 404,
            ResultError::Failed { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Transient,
            ErrorCategory::Permanent,
            ErrorCategory::Infrastructure,
        ] {
            let s = category.as_str();
            let parsed = ErrorCategory::from_str(s).unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!(ErrorCategory::from_str("invalid").is_err());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            NoiseError::validation("max_speed out of range").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            NoiseError::EngineBootstrap {
                attempts: 5,
                reason: "connection refused".to_string()
            }
            .category(),
            ErrorCategory::Infrastructure
        );

        let stage_err = NoiseError::stage(StageId::PropagationGrid, "out of memory");
        assert_eq!(stage_err.category(), ErrorCategory::Transient);
        assert_eq!(stage_err.failed_stage(), Some(StageId::PropagationGrid));
    }

    #[test]
    fn test_stage_error_message_names_stage() {
        let err = NoiseError::stage(StageId::Traffic, "syntax error");
        assert_eq!(err.to_string(), "Stage traffic failed: syntax error");
    }

    #[test]
    fn test_result_error_status() {
        let id = Uuid::new_v4();
        assert_eq!(ResultError::NotReady(id).http_status(), 404);
        assert_eq!(ResultError::NotFound(id).http_status(), 404);
        assert_eq!(
            ResultError::Failed {
                job_id: id,
                cause: "boom".to_string()
            }
            .http_status(),
            500
        );
    }
}
