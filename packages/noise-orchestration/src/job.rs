use crate::error::{ErrorCategory, NoiseError, Result};
use crate::fingerprint::Fingerprint;
use crate::scenario::Scenario;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Pipeline stage identifier, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Buildings,
    RoadGeometry,
    Traffic,
    DirectionalDuplication,
    SourcePower,
    SpectrumRepartition,
    PropagationGrid,
    Contouring,
    Export,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::Buildings,
        StageId::RoadGeometry,
        StageId::Traffic,
        StageId::DirectionalDuplication,
        StageId::SourcePower,
        StageId::SpectrumRepartition,
        StageId::PropagationGrid,
        StageId::Contouring,
        StageId::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Buildings => "buildings",
            StageId::RoadGeometry => "road_geometry",
            StageId::Traffic => "traffic",
            StageId::DirectionalDuplication => "directional_duplication",
            StageId::SourcePower => "source_power",
            StageId::SpectrumRepartition => "spectrum_repartition",
            StageId::PropagationGrid => "propagation_grid",
            StageId::Contouring => "contouring",
            StageId::Export => "export",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        StageId::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| NoiseError::parse(format!("Invalid stage ID: {}", s)))
    }

    /// Declared predecessor (`None` for the first stage)
    pub fn predecessor(&self) -> Option<StageId> {
        let idx = StageId::ALL.iter().position(|s| s == self)?;
        idx.checked_sub(1).map(|prev| StageId::ALL[prev])
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a job does once a worker picks it up
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Full pipeline run
    Compute(Arc<Scenario>),
    /// Hand back an already cached result
    CacheReplay(serde_json::Value),
}

impl JobKind {
    pub fn is_replay(&self) -> bool {
        matches!(self, JobKind::CacheReplay(_))
    }
}

/// Job state enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Accepted {
        accepted_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        worker_id: String,
        current_stage: Option<StageId>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        failed_stage: Option<StageId>,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Accepted { .. } => "accepted",
            JobState::Running { .. } => "running",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }

    /// Client-visible status
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Accepted { .. } => JobStatus::Accepted,
            JobState::Running { .. } => JobStatus::Running,
            JobState::Succeeded { .. } => JobStatus::Success,
            JobState::Failed { error, .. } => JobStatus::Failure {
                cause: error.clone(),
            },
        }
    }
}

/// Client-visible job status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Success,
    Failure { cause: String },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure { .. } => "FAILURE",
        }
    }

    /// Name reported to pollers that predate the ACCEPTED state
    pub fn legacy_poll_name(&self) -> &'static str {
        match self {
            JobStatus::Accepted => "PENDING",
            other => other.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure { .. })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Failure { cause } => write!(f, "FAILURE ({})", cause),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Job model
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub kind: JobKind,
    pub state: JobState,
    /// Result document, set exactly once on success
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new accepted job
    pub fn new_accepted(fingerprint: Fingerprint, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            kind,
            state: JobState::Accepted { accepted_at: now },
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    fn invalid(&self, to: &str) -> NoiseError {
        NoiseError::InvalidStateTransition {
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: ACCEPTED → RUNNING
    pub fn start(&mut self, worker_id: String) -> Result<()> {
        match &self.job.state {
            JobState::Accepted { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    worker_id,
                    current_stage: None,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Update current stage (for running jobs)
    pub fn update_stage(&mut self, stage: StageId) -> Result<()> {
        match &mut self.job.state {
            JobState::Running { current_stage, .. } => {
                *current_stage = Some(stage);
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.invalid("update_stage")),
        }
    }

    /// Transition: RUNNING → SUCCEEDED
    pub fn complete(&mut self, result: serde_json::Value) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;

                self.job.state = JobState::Succeeded {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                };
                self.job.result = Some(result);
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("succeeded")),
        }
    }

    /// Transition: RUNNING → FAILED
    pub fn fail(
        &mut self,
        error: String,
        error_category: ErrorCategory,
        failed_stage: Option<StageId>,
    ) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    error_category,
                    failed_stage,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{ContentHash, ScenarioHash};
    use serde_json::json;

    fn replay_job() -> Job {
        let fingerprint = Fingerprint::new(
            ContentHash::from_hex("c0ffee"),
            ScenarioHash::from_hex("beef"),
        );
        Job::new_accepted(fingerprint, JobKind::CacheReplay(json!({"geojson": {}})))
    }

    #[test]
    fn test_stage_id_roundtrip() {
        for stage in &StageId::ALL {
            let s = stage.as_str();
            let parsed = StageId::from_str(s).unwrap();
            assert_eq!(*stage, parsed);
        }
        assert!(StageId::from_str("meshing").is_err());
    }

    #[test]
    fn test_stage_predecessors_form_a_chain() {
        assert_eq!(StageId::Buildings.predecessor(), None);
        assert_eq!(StageId::RoadGeometry.predecessor(), Some(StageId::Buildings));
        assert_eq!(StageId::Export.predecessor(), Some(StageId::Contouring));
    }

    #[test]
    fn test_job_starts_accepted() {
        let job = replay_job();
        assert_eq!(job.status(), JobStatus::Accepted);
        assert_eq!(job.status().legacy_poll_name(), "PENDING");
        assert!(job.result.is_none());
    }

    #[test]
    fn test_job_state_transition_accepted_to_running() {
        let mut sm = JobStateMachine::new(replay_job());

        sm.start("worker-1".to_string()).unwrap();

        assert!(matches!(sm.job().state, JobState::Running { .. }));
        assert_eq!(sm.job().status().legacy_poll_name(), "RUNNING");
    }

    #[test]
    fn test_job_state_transition_running_to_succeeded() {
        let mut sm = JobStateMachine::new(replay_job());

        sm.start("worker-1".to_string()).unwrap();
        sm.complete(json!({"geojson": {"features": [1]}})).unwrap();

        assert_eq!(sm.job().status(), JobStatus::Success);
        assert_eq!(
            sm.job().result,
            Some(json!({"geojson": {"features": [1]}}))
        );
    }

    #[test]
    fn test_job_state_transition_running_to_failed() {
        let mut sm = JobStateMachine::new(replay_job());

        sm.start("worker-1".to_string()).unwrap();
        sm.fail(
            "engine gone".to_string(),
            ErrorCategory::Infrastructure,
            Some(StageId::SourcePower),
        )
        .unwrap();

        match &sm.job().state {
            JobState::Failed {
                error,
                failed_stage,
                ..
            } => {
                assert_eq!(error, "engine gone");
                assert_eq!(*failed_stage, Some(StageId::SourcePower));
            }
            _ => panic!("Expected Failed state"),
        }
        assert_eq!(
            sm.job().status(),
            JobStatus::Failure {
                cause: "engine gone".to_string()
            }
        );
    }

    #[test]
    fn test_cannot_complete_accepted_job() {
        let mut sm = JobStateMachine::new(replay_job());
        assert!(sm.complete(json!({})).is_err());
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut sm = JobStateMachine::new(replay_job());

        sm.start("worker-1".to_string()).unwrap();
        sm.complete(json!({"ok": true})).unwrap();

        assert!(sm.start("worker-2".to_string()).is_err());
        assert!(sm.complete(json!({"ok": false})).is_err());
        assert!(sm
            .fail("late".to_string(), ErrorCategory::Transient, None)
            .is_err());
        assert!(sm.update_stage(StageId::Export).is_err());
        assert_eq!(sm.job().result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_update_stage_for_running_job() {
        let mut sm = JobStateMachine::new(replay_job());

        sm.start("worker-1".to_string()).unwrap();
        sm.update_stage(StageId::Traffic).unwrap();

        match &sm.job().state {
            JobState::Running { current_stage, .. } => {
                assert_eq!(*current_stage, Some(StageId::Traffic));
            }
            _ => panic!("Expected Running state"),
        }
    }

    #[test]
    fn test_status_serialization() {
        let status = JobStatus::Failure {
            cause: "boom".to_string(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, json!({"status": "FAILURE", "cause": "boom"}));

        let value = serde_json::to_value(JobStatus::Accepted).unwrap();
        assert_eq!(value, json!({"status": "ACCEPTED"}));
    }
}
