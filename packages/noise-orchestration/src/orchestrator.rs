use crate::error::{ErrorCategory, NoiseError, Result, ResultError};
use crate::job::{Job, JobKind, JobStateMachine, JobStatus, StageId};
use crate::runner::ScenarioRunner;
use crate::scenario::{CalculationInput, Scenario};
use crate::sequencer::StageProgress;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use noise_storage::ResultCache;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State shared between the submitting side and the workers
struct Shared {
    jobs: DashMap<Uuid, Job>,
    /// Fingerprint key -> non-terminal compute job
    in_flight: DashMap<String, Uuid>,
    cache: Arc<dyn ResultCache>,
    runner: Arc<dyn ScenarioRunner>,
}

impl Shared {
    /// Apply one state machine transition to a stored job
    fn transition<F>(&self, job_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JobStateMachine) -> Result<()>,
    {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or(NoiseError::JobNotFound(job_id))?;
        let mut sm = JobStateMachine::new(entry.clone());
        apply(&mut sm)?;
        *entry = sm.into_job();
        Ok(())
    }
}

/// Job orchestrator: fingerprint, dedup, schedule, track
///
/// Submissions are validated synchronously; everything after that runs on
/// tokio tasks bounded by a semaphore with one permit per worker slot.
pub struct JobOrchestrator {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
}

impl JobOrchestrator {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        runner: Arc<dyn ScenarioRunner>,
        concurrency: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: DashMap::new(),
                in_flight: DashMap::new(),
                cache,
                runner,
            }),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Validate and schedule a calculation request
    pub async fn submit(&self, input: &CalculationInput) -> Result<Uuid> {
        let scenario = Scenario::from_input(input)?;
        self.submit_scenario(scenario).await
    }

    /// Schedule an already validated scenario
    ///
    /// A cached result is handed back through a replay job. Otherwise a
    /// submission whose fingerprint matches a job that is still running joins
    /// that job instead of starting a second computation.
    pub async fn submit_scenario(&self, scenario: Scenario) -> Result<Uuid> {
        let fingerprint = scenario.fingerprint.clone();
        let key = fingerprint.key();

        match self.shared.cache.get(&key).await {
            Ok(Some(cached)) => {
                info!("Cache hit for {}, issuing replay job", key);
                let job = Job::new_accepted(fingerprint, JobKind::CacheReplay(cached));
                return Ok(self.schedule(job));
            }
            Ok(None) => debug!("Cache miss for {}", key),
            Err(e) => warn!(
                "{}; computing {} without deduplication",
                NoiseError::CacheUnavailable(e),
                key
            ),
        }

        let job = Job::new_accepted(fingerprint, JobKind::Compute(Arc::new(scenario)));
        let job_id = job.id;
        match self.shared.in_flight.entry(key.clone()) {
            Entry::Occupied(mut running) => {
                let existing = *running.get();
                // Not in the job table yet means it is still being scheduled
                let live = self
                    .shared
                    .jobs
                    .get(&existing)
                    .map_or(true, |j| !j.state.is_terminal());
                if live {
                    info!("Job {} already computing {}, joining it", existing, key);
                    return Ok(existing);
                }
                running.insert(job_id);
            }
            Entry::Vacant(slot) => {
                slot.insert(job_id);
            }
        }

        Ok(self.schedule(job))
    }

    /// Record the job as ACCEPTED, then hand it to a worker
    fn schedule(&self, job: Job) -> Uuid {
        let job_id = job.id;
        info!(
            "Job {} accepted ({}, fingerprint {})",
            job_id,
            if job.kind.is_replay() { "replay" } else { "compute" },
            job.fingerprint
        );
        self.shared.jobs.insert(job_id, job);

        let shared = self.shared.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => execute_job(shared, job_id).await,
                Err(e) => abandon_job(&shared, job_id, &format!("worker pool closed: {}", e)),
            }
        });
        job_id
    }

    pub fn status(&self, job_id: Uuid) -> Result<JobStatus> {
        self.shared
            .jobs
            .get(&job_id)
            .map(|job| job.status())
            .ok_or(NoiseError::JobNotFound(job_id))
    }

    /// Snapshot of the job record
    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.shared.jobs.get(&job_id).map(|job| job.clone())
    }

    pub fn result(&self, job_id: Uuid) -> std::result::Result<Value, ResultError> {
        let job = self
            .shared
            .jobs
            .get(&job_id)
            .ok_or(ResultError::NotFound(job_id))?;
        match (job.status(), &job.result) {
            (JobStatus::Success, Some(result)) => Ok(result.clone()),
            (JobStatus::Failure { cause }, _) => Err(ResultError::Failed { job_id, cause }),
            _ => Err(ResultError::NotReady(job_id)),
        }
    }

    /// Poll until the job is terminal
    pub async fn wait(&self, job_id: Uuid, poll: Duration) -> Result<JobStatus> {
        loop {
            let status = self.status(job_id)?;
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn job_count(&self) -> usize {
        self.shared.jobs.len()
    }

    /// Compute jobs that have not finished yet
    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Stop handing out worker slots. Running jobs finish; queued and
    /// later jobs end in FAILURE.
    pub fn close_workers(&self) {
        info!("Closing worker pool");
        self.permits.close();
    }
}

/// Records the running stage on the job
struct JobProgress {
    shared: Arc<Shared>,
    job_id: Uuid,
}

impl StageProgress for JobProgress {
    fn stage_started(&self, stage: StageId) {
        if let Err(e) = self.shared.transition(self.job_id, |sm| sm.update_stage(stage)) {
            debug!("Job {}: stage update skipped: {}", self.job_id, e);
        }
    }
}

/// Fail a job that never got a worker slot
fn abandon_job(shared: &Shared, job_id: Uuid, cause: &str) {
    error!("Job {} abandoned: {}", job_id, cause);
    if let Some(key) = shared.jobs.get(&job_id).map(|job| job.fingerprint.key()) {
        shared.in_flight.remove_if(&key, |_, id| *id == job_id);
    }
    let failed = shared.transition(job_id, |sm| {
        sm.start("unscheduled".to_string())?;
        sm.fail(cause.to_string(), ErrorCategory::Infrastructure, None)
    });
    if let Err(e) = failed {
        error!("Job {}: final transition rejected: {}", job_id, e);
    }
}

async fn execute_job(shared: Arc<Shared>, job_id: Uuid) {
    let worker_id = format!("worker-{}", Uuid::new_v4());
    if let Err(e) = shared.transition(job_id, |sm| sm.start(worker_id)) {
        error!("Job {} could not start: {}", job_id, e);
        return;
    }
    let Some((kind, key)) = shared
        .jobs
        .get(&job_id)
        .map(|job| (job.kind.clone(), job.fingerprint.key()))
    else {
        return;
    };

    let start = Instant::now();
    let replay = kind.is_replay();
    let outcome = match kind {
        JobKind::CacheReplay(cached) => Ok(cached),
        JobKind::Compute(scenario) => {
            let runner = shared.runner.clone();
            let progress = JobProgress {
                shared: shared.clone(),
                job_id,
            };
            // Own task, so a panicking run still ends the job in FAILURE
            let handle =
                tokio::spawn(async move { runner.run(job_id, scenario, &progress).await });
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(NoiseError::Other(anyhow::anyhow!(
                    "worker task aborted: {}",
                    e
                ))),
            }
        }
    };

    if !replay {
        if let Ok(result) = &outcome {
            // Stored before the job turns SUCCESS
            if let Err(e) = shared.cache.put(&key, result.clone()).await {
                warn!("Job {}: result not cached: {}", job_id, e);
            }
        }
        // Later submissions replay the cache or start afresh
        shared.in_flight.remove_if(&key, |_, id| *id == job_id);
    }

    let finished = match outcome {
        Ok(result) => {
            info!(
                "Job {} completed successfully in {}ms",
                job_id,
                start.elapsed().as_millis()
            );
            shared.transition(job_id, |sm| sm.complete(result))
        }
        Err(e) => {
            error!("Job {} failed: {}", job_id, e);
            shared.transition(job_id, |sm| {
                sm.fail(e.to_string(), e.category(), e.failed_stage())
            })
        }
    };
    if let Err(e) = finished {
        error!("Job {}: final transition rejected: {}", job_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::tests::sample_scenario;
    use async_trait::async_trait;
    use noise_storage::InMemoryResultCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScenarioRunner for CountingRunner {
        async fn run(
            &self,
            _job_id: Uuid,
            _scenario: Arc<Scenario>,
            progress: &dyn StageProgress,
        ) -> Result<Value> {
            progress.stage_started(StageId::Buildings);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"geojson": {"type": "FeatureCollection", "features": []}}))
        }
    }

    fn orchestrator() -> (JobOrchestrator, Arc<CountingRunner>, Arc<InMemoryResultCache>) {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let cache = Arc::new(InMemoryResultCache::default());
        let orchestrator = JobOrchestrator::new(cache.clone(), runner.clone(), 2);
        (orchestrator, runner, cache)
    }

    #[tokio::test]
    async fn test_completed_result_is_cached_under_fingerprint() {
        let (orchestrator, runner, cache) = orchestrator();
        let scenario = sample_scenario();
        let key = scenario.fingerprint.key();

        let job_id = orchestrator.submit_scenario(scenario).await.unwrap();
        let status = orchestrator
            .wait(job_id, Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Success);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(cache.get(&key).await.unwrap().is_some());
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_second_submit_replays_cached_result() {
        let (orchestrator, runner, _cache) = orchestrator();

        let first = orchestrator.submit_scenario(sample_scenario()).await.unwrap();
        orchestrator.wait(first, Duration::from_millis(5)).await.unwrap();

        let second = orchestrator.submit_scenario(sample_scenario()).await.unwrap();
        assert_ne!(first, second);
        orchestrator.wait(second, Duration::from_millis(5)).await.unwrap();

        assert!(orchestrator.job(second).unwrap().kind.is_replay());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator.result(first).unwrap(),
            orchestrator.result(second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (orchestrator, _, _) = orchestrator();
        let id = Uuid::new_v4();
        assert!(matches!(
            orchestrator.status(id),
            Err(NoiseError::JobNotFound(_))
        ));
        assert_eq!(orchestrator.result(id), Err(ResultError::NotFound(id)));
    }
}
