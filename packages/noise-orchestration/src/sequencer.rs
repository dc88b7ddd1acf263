use crate::dag::PipelineDAG;
use crate::engine::{EngineConnection, EngineConnector, EngineLauncher, EngineSession, RetryPolicy};
use crate::error::{NoiseError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics};
use crate::statement::Statement;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receives stage transitions of a running job
pub trait StageProgress: Send + Sync {
    fn stage_started(&self, stage: StageId);
}

impl StageProgress for () {
    fn stage_started(&self, _stage: StageId) {}
}

/// What a completed run read back from the engine
#[derive(Debug, Clone)]
pub struct SequencerOutput {
    /// GeoJSON document written by the export stage
    pub document: Value,
    pub metrics: Vec<(StageId, StageMetrics)>,
}

/// Runs the stage chain of one job inside its own engine session
pub struct PipelineSequencer {
    dag: Arc<PipelineDAG>,
    stage_handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    launcher: Arc<dyn EngineLauncher>,
    connector: Arc<dyn EngineConnector>,
    retry: RetryPolicy,
}

impl PipelineSequencer {
    pub fn new(
        dag: PipelineDAG,
        launcher: Arc<dyn EngineLauncher>,
        connector: Arc<dyn EngineConnector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dag: Arc::new(dag),
            stage_handlers: HashMap::new(),
            launcher,
            connector,
            retry,
        }
    }

    /// Sequencer with every built-in stage registered
    pub fn with_default_handlers(
        dag: PipelineDAG,
        launcher: Arc<dyn EngineLauncher>,
        connector: Arc<dyn EngineConnector>,
        retry: RetryPolicy,
    ) -> Self {
        let mut sequencer = Self::new(dag, launcher, connector, retry);
        for handler in crate::stages::default_handlers() {
            sequencer.register_handler(handler);
        }
        sequencer
    }

    /// Register a stage handler
    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage_id(), handler);
    }

    pub fn dag(&self) -> &PipelineDAG {
        &self.dag
    }

    fn handler(&self, stage: StageId) -> Result<&Arc<dyn StageHandler>> {
        self.stage_handlers
            .get(&stage)
            .ok_or_else(|| NoiseError::StageNotFound(stage.to_string()))
    }

    /// Every statement of a run, per stage, without touching an engine
    pub fn plan(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext,
    ) -> Result<Vec<(StageId, Vec<Statement>)>> {
        self.dag
            .linear_order()
            .into_iter()
            .map(|stage| {
                let statements = self
                    .handler(stage)?
                    .statements(input, ctx)
                    .map_err(|e| NoiseError::stage(stage, e))?;
                Ok((stage, statements))
            })
            .collect()
    }

    /// Run all stages and read back the exported document
    ///
    /// The session is torn down on every path once it was opened; a teardown
    /// failure is logged and never replaces the run's outcome.
    pub async fn run(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext,
        progress: &dyn StageProgress,
    ) -> Result<SequencerOutput> {
        let order = self.dag.linear_order();
        for &stage in &order {
            self.handler(stage)?;
        }
        info!("Job {} execution plan:\n{}", ctx.job_id, self.dag.execution_plan());

        let mut session =
            EngineSession::open(self.launcher.as_ref(), self.connector.as_ref(), &self.retry)
                .await?;

        let outcome = self
            .run_stages(&mut session, &order, input, ctx, progress)
            .await;

        if let Err(e) = session.close().await {
            warn!("Job {}: engine teardown failed: {}", ctx.job_id, e);
        }

        if let Err(e) = &outcome {
            error!("Job {}: pipeline failed: {}", ctx.job_id, e);
        }
        outcome
    }

    async fn run_stages(
        &self,
        session: &mut EngineSession,
        order: &[StageId],
        input: StageInput<'_>,
        ctx: &StageContext,
        progress: &dyn StageProgress,
    ) -> Result<SequencerOutput> {
        session.initialize().await?;
        let connection = session.connection()?;

        let mut metrics = Vec::with_capacity(order.len());
        for &stage in order {
            progress.stage_started(stage);
            let stage_metrics = self.run_stage(connection, stage, input, ctx).await?;
            info!(
                "Job {}: stage {} done ({} statements, {}ms)",
                ctx.job_id, stage, stage_metrics.statements_executed, stage_metrics.duration_ms
            );
            metrics.push((stage, stage_metrics));
        }

        let document = connection
            .read_geojson(&ctx.export_path)
            .await
            .map_err(|e| NoiseError::stage(StageId::Export, e))?;

        Ok(SequencerOutput { document, metrics })
    }

    async fn run_stage(
        &self,
        connection: &mut dyn EngineConnection,
        stage: StageId,
        input: StageInput<'_>,
        ctx: &StageContext,
    ) -> Result<StageMetrics> {
        let statements = self
            .handler(stage)?
            .statements(input, ctx)
            .map_err(|e| NoiseError::stage(stage, e))?;
        let timeout_ms = self
            .dag
            .get_stage(stage)
            .map(|node| node.timeout_ms)
            .ok_or_else(|| NoiseError::StageNotFound(stage.to_string()))?;

        let start = Instant::now();
        let executed = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            for statement in &statements {
                debug!(stage = %stage, sql = %statement, "executing");
                connection.execute(statement).await?;
            }
            Ok::<_, NoiseError>(())
        })
        .await;

        match executed {
            Ok(Ok(())) => Ok(StageMetrics {
                statements_executed: statements.len(),
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(NoiseError::stage(stage, e)),
            Err(_) => Err(NoiseError::stage(
                stage,
                format!("timed out after {}ms", timeout_ms),
            )),
        }
    }
}
