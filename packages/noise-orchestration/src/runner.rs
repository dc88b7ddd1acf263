use crate::config::PropagationConfig;
use crate::error::{NoiseError, Result};
use crate::extract::{buildings_extent, clip_to_extent, result_document};
use crate::geometry::GeometryNormalizer;
use crate::pipeline::{StageContext, StageInput};
use crate::road_graph::RoadGraphBuilder;
use crate::scenario::Scenario;
use crate::sequencer::{PipelineSequencer, StageProgress};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Computes the result document of one scenario
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(
        &self,
        job_id: Uuid,
        scenario: Arc<Scenario>,
        progress: &dyn StageProgress,
    ) -> Result<Value>;
}

/// normalize -> road graph -> engine stages -> (clip) -> `{"geojson": ...}`
pub struct NoisePipeline {
    normalizer: Arc<GeometryNormalizer>,
    sequencer: PipelineSequencer,
    propagation: PropagationConfig,
    export_dir: PathBuf,
}

impl NoisePipeline {
    pub fn new(
        normalizer: GeometryNormalizer,
        sequencer: PipelineSequencer,
        propagation: PropagationConfig,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            sequencer,
            propagation,
            export_dir,
        }
    }

    pub fn sequencer(&self) -> &PipelineSequencer {
        &self.sequencer
    }

    /// File the engine writes for `job_id`, read back and removed afterwards
    pub fn export_path(&self, job_id: Uuid) -> PathBuf {
        self.export_dir.join(format!("{}.geojson", job_id))
    }
}

#[async_trait]
impl ScenarioRunner for NoisePipeline {
    async fn run(
        &self,
        job_id: Uuid,
        scenario: Arc<Scenario>,
        progress: &dyn StageProgress,
    ) -> Result<Value> {
        let normalizer = self.normalizer.clone();
        let input = scenario.clone();
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&input))
            .await
            .map_err(|e| NoiseError::Other(anyhow::anyhow!("normalization task failed: {}", e)))?;

        let graph = RoadGraphBuilder::new(scenario.traffic).build(&normalized.roads)?;
        info!(
            "Job {}: {} buildings, {} nodes, {} edges",
            job_id,
            normalized.buildings.len(),
            graph.nodes().len(),
            graph.edges().len()
        );

        tokio::fs::create_dir_all(&self.export_dir).await?;
        let ctx = StageContext {
            job_id,
            fingerprint: scenario.fingerprint.clone(),
            propagation: self.propagation.clone(),
            export_path: self.export_path(job_id),
        };
        let stage_input = StageInput {
            buildings: &normalized.buildings,
            graph: &graph,
        };

        let output = self.sequencer.run(stage_input, &ctx, progress).await;

        match tokio::fs::remove_file(&ctx.export_path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!("Job {}: could not remove export file: {}", job_id, e);
            }
            _ => {}
        }

        let mut geojson = output?.document;
        if scenario.output.clip_to_buildings {
            if let Some(extent) = buildings_extent(&scenario.buildings) {
                geojson = clip_to_extent(geojson, extent);
            }
        }
        Ok(result_document(geojson))
    }
}
