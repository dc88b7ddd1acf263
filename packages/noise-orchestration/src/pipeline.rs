use crate::config::PropagationConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::job::StageId;
use crate::road_graph::RoadGraph;
use crate::statement::Statement;
use geo::Polygon;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Stage context passed to handlers
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub fingerprint: Fingerprint,
    pub propagation: PropagationConfig,
    /// File the export stage asks the engine to write
    pub export_path: PathBuf,
}

/// Stage input: the job's normalized data
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub buildings: &'a [Polygon<f64>],
    pub graph: &'a RoadGraph,
}

/// Stage metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub statements_executed: usize,
    pub duration_ms: u64,
}

/// Stage handler trait (pluggable stages)
///
/// A handler only plans: it returns the statements that drop and rebuild
/// its output table. Running them against the engine is the sequencer's
/// job, so handlers are pure and can be tested without an engine.
pub trait StageHandler: Send + Sync {
    fn stage_id(&self) -> StageId;

    /// Engine table this stage (re)creates
    fn output_table(&self) -> &'static str;

    fn statements(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<Vec<Statement>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{ContentHash, ScenarioHash};

    struct MockStage;

    impl StageHandler for MockStage {
        fn stage_id(&self) -> StageId {
            StageId::Buildings
        }

        fn output_table(&self) -> &'static str {
            "mock"
        }

        fn statements(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<Vec<Statement>> {
            Ok(vec![Statement::sql_text(format!(
                "-- {} buildings for {}",
                input.buildings.len(),
                ctx.fingerprint
            ))])
        }
    }

    #[test]
    fn test_stage_metrics_default() {
        let metrics = StageMetrics::default();
        assert_eq!(metrics.statements_executed, 0);
        assert_eq!(metrics.duration_ms, 0);
    }

    #[test]
    fn test_mock_stage_plans_statements() {
        let ctx = StageContext {
            job_id: Uuid::new_v4(),
            fingerprint: Fingerprint::new(ContentHash::from_hex("aa"), ScenarioHash::from_hex("bb")),
            propagation: PropagationConfig::default(),
            export_path: PathBuf::from("/tmp/out.geojson"),
        };
        let graph = RoadGraph::default();
        let input = StageInput {
            buildings: &[],
            graph: &graph,
        };

        let statements = MockStage.statements(input, &ctx).unwrap();
        assert_eq!(statements, vec![Statement::sql_text("-- 0 buildings for aa_bb")]);
    }
}
