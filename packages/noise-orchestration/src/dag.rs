use crate::error::{NoiseError, Result};
use crate::job::StageId;
use std::collections::HashMap;

/// One pipeline stage and the stages it waits for
#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
    /// Engine table the stage (re)creates
    pub output_table: &'static str,
    pub timeout_ms: u64,
}

impl StageNode {
    pub fn new(
        id: StageId,
        name: &'static str,
        dependencies: Vec<StageId>,
        output_table: &'static str,
        timeout_ms: u64,
    ) -> Self {
        Self {
            id,
            name,
            dependencies,
            output_table,
            timeout_ms,
        }
    }
}

/// Stage graph resolved into execution phases
#[derive(Debug, Clone)]
pub struct PipelineDAG {
    stages: HashMap<StageId, StageNode>,
    execution_order: Vec<Vec<StageId>>,
}

impl PipelineDAG {
    /// Create a new DAG from stage definitions
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let stage_map: HashMap<StageId, StageNode> =
            stages.into_iter().map(|stage| (stage.id, stage)).collect();

        if let Some((stage, dep)) = stage_map.values().find_map(|stage| {
            stage
                .dependencies
                .iter()
                .find(|dep| !stage_map.contains_key(dep))
                .map(|dep| (stage.id, *dep))
        }) {
            return Err(NoiseError::MissingDependency(format!(
                "stage {} waits on undeclared stage {}",
                stage, dep
            )));
        }

        let execution_order = Self::topological_sort(&stage_map)?;

        Ok(Self {
            stages: stage_map,
            execution_order,
        })
    }

    /// The noise pipeline: a strict chain, each stage waiting on its predecessor
    pub fn noise_pipeline(stage_timeout_ms: u64) -> Result<Self> {
        use crate::statement::tables;

        let stage = |id: StageId, name, output_table| {
            StageNode::new(
                id,
                name,
                id.predecessor().into_iter().collect(),
                output_table,
                stage_timeout_ms,
            )
        };

        Self::new(vec![
            stage(StageId::Buildings, "Buildings", tables::BUILDINGS),
            stage(StageId::RoadGeometry, "Road geometry", tables::ROADS_GEOM),
            stage(StageId::Traffic, "Traffic", tables::ROADS_TRAFFIC),
            stage(
                StageId::DirectionalDuplication,
                "Directional duplication",
                tables::ROADS_GEO_AND_TRAFFIC,
            ),
            stage(StageId::SourcePower, "Source power", tables::ROADS_SRC_GLOBAL),
            stage(
                StageId::SpectrumRepartition,
                "Spectrum repartition",
                tables::ROADS_SRC,
            ),
            stage(StageId::PropagationGrid, "Propagation grid", tables::TRI_LVL),
            stage(
                StageId::Contouring,
                "Contouring",
                tables::CONTOURING_NOISE_MAP,
            ),
            stage(StageId::Export, "Export", tables::CONTOURING_NOISE_MAP),
        ])
    }

    /// Kahn's algorithm, one phase per wave of ready stages (sorted by id)
    fn topological_sort(stages: &HashMap<StageId, StageNode>) -> Result<Vec<Vec<StageId>>> {
        let mut waiting_on: HashMap<StageId, usize> = HashMap::with_capacity(stages.len());
        let mut dependents: HashMap<StageId, Vec<StageId>> = HashMap::new();
        for stage in stages.values() {
            waiting_on.insert(stage.id, stage.dependencies.len());
            for dep in &stage.dependencies {
                dependents.entry(*dep).or_default().push(stage.id);
            }
        }

        let mut ready: Vec<StageId> = waiting_on
            .iter()
            .filter_map(|(&id, &count)| (count == 0).then_some(id))
            .collect();
        let mut phases = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort();
            placed += ready.len();

            let mut next = Vec::new();
            for id in &ready {
                for dependent in dependents.get(id).into_iter().flatten() {
                    if let Some(count) = waiting_on.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }

            phases.push(std::mem::replace(&mut ready, next));
        }

        if placed < stages.len() {
            return Err(NoiseError::DagCycleDetected);
        }
        Ok(phases)
    }

    pub fn execution_order(&self) -> &[Vec<StageId>] {
        &self.execution_order
    }

    /// Flattened stage order
    pub fn linear_order(&self) -> Vec<StageId> {
        self.execution_order.iter().flatten().copied().collect()
    }

    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(&id)
    }

    /// One line per phase, for the startup log
    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let stage_names: Vec<_> = group
                    .iter()
                    .filter_map(|id| self.stages.get(id).map(|s| s.name))
                    .collect();
                format!("Phase {}: {}", i + 1, stage_names.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_pipeline_is_a_chain() {
        let dag = PipelineDAG::noise_pipeline(1_000).unwrap();
        let order = dag.execution_order();

        assert_eq!(order.len(), StageId::ALL.len());
        assert!(order.iter().all(|phase| phase.len() == 1));
        assert_eq!(dag.linear_order(), StageId::ALL.to_vec());
    }

    #[test]
    fn test_dag_topological_sort_simple() {
        let stages = vec![
            StageNode::new(
                StageId::RoadGeometry,
                "Roads",
                vec![StageId::Buildings],
                "roads_geom",
                1000,
            ),
            StageNode::new(StageId::Buildings, "Buildings", vec![], "buildings", 1000),
        ];

        let dag = PipelineDAG::new(stages).unwrap();
        let order = dag.execution_order();

        assert_eq!(order.len(), 2);
        assert_eq!(order[0], vec![StageId::Buildings]);
        assert_eq!(order[1], vec![StageId::RoadGeometry]);
    }

    #[test]
    fn test_dag_independent_stages_share_phase() {
        let stages = vec![
            StageNode::new(StageId::Traffic, "Traffic", vec![], "roads_traffic", 1000),
            StageNode::new(StageId::Buildings, "Buildings", vec![], "buildings", 1000),
        ];

        let dag = PipelineDAG::new(stages).unwrap();
        assert_eq!(
            dag.execution_order()[0],
            vec![StageId::Buildings, StageId::Traffic]
        );
    }

    #[test]
    fn test_dag_missing_dependency() {
        let stages = vec![StageNode::new(
            StageId::Traffic,
            "Traffic",
            vec![StageId::RoadGeometry],
            "roads_traffic",
            1000,
        )];

        assert!(matches!(
            PipelineDAG::new(stages),
            Err(NoiseError::MissingDependency(_))
        ));
    }

    #[test]
    fn test_dag_cycle_detection() {
        let stages = vec![
            StageNode::new(
                StageId::Buildings,
                "Buildings",
                vec![StageId::Export],
                "buildings",
                1000,
            ),
            StageNode::new(
                StageId::Export,
                "Export",
                vec![StageId::Buildings],
                "contouring_noise_map",
                1000,
            ),
        ];

        assert!(matches!(
            PipelineDAG::new(stages),
            Err(NoiseError::DagCycleDetected)
        ));
    }

    #[test]
    fn test_dag_execution_plan_string() {
        let dag = PipelineDAG::noise_pipeline(1_000).unwrap();
        let plan = dag.execution_plan();

        assert!(plan.starts_with("Phase 1: Buildings"));
        assert!(plan.contains("Phase 7: Propagation grid"));
        assert!(plan.ends_with("Phase 9: Export"));
    }
}
