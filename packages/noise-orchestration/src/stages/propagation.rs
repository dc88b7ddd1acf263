use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput};
use crate::statement::{tables, Statement};

/// Sound propagation from the sources onto the receiver triangle grid
pub struct PropagationGridStage;

impl StageHandler for PropagationGridStage {
    fn stage_id(&self) -> StageId {
        StageId::PropagationGrid
    }

    fn output_table(&self) -> &'static str {
        tables::TRI_LVL
    }

    fn statements(&self, _input: StageInput<'_>, ctx: &StageContext) -> Result<Vec<Statement>> {
        Ok(vec![
            Statement::drop_table(tables::TRI_LVL),
            Statement::PropagationGrid(ctx.propagation.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::RoadGraph;
    use crate::stages::test_support::ctx;

    #[test]
    fn test_uses_context_parameters() {
        let mut ctx = ctx();
        ctx.propagation.sound_reflection_order = 2;
        let graph = RoadGraph::default();

        let statements = PropagationGridStage
            .statements(
                StageInput {
                    buildings: &[],
                    graph: &graph,
                },
                &ctx,
            )
            .unwrap();

        assert_eq!(statements[0].sql(), "DROP TABLE IF EXISTS tri_lvl");
        assert!(statements[1].sql().ends_with("275, 2, 0, 0.23)"));
    }
}
