use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput};
use crate::statement::{tables, Statement};

/// Road geometry and class, keyed by node pair
pub struct RoadGeometryStage;

impl StageHandler for RoadGeometryStage {
    fn stage_id(&self) -> StageId {
        StageId::RoadGeometry
    }

    fn output_table(&self) -> &'static str {
        tables::ROADS_GEOM
    }

    fn statements(&self, input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        let mut statements = vec![
            Statement::drop_table(tables::ROADS_GEOM),
            Statement::sql_text(format!(
                "CREATE TABLE {} (the_geom GEOMETRY, num INTEGER, node_from INTEGER, \
                 node_to INTEGER, road_type INTEGER)",
                tables::ROADS_GEOM
            )),
        ];
        statements.extend(input.graph.geometry_statements());
        Ok(statements)
    }
}

/// Car traffic / rail attributes per directed node pair
pub struct TrafficStage;

impl StageHandler for TrafficStage {
    fn stage_id(&self) -> StageId {
        StageId::Traffic
    }

    fn output_table(&self) -> &'static str {
        tables::ROADS_TRAFFIC
    }

    fn statements(&self, input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        let mut statements = vec![
            Statement::drop_table(tables::ROADS_TRAFFIC),
            Statement::sql_text(format!(
                "CREATE TABLE {} (node_from INTEGER, node_to INTEGER, load_speed DOUBLE, \
                 junction_speed DOUBLE, max_speed DOUBLE, lightVehicleCount DOUBLE, \
                 heavyVehicleCount DOUBLE, train_speed DOUBLE, trains_per_hour DOUBLE, \
                 ground_type INTEGER, has_anti_vibration BOOLEAN)",
                tables::ROADS_TRAFFIC
            )),
        ];
        statements.extend(input.graph.traffic_statements());
        Ok(statements)
    }
}
