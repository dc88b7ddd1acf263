use crate::error::Result;
use crate::geometry::polygon_to_wkt_z;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput};
use crate::statement::{tables, Statement};

/// Loads building footprints (one row per polygon)
pub struct BuildingsStage;

impl StageHandler for BuildingsStage {
    fn stage_id(&self) -> StageId {
        StageId::Buildings
    }

    fn output_table(&self) -> &'static str {
        tables::BUILDINGS
    }

    fn statements(&self, input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        let mut statements = Vec::with_capacity(input.buildings.len() + 2);
        statements.push(Statement::drop_table(tables::BUILDINGS));
        statements.push(Statement::sql_text(format!(
            "CREATE TABLE {} (the_geom GEOMETRY)",
            tables::BUILDINGS
        )));
        statements.extend(input.buildings.iter().map(|polygon| Statement::InsertBuilding {
            wkt: polygon_to_wkt_z(polygon),
        }));
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::RoadGraph;
    use crate::stages::test_support::ctx;
    use geo::{LineString, Polygon};

    #[test]
    fn test_one_insert_per_building() {
        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let graph = RoadGraph::default();
        let buildings = vec![square.clone(), square];

        let statements = BuildingsStage
            .statements(
                StageInput {
                    buildings: &buildings,
                    graph: &graph,
                },
                &ctx(),
            )
            .unwrap();

        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0].sql(), "DROP TABLE IF EXISTS buildings");
        assert_eq!(
            statements[2].sql(),
            "INSERT INTO buildings (the_geom) VALUES \
             (ST_GeomFromText('POLYGON Z ((0 0 0, 1 0 0, 1 1 0, 0 1 0, 0 0 0))'))"
        );
    }
}
