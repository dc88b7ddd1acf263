//! Iso-contouring of the receiver grid and the final GeoJSON export

use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput};
use crate::statement::{tables, Statement, ISO_THRESHOLDS, METRIC_SRID, WGS84_SRID};

/// Contours the grid into iso-level polygons (`idiso` 0..=7), back in WGS84
pub struct ContouringStage;

impl StageHandler for ContouringStage {
    fn stage_id(&self) -> StageId {
        StageId::Contouring
    }

    fn output_table(&self) -> &'static str {
        tables::CONTOURING_NOISE_MAP
    }

    fn statements(&self, _input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        Ok(vec![
            Statement::drop_table(tables::TRICONTOURING_NOISE_MAP),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT * FROM ST_TriangleContouring('{}', 'w_v1', 'w_v2', 'w_v3', {})",
                tables::TRICONTOURING_NOISE_MAP,
                tables::TRI_LVL,
                ISO_THRESHOLDS.join(", ")
            )),
            Statement::drop_table(tables::MULTIPOLYGON_ISO),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT ST_UNION(ST_ACCUM(the_geom)) the_geom, idiso, CELL_ID \
                 FROM {} GROUP BY IDISO, CELL_ID",
                tables::MULTIPOLYGON_ISO,
                tables::TRICONTOURING_NOISE_MAP
            )),
            Statement::drop_table(tables::CONTOURING_NOISE_MAP),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT ST_Transform(ST_SETSRID(the_geom, {}), {}) the_geom, \
                 idiso, CELL_ID FROM ST_Explode('{}')",
                tables::CONTOURING_NOISE_MAP,
                METRIC_SRID,
                WGS84_SRID,
                tables::MULTIPOLYGON_ISO
            )),
            Statement::drop_table(tables::MULTIPOLYGON_ISO),
        ])
    }
}

/// Has the engine write the contour table as GeoJSON
pub struct ExportStage;

impl StageHandler for ExportStage {
    fn stage_id(&self) -> StageId {
        StageId::Export
    }

    fn output_table(&self) -> &'static str {
        tables::CONTOURING_NOISE_MAP
    }

    fn statements(&self, _input: StageInput<'_>, ctx: &StageContext) -> Result<Vec<Statement>> {
        Ok(vec![Statement::WriteGeoJson {
            path: ctx.export_path.to_string_lossy().into_owned(),
            table: tables::CONTOURING_NOISE_MAP,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::RoadGraph;
    use crate::stages::test_support::ctx;

    #[test]
    fn test_contouring_thresholds_and_transform() {
        let graph = RoadGraph::default();
        let sql: Vec<String> = ContouringStage
            .statements(
                StageInput {
                    buildings: &[],
                    graph: &graph,
                },
                &ctx(),
            )
            .unwrap()
            .iter()
            .map(Statement::sql)
            .collect();

        assert!(sql[1].ends_with(
            "'w_v1', 'w_v2', 'w_v3', 31622, 100000, 316227, 1000000, 3162277, 1e+7, 31622776, 1e+20)"
        ));
        assert!(sql[5].contains("ST_Transform(ST_SETSRID(the_geom, 25832), 4326)"));
        assert_eq!(sql.last().map(String::as_str), Some("DROP TABLE IF EXISTS multipolygon_iso"));
    }

    #[test]
    fn test_export_writes_to_context_path() {
        let graph = RoadGraph::default();
        let statements = ExportStage
            .statements(
                StageInput {
                    buildings: &[],
                    graph: &graph,
                },
                &ctx(),
            )
            .unwrap();

        assert_eq!(
            statements,
            vec![Statement::WriteGeoJson {
                path: "/tmp/noise/result.geojson".to_string(),
                table: "contouring_noise_map",
            }]
        );
    }
}
