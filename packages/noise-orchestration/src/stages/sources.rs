//! Source stages: join geometry with traffic, evaluate emission power and
//! split it over the third-octave spectrum.

use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput};
use crate::scenario::RoadClass;
use crate::statement::{tables, Statement, SPECTRUM_BANDS_HZ};

const ROAD_COLUMNS: &str = "the_geom, road_type, load_speed, junction_speed, max_speed, \
     lightVehicleCount, heavyVehicleCount, train_speed, trains_per_hour, ground_type, \
     has_anti_vibration";

/// Joins traffic rows to geometry in both node directions
pub struct DirectionalDuplicationStage;

impl StageHandler for DirectionalDuplicationStage {
    fn stage_id(&self) -> StageId {
        StageId::DirectionalDuplication
    }

    fn output_table(&self) -> &'static str {
        tables::ROADS_GEO_AND_TRAFFIC
    }

    fn statements(&self, _input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        let join = |table: &str, geo_from: &str, geo_to: &str| {
            Statement::sql_text(format!(
                "CREATE TABLE {table} AS SELECT {ROAD_COLUMNS} FROM {geom} AS geo, {traffic} traff \
                 WHERE geo.{geo_from} = traff.node_from AND geo.{geo_to} = traff.node_to",
                geom = tables::ROADS_GEOM,
                traffic = tables::ROADS_TRAFFIC,
            ))
        };

        Ok(vec![
            Statement::drop_table(tables::ROADS_DIR_ONE),
            Statement::drop_table(tables::ROADS_DIR_TWO),
            join(tables::ROADS_DIR_ONE, "node_from", "node_to"),
            join(tables::ROADS_DIR_TWO, "node_to", "node_from"),
            Statement::drop_table(tables::ROADS_GEO_AND_TRAFFIC),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT * FROM {} UNION SELECT * FROM {}",
                tables::ROADS_GEO_AND_TRAFFIC,
                tables::ROADS_DIR_ONE,
                tables::ROADS_DIR_TWO
            )),
        ])
    }
}

/// Global emission level per source segment (`db_m`)
pub struct SourcePowerStage;

impl StageHandler for SourcePowerStage {
    fn stage_id(&self) -> StageId {
        StageId::SourcePower
    }

    fn output_table(&self) -> &'static str {
        tables::ROADS_SRC_GLOBAL
    }

    fn statements(&self, _input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        // Rail rows go through the tramway model, everything else through the road model
        Ok(vec![
            Statement::drop_table(tables::ROADS_SRC_GLOBAL),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT the_geom, CASEWHEN(road_type = {}, \
                 BTW_EvalSource(train_speed, trains_per_hour, ground_type, has_anti_vibration), \
                 BR_EvalSource(load_speed, lightVehicleCount, heavyVehicleCount, junction_speed, \
                 max_speed, road_type, ST_Z(ST_GeometryN(ST_ToMultiPoint(the_geom), 1)), \
                 ST_Z(ST_GeometryN(ST_ToMultiPoint(the_geom), 2)), ST_Length(the_geom), False)) \
                 AS db_m FROM {}",
                tables::ROADS_SRC_GLOBAL,
                RoadClass::Railroad.code(),
                tables::ROADS_GEO_AND_TRAFFIC
            )),
        ])
    }
}

/// Spreads `db_m` over the third-octave bands (`db_m100` ... `db_m5000`)
pub struct SpectrumRepartitionStage;

impl StageHandler for SpectrumRepartitionStage {
    fn stage_id(&self) -> StageId {
        StageId::SpectrumRepartition
    }

    fn output_table(&self) -> &'static str {
        tables::ROADS_SRC
    }

    fn statements(&self, _input: StageInput<'_>, _ctx: &StageContext) -> Result<Vec<Statement>> {
        let bands: Vec<String> = SPECTRUM_BANDS_HZ
            .iter()
            .map(|hz| format!("BR_SpectrumRepartition({hz}, 1, db_m) AS db_m{hz}"))
            .collect();

        Ok(vec![
            Statement::drop_table(tables::ROADS_SRC),
            Statement::sql_text(format!(
                "CREATE TABLE {} AS SELECT the_geom, {} FROM {}",
                tables::ROADS_SRC,
                bands.join(", "),
                tables::ROADS_SRC_GLOBAL
            )),
        ])
    }
}
