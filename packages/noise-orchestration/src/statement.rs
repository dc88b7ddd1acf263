//! Typed engine statements
//!
//! Every SQL string sent to the engine is rendered from a `Statement`,
//! so the complete program of a job can be enumerated and asserted on
//! without a live engine.

use crate::config::PropagationConfig;
use crate::road_graph::EdgeAttributes;
use std::fmt;

/// Engine table names
pub mod tables {
    pub const BUILDINGS: &str = "buildings";
    pub const ROADS_GEOM: &str = "roads_geom";
    pub const ROADS_TRAFFIC: &str = "roads_traffic";
    pub const ROADS_DIR_ONE: &str = "roads_dir_one";
    pub const ROADS_DIR_TWO: &str = "roads_dir_two";
    pub const ROADS_GEO_AND_TRAFFIC: &str = "roads_geo_and_traffic";
    pub const ROADS_SRC_GLOBAL: &str = "roads_src_global";
    pub const ROADS_SRC: &str = "roads_src";
    pub const TRI_LVL: &str = "tri_lvl";
    pub const TRICONTOURING_NOISE_MAP: &str = "tricontouring_noise_map";
    pub const MULTIPOLYGON_ISO: &str = "multipolygon_iso";
    pub const CONTOURING_NOISE_MAP: &str = "contouring_noise_map";
}

/// Third-octave band centre frequencies (Hz) of the source spectrum
pub const SPECTRUM_BANDS_HZ: [u32; 18] = [
    100, 125, 160, 200, 250, 315, 400, 500, 630, 800, 1000, 1250, 1600, 2000, 2500, 3150, 4000,
    5000,
];

/// Iso-level thresholds (linear energy) for triangle contouring
pub const ISO_THRESHOLDS: [&str; 8] = [
    "31622", "100000", "316227", "1000000", "3162277", "1e+7", "31622776", "1e+20",
];

/// Grid envelope margin around the road sources (metres)
pub const GRID_ENVELOPE_MARGIN_M: f64 = 750.0;

pub const METRIC_SRID: u32 = 25832;
pub const WGS84_SRID: u32 = 4326;

/// One traffic row keyed by a directed node pair
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRow {
    pub node_from: usize,
    pub node_to: usize,
    pub attributes: EdgeAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Fixed SQL (DDL, derived tables)
    Sql(String),
    CreateAlias {
        alias: &'static str,
        class: &'static str,
    },
    InsertBuilding {
        wkt: String,
    },
    InsertRoadGeometry {
        wkt: String,
        num: i64,
        node_from: usize,
        node_to: usize,
        road_type: i32,
    },
    InsertRoadTraffic(TrafficRow),
    PropagationGrid(PropagationConfig),
    WriteGeoJson {
        path: String,
        table: &'static str,
    },
}

impl Statement {
    pub fn sql_text(sql: impl Into<String>) -> Self {
        Statement::Sql(sql.into())
    }

    pub fn drop_table(table: &str) -> Self {
        Statement::Sql(format!("DROP TABLE IF EXISTS {}", table))
    }

    /// Render the statement as engine SQL
    pub fn sql(&self) -> String {
        match self {
            Statement::Sql(sql) => sql.clone(),
            Statement::CreateAlias { alias, class } => {
                format!("CREATE ALIAS IF NOT EXISTS {} FOR \"{}\"", alias, class)
            }
            Statement::InsertBuilding { wkt } => format!(
                "INSERT INTO {} (the_geom) VALUES (ST_GeomFromText({}))",
                tables::BUILDINGS,
                quote_literal(wkt)
            ),
            Statement::InsertRoadGeometry {
                wkt,
                num,
                node_from,
                node_to,
                road_type,
            } => format!(
                "INSERT INTO {} (the_geom, num, node_from, node_to, road_type) \
                 VALUES (ST_GeomFromText({}), {}, {}, {}, {})",
                tables::ROADS_GEOM,
                quote_literal(wkt),
                num,
                node_from,
                node_to,
                road_type
            ),
            Statement::InsertRoadTraffic(row) => traffic_sql(row),
            Statement::PropagationGrid(p) => format!(
                "CREATE TABLE {tri} AS SELECT * FROM BR_TriGrid(\
                 (SELECT ST_Expand(ST_Envelope(ST_Accum(the_geom)), {margin}, {margin}) the_geom FROM {src}), \
                 '{buildings}', '{src}', 'db_m', '', {}, {}, {}, {}, {}, {}, {}, {})",
                p.max_prop_distance,
                p.max_wall_seeking_distance,
                p.road_width,
                p.receiver_densification,
                p.max_triangle_area,
                p.sound_reflection_order,
                p.sound_diffraction_order,
                p.wall_absorption,
                tri = tables::TRI_LVL,
                margin = GRID_ENVELOPE_MARGIN_M,
                src = tables::ROADS_SRC,
                buildings = tables::BUILDINGS,
            ),
            Statement::WriteGeoJson { path, table } => format!(
                "CALL GeoJsonWrite({}, {})",
                quote_literal(path),
                quote_literal(&table.to_uppercase())
            ),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

fn traffic_sql(row: &TrafficRow) -> String {
    match &row.attributes {
        EdgeAttributes::Car {
            max_speed,
            load_speed,
            junction_speed,
            light_vehicles,
            heavy_vehicles,
        } => format!(
            "INSERT INTO {} (node_from, node_to, load_speed, junction_speed, max_speed, \
             lightVehicleCount, heavyVehicleCount) VALUES ({}, {}, {}, {}, {}, {}, {})",
            tables::ROADS_TRAFFIC,
            row.node_from,
            row.node_to,
            load_speed,
            junction_speed,
            max_speed,
            light_vehicles,
            heavy_vehicles
        ),
        EdgeAttributes::Rail {
            train_speed,
            trains_per_hour,
            ground_type,
            has_anti_vibration,
        } => format!(
            "INSERT INTO {} (node_from, node_to, train_speed, trains_per_hour, ground_type, \
             has_anti_vibration) VALUES ({}, {}, {}, {}, {}, {})",
            tables::ROADS_TRAFFIC,
            row.node_from,
            row.node_to,
            train_speed,
            trains_per_hour,
            ground_type,
            if *has_anti_vibration { "TRUE" } else { "FALSE" }
        ),
    }
}

/// SQL string literal with embedded quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
