//! Geometry normalization
//!
//! Input features arrive as GeoJSON in WGS84 (EPSG:4326, lon/lat). The
//! engine works in ETRS89 / UTM zone 32N (EPSG:25832) with every vertex at
//! elevation 0. Any Z already present is discarded while parsing, the
//! constant elevation is attached when rendering WKT.

use crate::error::{NoiseError, Result};
use crate::scenario::{RoadFeature, Scenario};
use geo::{Coord, LineString, MapCoords, MultiLineString, MultiPolygon, Polygon};
use rayon::prelude::*;
use serde_json::{json, Value};
use std::fmt::Write;
use tracing::debug;

/// Elevation assigned to every normalized vertex
pub const ELEVATION: f64 = 0.0;

// GRS80 / ETRS89
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_222_101;

// UTM zone 32N
const CENTRAL_MERIDIAN_DEG: f64 = 9.0;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;

/// Project a WGS84 lon/lat coordinate to EPSG:25832 (Krüger series)
pub fn to_utm32n(coord: Coord<f64>) -> Coord<f64> {
    let n = FLATTENING / (2.0 - FLATTENING);
    let n2 = n * n;
    let n3 = n2 * n;
    let rectifying_radius = SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);
    let alpha = [
        n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
        13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
        61.0 * n3 / 240.0,
    ];

    let phi = coord.y.to_radians();
    let dlambda = (coord.x - CENTRAL_MERIDIAN_DEG).to_radians();

    let e = 2.0 * n.sqrt() / (1.0 + n);
    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - e * (e * sin_phi).atanh()).sinh();
    let xi = t.atan2(dlambda.cos());
    let eta = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut easting = eta;
    let mut northing = xi;
    for (j, a) in alpha.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        easting += a * (k * xi).cos() * (k * eta).sinh();
        northing += a * (k * xi).sin() * (k * eta).cosh();
    }

    Coord {
        x: FALSE_EASTING + SCALE_FACTOR * rectifying_radius * easting,
        y: SCALE_FACTOR * rectifying_radius * northing,
    }
}

/// Road geometry: a single line or a multi-part line
#[derive(Debug, Clone, PartialEq)]
pub enum RoadLine {
    Line(LineString<f64>),
    Multi(MultiLineString<f64>),
}

impl RoadLine {
    /// First point of the first part and last point of the last part
    pub fn endpoints(&self) -> Option<(Coord<f64>, Coord<f64>)> {
        match self {
            RoadLine::Line(line) => Some((*line.0.first()?, *line.0.last()?)),
            RoadLine::Multi(multi) => {
                let start = *multi.0.first()?.0.first()?;
                let end = *multi.0.last()?.0.last()?;
                Some((start, end))
            }
        }
    }

    pub fn project(&self) -> RoadLine {
        match self {
            RoadLine::Line(line) => RoadLine::Line(line.map_coords(to_utm32n)),
            RoadLine::Multi(multi) => RoadLine::Multi(multi.map_coords(to_utm32n)),
        }
    }

    /// WKT with explicit zero elevation
    pub fn to_wkt_z(&self) -> String {
        let mut wkt = String::new();
        match self {
            RoadLine::Line(line) => {
                wkt.push_str("LINESTRING Z ");
                write_ring(&mut wkt, line);
            }
            RoadLine::Multi(multi) => {
                wkt.push_str("MULTILINESTRING Z (");
                write_joined(&mut wkt, &multi.0, write_ring);
                wkt.push(')');
            }
        }
        wkt
    }
}

/// Polygon WKT with explicit zero elevation
pub fn polygon_to_wkt_z(polygon: &Polygon<f64>) -> String {
    let mut wkt = String::from("POLYGON Z (");
    write_ring(&mut wkt, polygon.exterior());
    for interior in polygon.interiors() {
        wkt.push_str(", ");
        write_ring(&mut wkt, interior);
    }
    wkt.push(')');
    wkt
}

fn write_ring(out: &mut String, line: &LineString<f64>) {
    out.push('(');
    write_joined(out, &line.0, |out, c| {
        let _ = write!(out, "{} {} {}", c.x, c.y, ELEVATION);
    });
    out.push(')');
}

fn write_joined<T>(out: &mut String, items: &[T], mut each: impl FnMut(&mut String, &T)) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        each(out, item);
    }
}

/// Geometry `type` member of a GeoJSON geometry object
pub fn geometry_type(geometry: &Value) -> &str {
    geometry
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
}

/// Parse a GeoJSON Polygon (extra dimensions are dropped)
pub fn parse_polygon(geometry: &Value) -> Result<Polygon<f64>> {
    match geometry_type(geometry) {
        "Polygon" => polygon_from_rings(coordinates(geometry)?),
        other => Err(NoiseError::UnsupportedGeometry {
            collection: "buildings",
            expected: "Polygon",
            found: other.to_string(),
        }),
    }
}

/// Parse a GeoJSON LineString or MultiLineString
pub fn parse_road_line(geometry: &Value) -> Result<RoadLine> {
    match geometry_type(geometry) {
        "LineString" => Ok(RoadLine::Line(parse_line(coordinates(geometry)?)?)),
        "MultiLineString" => {
            let parts = as_array(coordinates(geometry)?, "MultiLineString")?;
            if parts.is_empty() {
                return Err(NoiseError::validation("MultiLineString has no parts"));
            }
            let lines = parts.iter().map(parse_line).collect::<Result<Vec<_>>>()?;
            Ok(RoadLine::Multi(MultiLineString::new(lines)))
        }
        other => Err(NoiseError::UnsupportedGeometry {
            collection: "roads",
            expected: "LineString or MultiLineString",
            found: other.to_string(),
        }),
    }
}

/// Parse a Polygon or MultiPolygon as a multipolygon (result features)
pub fn parse_polygonal(geometry: &Value) -> Option<MultiPolygon<f64>> {
    match geometry_type(geometry) {
        "Polygon" => polygon_from_rings(geometry.get("coordinates")?)
            .ok()
            .map(|p| MultiPolygon::new(vec![p])),
        "MultiPolygon" => {
            let polygons = geometry
                .get("coordinates")?
                .as_array()?
                .iter()
                .map(polygon_from_rings)
                .collect::<Result<Vec<_>>>()
                .ok()?;
            Some(MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

/// GeoJSON geometry object for a (multi)polygon
pub fn multipolygon_to_geojson(multi: &MultiPolygon<f64>) -> Value {
    let rings = |polygon: &Polygon<f64>| -> Vec<Vec<[f64; 2]>> {
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| ring.0.iter().map(|c| [c.x, c.y]).collect())
            .collect()
    };

    match multi.0.as_slice() {
        [single] => json!({"type": "Polygon", "coordinates": rings(single)}),
        many => json!({
            "type": "MultiPolygon",
            "coordinates": many.iter().map(rings).collect::<Vec<_>>(),
        }),
    }
}

fn coordinates(geometry: &Value) -> Result<&Value> {
    geometry
        .get("coordinates")
        .ok_or_else(|| NoiseError::validation("geometry has no coordinates"))
}

fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| NoiseError::validation(format!("{} coordinates must be an array", what)))
}

fn parse_coord(value: &Value) -> Result<Coord<f64>> {
    let position = as_array(value, "position")?;
    match (
        position.first().and_then(Value::as_f64),
        position.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) if (-180.0..=180.0).contains(&x) && y.abs() < 90.0 => {
            Ok(Coord { x, y })
        }
        (Some(x), Some(y)) => Err(NoiseError::validation(format!(
            "position ({}, {}) is outside WGS84 longitude [-180, 180] / latitude (-90, 90)",
            x, y
        ))),
        _ => Err(NoiseError::validation(format!(
            "position needs at least two numbers, got {}",
            value
        ))),
    }
}

fn parse_line(value: &Value) -> Result<LineString<f64>> {
    let coords = as_array(value, "LineString")?
        .iter()
        .map(parse_coord)
        .collect::<Result<Vec<_>>>()?;
    if coords.len() < 2 {
        return Err(NoiseError::validation(format!(
            "line needs at least two positions, got {}",
            coords.len()
        )));
    }
    Ok(LineString::new(coords))
}

fn polygon_from_rings(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = as_array(value, "Polygon")?.iter().map(|ring| -> Result<LineString<f64>> {
        let coords = as_array(ring, "ring")?
            .iter()
            .map(parse_coord)
            .collect::<Result<Vec<_>>>()?;
        Ok(LineString::new(coords))
    });

    let exterior = rings
        .next()
        .ok_or_else(|| NoiseError::validation("polygon has no exterior ring"))??;
    if exterior.0.len() < 4 {
        return Err(NoiseError::validation(
            "polygon exterior ring needs at least four positions",
        ));
    }
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Scenario with geometry projected to the engine CRS
#[derive(Debug, Clone)]
pub struct NormalizedScenario {
    pub buildings: Vec<Polygon<f64>>,
    pub roads: Vec<RoadFeature>,
}

/// Projects scenario geometry on a dedicated thread pool
pub struct GeometryNormalizer {
    pool: rayon::ThreadPool,
}

impl GeometryNormalizer {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("noise-normalize-{}", i))
            .build()
            .map_err(|e| NoiseError::Other(anyhow::anyhow!("normalizer pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn normalize(&self, scenario: &Scenario) -> NormalizedScenario {
        let normalized = self.pool.install(|| NormalizedScenario {
            buildings: scenario
                .buildings
                .par_iter()
                .map(|polygon| polygon.map_coords(to_utm32n))
                .collect(),
            roads: scenario
                .roads
                .par_iter()
                .map(|road| road.with_geometry(road.geometry.project()))
                .collect(),
        });

        debug!(
            buildings = normalized.buildings.len(),
            roads = normalized.roads.len(),
            "normalized scenario geometry to EPSG:25832"
        );
        normalized
    }
}
