//! Submitted calculation input and its validated form
//!
//! `CalculationInput` is the wire shape accepted at submit. It is
//! validated once into a `Scenario`: ranges checked, geometry parsed,
//! road attributes typed and the fingerprint computed. Nothing downstream
//! re-validates.

use crate::error::{NoiseError, Result};
use crate::fingerprint::Fingerprint;
use crate::geometry::{self, RoadLine};
use geo::Polygon;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const MAX_SPEED_RANGE: (i64, i64) = (0, 70);
pub const TRAFFIC_QUOTA_RANGE: (i64, i64) = (0, 100);

/// Output encoding of the result document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    #[default]
    GeoJson,
}

impl ResultFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFormat::GeoJson => "geojson",
        }
    }
}

/// Submitted calculation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculationInput {
    /// FeatureCollection of building polygons (WGS84)
    pub buildings: Value,
    /// FeatureCollection of road lines (WGS84)
    pub roads: Value,
    /// Speed override in km/h for adjustable roads
    #[serde(default)]
    pub max_speed: Option<i64>,
    /// Percentage of the daily traffic kept on adjustable roads
    #[serde(default)]
    pub traffic_quota: Option<i64>,
    #[serde(default)]
    pub result_format: ResultFormat,
    /// Clip result polygons to the extent of the buildings
    #[serde(default)]
    pub clip_to_buildings: bool,
}

impl CalculationInput {
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(NoiseError::validation)
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(NoiseError::validation)
    }

    /// Parameters covered by the scenario hash
    pub fn scenario_params(&self) -> Value {
        json!({
            "traffic_settings": {
                "max_speed": self.max_speed,
                "traffic_quota": self.traffic_quota,
            },
            "output": {
                "format": self.result_format.as_str(),
                "clip_to_buildings": self.clip_to_buildings,
            },
        })
    }
}

/// Road classes understood by the emission model (with engine codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoadClass {
    Boulevard,
    Street,
    Alley,
    Railroad,
}

impl RoadClass {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boulevard" => Some(RoadClass::Boulevard),
            "street" => Some(RoadClass::Street),
            "alley" => Some(RoadClass::Alley),
            "railroad" => Some(RoadClass::Railroad),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            RoadClass::Boulevard => 56,
            RoadClass::Street => 53,
            RoadClass::Alley => 54,
            RoadClass::Railroad => 99,
        }
    }

    pub fn is_rail(&self) -> bool {
        matches!(self, RoadClass::Railroad)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoadKind {
    Known(RoadClass),
    Unrecognized(String),
}

/// Class-specific traffic description of a road
#[derive(Debug, Clone, PartialEq)]
pub enum TrafficProfile {
    Car {
        car_daily: f64,
        truck_daily: f64,
        max_speed: f64,
    },
    Rail {
        train_speed: f64,
        trains_per_hour: f64,
        ground_type: i64,
        has_anti_vibration: bool,
    },
}

/// One validated road feature
#[derive(Debug, Clone, PartialEq)]
pub struct RoadFeature {
    pub id: i64,
    pub geometry: RoadLine,
    pub kind: RoadKind,
    /// Scenario overrides apply to this road
    pub adjustable: bool,
    /// `None` for unrecognized classes
    pub traffic: Option<TrafficProfile>,
}

impl RoadFeature {
    pub fn with_geometry(&self, geometry: RoadLine) -> Self {
        Self {
            geometry,
            ..self.clone()
        }
    }

    fn from_feature(index: usize, feature: &Value) -> Result<Self> {
        let empty = Map::new();
        let properties = feature
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let geometry = feature
            .get("geometry")
            .ok_or_else(|| NoiseError::validation(format!("road {} has no geometry", index)))?;

        let id = properties
            .get("id")
            .and_then(number)
            .map(|id| id as i64)
            .unwrap_or(index as i64);
        let geometry = geometry::parse_road_line(geometry)?;

        let class_name = properties
            .get("road_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = match RoadClass::from_name(class_name) {
            Some(class) => RoadKind::Known(class),
            None => RoadKind::Unrecognized(class_name.to_string()),
        };

        let traffic = match &kind {
            RoadKind::Known(class) if class.is_rail() => Some(TrafficProfile::Rail {
                train_speed: required_number(properties, id, "train_speed")?,
                trains_per_hour: required_number(properties, id, "trains_per_hour")?,
                ground_type: required_number(properties, id, "ground_type")? as i64,
                has_anti_vibration: properties
                    .get("has_anti_vibration")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            RoadKind::Known(_) => Some(TrafficProfile::Car {
                car_daily: required_number(properties, id, "car_traffic_daily")?,
                truck_daily: required_number(properties, id, "truck_traffic_daily")?,
                max_speed: required_number(properties, id, "max_speed")?,
            }),
            RoadKind::Unrecognized(_) => None,
        };

        Ok(Self {
            id,
            geometry,
            kind,
            adjustable: properties
                .get("traffic_settings_adjustable")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            traffic,
        })
    }
}

/// Numbers may arrive as JSON numbers or numeric strings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required_number(properties: &Map<String, Value>, road_id: i64, field: &str) -> Result<f64> {
    properties.get(field).and_then(number).ok_or_else(|| {
        NoiseError::validation(format!(
            "road {} is missing numeric property '{}'",
            road_id, field
        ))
    })
}

/// Scenario-wide traffic overrides
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrafficSettings {
    pub max_speed: Option<f64>,
    pub traffic_quota: Option<f64>,
}

/// Output options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputOptions {
    pub format: ResultFormat,
    pub clip_to_buildings: bool,
}

/// Validated, fingerprinted scenario (WGS84 geometry)
#[derive(Debug, Clone)]
pub struct Scenario {
    pub buildings: Vec<Polygon<f64>>,
    pub roads: Vec<RoadFeature>,
    pub traffic: TrafficSettings,
    pub output: OutputOptions,
    pub fingerprint: Fingerprint,
}

impl Scenario {
    pub fn from_input(input: &CalculationInput) -> Result<Self> {
        check_range("max_speed", input.max_speed, MAX_SPEED_RANGE)?;
        check_range("traffic_quota", input.traffic_quota, TRAFFIC_QUOTA_RANGE)?;

        let buildings = features(&input.buildings, "buildings")?
            .iter()
            .enumerate()
            .map(|(i, feature)| {
                let geometry = feature.get("geometry").ok_or_else(|| {
                    NoiseError::validation(format!("building {} has no geometry", i))
                })?;
                geometry::parse_polygon(geometry)
            })
            .collect::<Result<Vec<_>>>()?;

        let roads = features(&input.roads, "roads")?
            .iter()
            .enumerate()
            .map(|(i, feature)| RoadFeature::from_feature(i, feature))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            buildings,
            roads,
            traffic: TrafficSettings {
                max_speed: input.max_speed.map(|v| v as f64),
                traffic_quota: input.traffic_quota.map(|v| v as f64),
            },
            output: OutputOptions {
                format: input.result_format,
                clip_to_buildings: input.clip_to_buildings,
            },
            fingerprint: Fingerprint::compute(
                &input.buildings,
                &input.roads,
                &input.scenario_params(),
            ),
        })
    }
}

fn check_range(field: &str, value: Option<i64>, (min, max): (i64, i64)) -> Result<()> {
    match value {
        Some(v) if v < min || v > max => Err(NoiseError::validation(format!(
            "{} must be within {}..={}, got {}",
            field, min, max, v
        ))),
        _ => Ok(()),
    }
}

fn features<'a>(collection: &'a Value, name: &str) -> Result<&'a Vec<Value>> {
    collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| NoiseError::validation(format!("{} must be a FeatureCollection", name)))
}
