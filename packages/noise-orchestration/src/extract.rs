//! Result document shaping and optional clipping to the buildings' extent

use crate::geometry::{multipolygon_to_geojson, parse_polygonal};
use geo::{BooleanOps, BoundingRect, MultiPolygon, Polygon, Rect};
use serde_json::{json, Value};
use tracing::debug;

/// Bounding rectangle of the (WGS84) input buildings
pub fn buildings_extent(buildings: &[Polygon<f64>]) -> Option<Rect<f64>> {
    MultiPolygon::new(buildings.to_vec()).bounding_rect()
}

/// Intersect every polygonal feature with `extent`
///
/// Features that end up empty are dropped; non-polygonal features are kept
/// as they are.
pub fn clip_to_extent(document: Value, extent: Rect<f64>) -> Value {
    let mut collection = match document {
        Value::Object(collection) => collection,
        other => return other,
    };
    let features = match collection.remove("features") {
        Some(Value::Array(features)) => features,
        Some(other) => {
            collection.insert("features".to_string(), other);
            return Value::Object(collection);
        }
        None => return Value::Object(collection),
    };

    let clip = MultiPolygon::new(vec![extent.to_polygon()]);
    let before = features.len();
    let clipped: Vec<Value> = features
        .into_iter()
        .filter_map(|feature| clip_feature(feature, &clip))
        .collect();
    debug!(before, after = clipped.len(), "clipped result features");

    collection.insert("features".to_string(), Value::Array(clipped));
    Value::Object(collection)
}

fn clip_feature(mut feature: Value, clip: &MultiPolygon<f64>) -> Option<Value> {
    let Some(shape) = feature.get("geometry").and_then(parse_polygonal) else {
        return Some(feature);
    };
    let inside = shape.intersection(clip);
    if inside.0.is_empty() {
        return None;
    }
    feature["geometry"] = multipolygon_to_geojson(&inside);
    Some(feature)
}

/// Final result payload stored in the cache and returned to callers
pub fn result_document(geojson: Value) -> Value {
    json!({ "geojson": geojson })
}
