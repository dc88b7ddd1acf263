//! Deterministic computation fingerprints
//!
//! A fingerprint has two halves:
//! - `ContentHash`: what is being computed on (buildings + roads)
//! - `ScenarioHash`: how (speed/quota overrides, output options)
//!
//! Both are SHA-256 digests over a canonical JSON rendering (sorted object
//! keys, no whitespace). The content hash additionally sorts the feature
//! arrays, so two collections holding the same features in a different
//! order fingerprint identically.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash over the input geometry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

/// Hash over the tunable scenario parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioHash(String);

impl ContentHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ScenarioHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache and coalescing key of a computation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub content: ContentHash,
    pub scenario: ScenarioHash,
}

impl Fingerprint {
    pub fn new(content: ContentHash, scenario: ScenarioHash) -> Self {
        Self { content, scenario }
    }

    /// Fingerprint a scenario from its raw parts
    pub fn compute(buildings: &Value, roads: &Value, scenario_params: &Value) -> Self {
        Self::new(content_hash(buildings, roads), scenario_hash(scenario_params))
    }

    /// `<content-hash>_<scenario-hash>`
    pub fn key(&self) -> String {
        format!("{}_{}", self.content.0, self.scenario.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.content.0, self.scenario.0)
    }
}

pub fn content_hash(buildings: &Value, roads: &Value) -> ContentHash {
    let mut canonical = String::new();
    canonical.push_str("{\"buildings\":");
    canonical.push_str(&canonical_collection(buildings));
    canonical.push_str(",\"roads\":");
    canonical.push_str(&canonical_collection(roads));
    canonical.push('}');

    ContentHash(sha256_hex(&canonical))
}

pub fn scenario_hash(scenario_params: &Value) -> ScenarioHash {
    ScenarioHash(sha256_hex(&to_canonical_json(scenario_params)))
}

/// Canonical form of a feature collection with features in sorted order
fn canonical_collection(collection: &Value) -> String {
    let Some(Value::Array(features)) = collection.get("features") else {
        return to_canonical_json(collection);
    };

    let mut rendered: Vec<String> = features.iter().map(to_canonical_json).collect();
    rendered.sort_unstable();

    let mut tree = BTreeMap::new();
    if let Value::Object(map) = collection {
        for (k, v) in map {
            if k != "features" {
                tree.insert(k.as_str(), to_canonical_json(v));
            }
        }
    }
    tree.insert("features", format!("[{}]", rendered.join(",")));

    render_object(tree)
}

/// Serialize a `Value` with sorted object keys and no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&str, String> = map
                .iter()
                .map(|(k, v)| (k.as_str(), to_canonical_json(v)))
                .collect();
            render_object(tree)
        }
    }
}

fn render_object(tree: BTreeMap<&str, String>) -> String {
    let items: Vec<String> = tree
        .into_iter()
        .map(|(k, v)| format!("{}:{}", Value::from(k), v))
        .collect();
    format!("{{{}}}", items.join(","))
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_primitives() {
        assert_eq!(to_canonical_json(&json!(null)), "null");
        assert_eq!(to_canonical_json(&json!(true)), "true");
        assert_eq!(to_canonical_json(&json!(42)), "42");
        assert_eq!(to_canonical_json(&json!("a\"b")), "\"a\\\"b\"");
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 2, "a": {"d": [1, 2], "c": null}});
        assert_eq!(
            to_canonical_json(&value),
            "{\"a\":{\"c\":null,\"d\":[1,2]},\"b\":2}"
        );
    }

    #[test]
    fn test_key_shape() {
        let fp = Fingerprint::compute(
            &json!({"type": "FeatureCollection", "features": []}),
            &json!({"type": "FeatureCollection", "features": []}),
            &json!({"traffic_settings": {"max_speed": 30, "traffic_quota": 50}}),
        );

        let key = fp.key();
        let (content, scenario) = key.split_once('_').unwrap();
        assert_eq!(content.len(), 64);
        assert_eq!(scenario.len(), 64);
        assert_eq!(content, fp.content.as_str());
        assert_eq!(key, fp.to_string());
    }

    #[test]
    fn test_feature_order_does_not_matter() {
        let a = json!({"type": "Feature", "properties": {"id": 1}});
        let b = json!({"type": "Feature", "properties": {"id": 2}});
        let roads = json!({"type": "FeatureCollection", "features": []});

        let first = content_hash(
            &json!({"type": "FeatureCollection", "features": [a.clone(), b.clone()]}),
            &roads,
        );
        let second = content_hash(
            &json!({"features": [b, a], "type": "FeatureCollection"}),
            &roads,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_buildings_and_roads_are_not_interchangeable() {
        let fc = json!({"type": "FeatureCollection", "features": [{"id": 1}]});
        let empty = json!({"type": "FeatureCollection", "features": []});

        assert_ne!(content_hash(&fc, &empty), content_hash(&empty, &fc));
    }

    #[test]
    fn test_scenario_hash_differs_on_parameters() {
        let slow = scenario_hash(&json!({"traffic_settings": {"max_speed": 30}}));
        let fast = scenario_hash(&json!({"traffic_settings": {"max_speed": 50}}));
        assert_ne!(slow, fast);
    }
}
