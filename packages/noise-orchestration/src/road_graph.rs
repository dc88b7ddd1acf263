//! Road graph construction
//!
//! Turns normalized road features into a deduplicated node list and one
//! directed edge per road carrying its traffic attributes. The graph is a
//! plain value owned by the job that built it.

use crate::error::{NoiseError, Result};
use crate::geometry::RoadLine;
use crate::scenario::{RoadClass, RoadFeature, RoadKind, TrafficProfile, TrafficSettings};
use crate::statement::{Statement, TrafficRow};
use geo::Coord;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Share of the daily car traffic in the peak hour
pub const CAR_PEAK_HOUR_SHARE: f64 = 0.11;
/// Share of the daily truck traffic in the peak hour
pub const TRUCK_PEAK_HOUR_SHARE: f64 = 0.08;

pub const LOAD_SPEED_FACTOR: f64 = 0.9;
pub const JUNCTION_SPEED_FACTOR: f64 = 0.85;

/// Road endpoint not present in the node list
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Road {road_id}: endpoint ({x}, {y}) does not match any graph node")]
pub struct GraphResolutionError {
    pub road_id: i64,
    pub x: f64,
    pub y: f64,
}

/// Graph node (projected coordinate)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub x: f64,
    pub y: f64,
}

/// Exact-coordinate node index in first-seen order
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<Node>,
    index: HashMap<(u64, u64), usize>,
}

fn coord_key(c: Coord<f64>) -> (u64, u64) {
    // -0.0 and 0.0 are the same coordinate
    let bits = |v: f64| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
    (bits(c.x), bits(c.y))
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a coordinate unless an identical one exists; returns its index
    pub fn insert(&mut self, c: Coord<f64>) -> usize {
        let next = self.nodes.len();
        let idx = *self.index.entry(coord_key(c)).or_insert(next);
        if idx == next {
            self.nodes.push(Node { x: c.x, y: c.y });
        }
        idx
    }

    pub fn resolve(&self, c: Coord<f64>) -> Option<usize> {
        self.index.get(&coord_key(c)).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// Class-specific traffic attributes of an edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeAttributes {
    Car {
        max_speed: f64,
        load_speed: f64,
        junction_speed: f64,
        /// Peak-hour light vehicles
        light_vehicles: i64,
        /// Peak-hour heavy vehicles
        heavy_vehicles: i64,
    },
    Rail {
        train_speed: f64,
        trains_per_hour: f64,
        ground_type: i64,
        has_anti_vibration: bool,
    },
}

/// A road before its endpoints are resolved to nodes
#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub road_id: i64,
    pub class: RoadClass,
    pub geometry: RoadLine,
    pub start: Coord<f64>,
    pub end: Coord<f64>,
    pub attributes: EdgeAttributes,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub road_id: i64,
    pub node_from: usize,
    pub node_to: usize,
    pub class: RoadClass,
    pub geometry: RoadLine,
    pub attributes: EdgeAttributes,
}

#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    nodes: NodeSet,
    edges: Vec<Edge>,
}

impl RoadGraph {
    /// Resolve segment endpoints against a node set
    pub fn connect(
        nodes: NodeSet,
        segments: Vec<RoadSegment>,
    ) -> std::result::Result<Self, GraphResolutionError> {
        let resolve = |road_id: i64, c: Coord<f64>| {
            nodes.resolve(c).ok_or(GraphResolutionError {
                road_id,
                x: c.x,
                y: c.y,
            })
        };

        let edges = segments
            .into_iter()
            .map(|segment| -> std::result::Result<Edge, GraphResolutionError> {
                Ok(Edge {
                    node_from: resolve(segment.road_id, segment.start)?,
                    node_to: resolve(segment.road_id, segment.end)?,
                    road_id: segment.road_id,
                    class: segment.class,
                    geometry: segment.geometry,
                    attributes: segment.attributes,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { nodes, edges })
    }

    pub fn nodes(&self) -> &[Node] {
        self.nodes.nodes()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Geometry + class rows, one per edge
    pub fn geometry_statements(&self) -> Vec<Statement> {
        self.edges
            .iter()
            .map(|edge| Statement::InsertRoadGeometry {
                wkt: edge.geometry.to_wkt_z(),
                num: edge.road_id,
                node_from: edge.node_from,
                node_to: edge.node_to,
                road_type: edge.class.code(),
            })
            .collect()
    }

    /// Traffic or rail rows, one per directed node pair
    pub fn traffic_statements(&self) -> Vec<Statement> {
        self.edges
            .iter()
            .map(|edge| {
                Statement::InsertRoadTraffic(TrafficRow {
                    node_from: edge.node_from,
                    node_to: edge.node_to,
                    attributes: edge.attributes.clone(),
                })
            })
            .collect()
    }
}

/// Builds a `RoadGraph` from normalized roads
pub struct RoadGraphBuilder {
    settings: TrafficSettings,
}

impl RoadGraphBuilder {
    pub fn new(settings: TrafficSettings) -> Self {
        Self { settings }
    }

    pub fn build(&self, roads: &[RoadFeature]) -> Result<RoadGraph> {
        let mut segments = Vec::with_capacity(roads.len());

        for road in roads {
            let class = match &road.kind {
                RoadKind::Known(class) => *class,
                RoadKind::Unrecognized(name) => {
                    warn!(road_id = road.id, road_type = %name, "no matching noise road type, road skipped");
                    continue;
                }
            };

            let (start, end) = road.geometry.endpoints().ok_or_else(|| {
                NoiseError::validation(format!("road {} has an empty geometry", road.id))
            })?;

            segments.push(RoadSegment {
                road_id: road.id,
                class,
                geometry: road.geometry.clone(),
                start,
                end,
                attributes: self.attributes(road, class)?,
            });
        }

        let mut nodes = NodeSet::new();
        for segment in &segments {
            nodes.insert(segment.start);
            nodes.insert(segment.end);
        }

        let graph = RoadGraph::connect(nodes, segments)?;
        debug!(
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            "built road graph"
        );
        Ok(graph)
    }

    fn attributes(&self, road: &RoadFeature, class: RoadClass) -> Result<EdgeAttributes> {
        match (&road.traffic, class.is_rail()) {
            (
                Some(TrafficProfile::Car {
                    car_daily,
                    truck_daily,
                    max_speed,
                }),
                false,
            ) => {
                let (mut car_daily, mut truck_daily, mut max_speed) =
                    (*car_daily, *truck_daily, *max_speed);

                if road.adjustable {
                    if let Some(speed) = self.settings.max_speed {
                        max_speed = speed;
                    }
                    if let Some(quota) = self.settings.traffic_quota {
                        car_daily *= quota / 100.0;
                        truck_daily *= quota / 100.0;
                    }
                }

                Ok(EdgeAttributes::Car {
                    max_speed,
                    load_speed: max_speed * LOAD_SPEED_FACTOR,
                    junction_speed: max_speed * JUNCTION_SPEED_FACTOR,
                    light_vehicles: peak_hour(car_daily, CAR_PEAK_HOUR_SHARE),
                    heavy_vehicles: peak_hour(truck_daily, TRUCK_PEAK_HOUR_SHARE),
                })
            }
            (
                Some(TrafficProfile::Rail {
                    train_speed,
                    trains_per_hour,
                    ground_type,
                    has_anti_vibration,
                }),
                true,
            ) => Ok(EdgeAttributes::Rail {
                train_speed: *train_speed,
                trains_per_hour: *trains_per_hour,
                ground_type: *ground_type,
                has_anti_vibration: *has_anti_vibration,
            }),
            _ => Err(NoiseError::validation(format!(
                "road {} has traffic attributes that do not match its class",
                road.id
            ))),
        }
    }
}

/// trunc(trunc(daily) * share)
fn peak_hour(daily: f64, share: f64) -> i64 {
    (daily.trunc() * share).trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, LineString};

    fn car_road(id: i64, coords: Vec<(f64, f64)>, adjustable: bool) -> RoadFeature {
        RoadFeature {
            id,
            geometry: RoadLine::Line(LineString::from(coords)),
            kind: RoadKind::Known(RoadClass::Boulevard),
            adjustable,
            traffic: Some(TrafficProfile::Car {
                car_daily: 1000.0,
                truck_daily: 200.0,
                max_speed: 50.0,
            }),
        }
    }

    #[test]
    fn test_node_set_first_seen_order() {
        let mut nodes = NodeSet::new();
        assert_eq!(nodes.insert(coord! { x: 1.0, y: 1.0 }), 0);
        assert_eq!(nodes.insert(coord! { x: 2.0, y: 2.0 }), 1);
        assert_eq!(nodes.insert(coord! { x: 1.0, y: 1.0 }), 0);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.nodes()[1], Node { x: 2.0, y: 2.0 });
    }

    #[test]
    fn test_negative_zero_is_same_node() {
        let mut nodes = NodeSet::new();
        nodes.insert(coord! { x: 0.0, y: 5.0 });
        assert_eq!(nodes.resolve(coord! { x: -0.0, y: 5.0 }), Some(0));
    }

    #[test]
    fn test_boulevard_with_overrides() {
        let builder = RoadGraphBuilder::new(TrafficSettings {
            max_speed: Some(30.0),
            traffic_quota: Some(50.0),
        });

        let graph = builder
            .build(&[car_road(1, vec![(0.0, 0.0), (10.0, 0.0)], true)])
            .unwrap();

        assert_eq!(
            graph.edges()[0].attributes,
            EdgeAttributes::Car {
                max_speed: 30.0,
                load_speed: 27.0,
                junction_speed: 25.5,
                light_vehicles: 55,
                heavy_vehicles: 8,
            }
        );
    }

    #[test]
    fn test_overrides_ignored_for_fixed_roads() {
        let builder = RoadGraphBuilder::new(TrafficSettings {
            max_speed: Some(30.0),
            traffic_quota: Some(50.0),
        });

        let graph = builder
            .build(&[car_road(1, vec![(0.0, 0.0), (10.0, 0.0)], false)])
            .unwrap();

        match &graph.edges()[0].attributes {
            EdgeAttributes::Car {
                max_speed,
                light_vehicles,
                heavy_vehicles,
                ..
            } => {
                assert_eq!(*max_speed, 50.0);
                assert_eq!(*light_vehicles, 110);
                assert_eq!(*heavy_vehicles, 16);
            }
            other => panic!("expected car attributes, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_class_skipped() {
        let mut unknown = car_road(2, vec![(5.0, 5.0), (6.0, 6.0)], false);
        unknown.kind = RoadKind::Unrecognized("footpath".to_string());
        unknown.traffic = None;

        let graph = RoadGraphBuilder::new(TrafficSettings::default())
            .build(&[car_road(1, vec![(0.0, 0.0), (1.0, 0.0)], false), unknown])
            .unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.nodes().len(), 2);
    }

    #[test]
    fn test_connect_reports_unresolved_endpoint() {
        let mut nodes = NodeSet::new();
        nodes.insert(coord! { x: 0.0, y: 0.0 });

        let segment = RoadSegment {
            road_id: 9,
            class: RoadClass::Street,
            geometry: RoadLine::Line(LineString::from(vec![(0.0, 0.0), (3.0, 4.0)])),
            start: coord! { x: 0.0, y: 0.0 },
            end: coord! { x: 3.0, y: 4.0 },
            attributes: EdgeAttributes::Rail {
                train_speed: 0.0,
                trains_per_hour: 0.0,
                ground_type: 0,
                has_anti_vibration: false,
            },
        };

        let err = RoadGraph::connect(nodes, vec![segment]).unwrap_err();
        assert_eq!(
            err,
            GraphResolutionError {
                road_id: 9,
                x: 3.0,
                y: 4.0
            }
        );
    }

    #[test]
    fn test_statement_groups() {
        let graph = RoadGraphBuilder::new(TrafficSettings::default())
            .build(&[
                car_road(1, vec![(0.0, 0.0), (1.0, 0.0)], false),
                car_road(2, vec![(1.0, 0.0), (2.0, 0.0)], false),
            ])
            .unwrap();

        let geometry = graph.geometry_statements();
        let traffic = graph.traffic_statements();
        assert_eq!(geometry.len(), 2);
        assert_eq!(traffic.len(), 2);
        assert!(geometry[1]
            .sql()
            .ends_with("ST_GeomFromText('LINESTRING Z (1 0 0, 2 0 0)'), 2, 1, 2, 56)"));
        assert!(traffic[0].sql().starts_with("INSERT INTO roads_traffic"));
    }
}
