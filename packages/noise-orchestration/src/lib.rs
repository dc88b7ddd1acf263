/*
 * Noise Orchestration - traffic noise map job system
 *
 * Turns a scenario (buildings, roads with traffic, speed and volume
 * overrides) into iso-level noise contours computed by an external
 * H2/H2GIS engine process.
 *
 * Architecture:
 * - Fingerprint + result cache (content hash _ scenario hash)
 * - Job state machine (ACCEPTED -> RUNNING -> SUCCESS | FAILURE)
 * - Geometry normalization (EPSG:4326 -> EPSG:25832, z = 0)
 * - Road graph (shared endpoint nodes, per-edge traffic)
 * - Strictly ordered engine stages, one engine session per job
 */

// Public modules
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod geometry;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod road_graph;
pub mod runner;
pub mod scenario;
pub mod sequencer;
pub mod service;
pub mod stages;
pub mod statement;

// Re-exports
pub use config::{CacheBackend, ConfigError, EngineConfig, NoiseConfig, PropagationConfig};
pub use dag::{PipelineDAG, StageNode};
pub use engine::{
    ConnectError, EngineConnection, EngineConnector, EngineLauncher, EngineProcess,
    EngineSession, RetryPolicy,
};
pub use error::{ErrorCategory, NoiseError, Result, ResultError};
pub use fingerprint::{ContentHash, Fingerprint, ScenarioHash};
pub use geometry::{GeometryNormalizer, NormalizedScenario, RoadLine};
pub use job::{Job, JobKind, JobState, JobStateMachine, JobStatus, StageId};
pub use orchestrator::JobOrchestrator;
pub use pipeline::{StageContext, StageHandler, StageInput, StageMetrics};
pub use road_graph::{GraphResolutionError, RoadGraph, RoadGraphBuilder};
pub use runner::{NoisePipeline, ScenarioRunner};
pub use scenario::{CalculationInput, RoadClass, RoadFeature, Scenario, TrafficProfile};
pub use sequencer::{PipelineSequencer, SequencerOutput, StageProgress};
pub use service::build_orchestrator;
pub use statement::Statement;
