// Stage implementations
pub mod buildings;
pub mod contouring;
pub mod propagation;
pub mod roads;
pub mod sources;

// Re-exports
pub use buildings::BuildingsStage;
pub use contouring::{ContouringStage, ExportStage};
pub use propagation::PropagationGridStage;
pub use roads::{RoadGeometryStage, TrafficStage};
pub use sources::{DirectionalDuplicationStage, SourcePowerStage, SpectrumRepartitionStage};

use crate::pipeline::StageHandler;
use std::sync::Arc;

/// One handler per stage, in pipeline order
pub fn default_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(BuildingsStage),
        Arc::new(RoadGeometryStage),
        Arc::new(TrafficStage),
        Arc::new(DirectionalDuplicationStage),
        Arc::new(SourcePowerStage),
        Arc::new(SpectrumRepartitionStage),
        Arc::new(PropagationGridStage),
        Arc::new(ContouringStage),
        Arc::new(ExportStage),
    ]
}
