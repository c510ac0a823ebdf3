//! Domain models - core positioning types and pure algorithms
//!
//! - `types` - readings, gateways, areas, positions, dwell sessions
//! - `geometry` - orientation, segment intersection, point-in-polygon
//! - `error` - per-record error taxonomy and run diagnostics

pub mod error;
pub mod geometry;
pub mod types;

// Re-export commonly used types at module level
pub use error::{Diagnostics, DiagnosticsSummary, PipelineError, PositioningError};
pub use types::{
    Area, AreaAssignment, AreaId, BeaconId, DwellSession, Gateway, GatewayId, GatewayMap,
    GatewayReading, Point, Position, RunMode,
};
