//! Controller telemetry model and sampling

mod sampler;
mod types;

pub use sampler::{MenuHoldDetector, PoseSource, SamplerExit, TelemetrySampler};
pub use types::{ControllerState, Hand, Position, Quaternion, TelemetryPayload};
