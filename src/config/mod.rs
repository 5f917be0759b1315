//! Link configuration
//!
//! Defaults, an optional JSON file, and CLI overrides applied by the binary.

mod schema;
mod store;

pub use schema::{LinkConfig, TelemetryConfig, TurnServer, WebRtcConfig};
pub use store::{load_file, load_or_default};
