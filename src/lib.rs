//! vr-link - VR controller telemetry over WebRTC
//!
//! This crate streams controller poses to a remote peer over a WebRTC
//! DataChannel negotiated through a WebSocket signaling relay.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::{LinkError, Result};
