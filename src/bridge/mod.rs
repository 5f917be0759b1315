//! Connection negotiation and resilience
//!
//! Streams telemetry over a negotiated WebRTC DataChannel, using a signaling
//! relay for session setup.
//!
//! Architecture:
//! ```text
//!  Bridge (handle) --commands--> BridgeActor (single owner task)
//!                                   |      ^
//!                 SignalingChannel <+      | ordered events
//!                   (WebSocket)     |      |
//!                                   +--> PeerSession --ops--> peer worker
//!                                   |      (state machine)     (webrtc)
//!                                   +--> CandidateBuffer
//!                                   +--> ReconnectSupervisor (restart timer)
//! ```
//!
//! Reconnection replaces only the peer session. A closed signaling
//! transport ends the connection session.

pub mod candidates;
pub mod facade;
pub mod peer;
pub mod rtc;
pub mod signaling;
pub mod supervisor;
pub mod ws;

pub use candidates::{CandidateAction, CandidateBuffer};
pub use facade::{Bridge, BridgeSnapshot};
pub use peer::{
    ConnectionState, PeerBackend, PeerEvent, PeerEventSink, PeerFactory, PeerState,
};
pub use rtc::RtcPeerFactory;
pub use signaling::{
    CloseReason, IceCandidate, SignalingConnector, SignalingEvent, SignalingLink,
    SignalingMessage,
};
pub use supervisor::{ReconnectSupervisor, ScheduleOutcome};
pub use ws::WsConnector;
