//! Bridge event types
//!
//! Events published to the presentation layer and to the telemetry sampler.

use serde::{Deserialize, Serialize};

/// Status tone shown next to the status label
///
/// A missing tone means "disconnected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTone {
    Connecting,
    Connected,
}

/// Coarse connection phase reported to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl LinkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LinkStatus::Connecting => "Connecting…",
            LinkStatus::Connected => "Connected",
            LinkStatus::Disconnected => "Disconnected",
        }
    }

    pub fn tone(&self) -> Option<StatusTone> {
        match self {
            LinkStatus::Connecting => Some(StatusTone::Connecting),
            LinkStatus::Connected => Some(StatusTone::Connected),
            LinkStatus::Disconnected => None,
        }
    }
}

/// Why input capture should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopSource {
    /// Signaling transport lost through an I/O or protocol error
    SocketClose,
    /// Relay closed the signaling transport
    SignalingClose,
    /// Peer connection reported failed/disconnected
    ConnectionState,
    /// DataChannel closed unexpectedly
    ChannelClose,
    /// Operator held the controller menu button
    Controller,
}

impl std::fmt::Display for StopSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSource::SocketClose => write!(f, "socket-close"),
            StopSource::SignalingClose => write!(f, "signaling-close"),
            StopSource::ConnectionState => write!(f, "connection-state"),
            StopSource::ChannelClose => write!(f, "channel-close"),
            StopSource::Controller => write!(f, "controller"),
        }
    }
}

/// Bridge event
///
/// Serialized with `event` as the tag and `data` as the payload:
///
/// ```json
/// {
///   "event": "vrbridge.status",
///   "data": { "status": "Connected", "tone": "connected" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum BridgeEvent {
    /// Connection phase changed
    #[serde(rename = "vrbridge.status")]
    StatusChanged {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tone: Option<StatusTone>,
    },

    /// Human-readable log line
    #[serde(rename = "vrbridge.log")]
    Log { message: String },

    /// Input capture should halt
    #[serde(rename = "vrbridge.stop_request")]
    StopRequested { source: StopSource },
}

impl BridgeEvent {
    pub fn status(status: LinkStatus) -> Self {
        Self::StatusChanged {
            status: status.label().to_string(),
            tone: status.tone(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "vrbridge.status",
            Self::Log { .. } => "vrbridge.log",
            Self::StopRequested { .. } => "vrbridge.stop_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(BridgeEvent::status(LinkStatus::Connected)).unwrap();
        assert_eq!(json["event"], "vrbridge.status");
        assert_eq!(json["data"]["tone"], "connected");

        let json = serde_json::to_value(BridgeEvent::status(LinkStatus::Disconnected)).unwrap();
        assert!(json["data"].get("tone").is_none());
    }

    #[test]
    fn test_status_labels_and_tones() {
        let phases = [
            LinkStatus::Connecting,
            LinkStatus::Connected,
            LinkStatus::Disconnected,
        ];
        let labels: Vec<_> = phases.iter().map(LinkStatus::label).collect();
        assert_eq!(labels, vec!["Connecting…", "Connected", "Disconnected"]);
        let tones: Vec<_> = phases.iter().map(LinkStatus::tone).collect();
        assert_eq!(
            tones,
            vec![Some(StatusTone::Connecting), Some(StatusTone::Connected), None]
        );
    }

    #[test]
    fn test_stop_source_names() {
        let event = BridgeEvent::StopRequested {
            source: StopSource::ConnectionState,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["source"], "connection-state");
        assert_eq!(event.event_name(), "vrbridge.stop_request");
        assert_eq!(StopSource::SignalingClose.to_string(), "signaling-close");
    }
}
