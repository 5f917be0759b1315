use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::telemetry::Hand;

/// Main link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Signaling relay address (ws:// or wss://)
    pub signaling_url: String,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
    /// Telemetry sampling settings
    pub telemetry: TelemetryConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8442".to_string(),
            webrtc: WebRtcConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Check the values that would otherwise fail late, deep inside a session
    pub fn validate(&self) -> Result<()> {
        let url = self.signaling_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(LinkError::Config(format!(
                "signaling_url must start with ws:// or wss:// (got '{}')",
                self.signaling_url
            )));
        }
        if self.webrtc.channel_name.trim().is_empty() {
            return Err(LinkError::Config("channel_name must not be empty".into()));
        }
        if self.telemetry.interval_ms == 0 {
            return Err(LinkError::Config("telemetry interval_ms must be > 0".into()));
        }
        if self.telemetry.hands.is_empty() {
            return Err(LinkError::Config(
                "telemetry hands must include left and/or right".into(),
            ));
        }
        Ok(())
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// DataChannel label shared with the receiver
    pub channel_name: String,
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Delay before a failed peer session is renegotiated
    pub reconnect_delay_ms: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            channel_name: "controller".to_string(),
            // Empty STUN servers for local connections - host candidates work directly
            stun_servers: vec![],
            turn_servers: vec![],
            reconnect_delay_ms: 1500,
        }
    }
}

impl WebRtcConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Telemetry sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampling interval in milliseconds (20 ms is about 50 Hz)
    pub interval_ms: u64,
    /// Hands included in each payload
    pub hands: BTreeSet<Hand>,
    /// How long the menu button must be held to request a stop
    pub menu_hold_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20,
            hands: [Hand::Left, Hand::Right].into_iter().collect(),
            menu_hold_ms: 800,
        }
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn menu_hold(&self) -> Duration {
        Duration::from_millis(self.menu_hold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.webrtc.channel_name, "controller");
        assert_eq!(config.webrtc.reconnect_delay(), Duration::from_millis(1500));
        assert_eq!(config.telemetry.interval_ms, 20);
        assert_eq!(config.telemetry.hands.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig = serde_json::from_str(
            r#"{"signaling_url":"wss://relay.local/ws","webrtc":{"stun_servers":["stun:stun.l.google.com:19302"]}}"#,
        )
        .unwrap();

        assert_eq!(config.signaling_url, "wss://relay.local/ws");
        assert_eq!(config.webrtc.stun_servers.len(), 1);
        assert_eq!(config.webrtc.channel_name, "controller");
        assert_eq!(config.telemetry.menu_hold_ms, 800);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LinkConfig::default();
        config.signaling_url = "http://relay".into();
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));

        let mut config = LinkConfig::default();
        config.telemetry.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.telemetry.hands.clear();
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.webrtc.channel_name = "  ".into();
        assert!(config.validate().is_err());
    }
}
