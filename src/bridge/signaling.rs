//! Signaling messages and the signaling channel
//!
//! Messages are UTF-8 JSON text with a `type` tag:
//!
//! | type     | fields                                                |
//! |----------|-------------------------------------------------------|
//! | `offer`  | `sdp`                                                 |
//! | `answer` | `sdp`                                                 |
//! | `ice`    | `candidate` (object or flat string) or `endOfCandidates` |
//! | `bye`    | -                                                     |
//! | `error`  | `reason`                                              |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{LinkError, Result};

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }

    /// Fill a missing mid with `default_mid` and a missing mline index with 0
    pub fn with_defaults(mut self, default_mid: &str) -> Self {
        if self.sdp_mid.as_deref().map_or(true, str::is_empty) {
            self.sdp_mid = Some(default_mid.to_string());
        }
        self.sdp_mline_index.get_or_insert(0);
        self
    }
}

/// Signaling message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    /// Trickled candidate, or end-of-candidates when `candidate` is `None`
    Ice {
        #[serde(skip_serializing_if = "Option::is_none")]
        candidate: Option<IceCandidate>,
        #[serde(rename = "endOfCandidates", skip_serializing_if = "std::ops::Not::not")]
        end_of_candidates: bool,
    },
    Bye,
    Error {
        reason: String,
    },
}

impl SignalingMessage {
    pub fn candidate(candidate: IceCandidate) -> Self {
        Self::Ice {
            candidate: Some(candidate),
            end_of_candidates: false,
        }
    }

    pub fn end_of_candidates() -> Self {
        Self::Ice {
            candidate: None,
            end_of_candidates: true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Ice { .. } => "ice",
            Self::Bye => "bye",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one inbound message
    ///
    /// Unknown types and missing required fields are reported as
    /// [`LinkError::ProtocolViolation`] so the caller can log and drop them.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| LinkError::protocol(format!("invalid JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| LinkError::protocol("message is not a JSON object"))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| LinkError::protocol("message missing 'type'"))?;

        match kind {
            "offer" => Ok(Self::Offer {
                sdp: required_str(obj, "sdp", kind)?,
            }),
            "answer" => Ok(Self::Answer {
                sdp: required_str(obj, "sdp", kind)?,
            }),
            "ice" => parse_ice(obj),
            "bye" => Ok(Self::Bye),
            "error" => Ok(Self::Error {
                reason: required_str(obj, "reason", kind)?,
            }),
            other => Err(LinkError::protocol(format!(
                "unsupported message type '{}'",
                other
            ))),
        }
    }
}

fn required_str(obj: &Map<String, Value>, field: &str, kind: &str) -> Result<String> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(LinkError::protocol(format!(
            "{} message missing '{}'",
            kind, field
        ))),
    }
}

fn mline_index(value: Option<&Value>) -> Option<u16> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|i| u16::try_from(i).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn candidate_fields(fields: &Map<String, Value>, candidate: &str) -> SignalingMessage {
    if candidate.is_empty() {
        return SignalingMessage::end_of_candidates();
    }
    SignalingMessage::candidate(IceCandidate {
        candidate: candidate.to_string(),
        sdp_mid: fields
            .get("sdpMid")
            .and_then(Value::as_str)
            .map(str::to_string),
        sdp_mline_index: mline_index(fields.get("sdpMLineIndex")),
        username_fragment: fields
            .get("usernameFragment")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_ice(obj: &Map<String, Value>) -> Result<SignalingMessage> {
    let explicit_end = obj
        .get("endOfCandidates")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if explicit_end {
        return Ok(SignalingMessage::end_of_candidates());
    }

    match obj.get("candidate") {
        // Nested form: {"candidate": {"candidate": "...", "sdpMid": .., "sdpMLineIndex": ..}}
        Some(Value::Object(inner)) => match inner.get("candidate") {
            Some(Value::String(s)) => Ok(candidate_fields(inner, s)),
            // toJSON() of the end-of-candidates marker
            Some(Value::Null) | None => Ok(SignalingMessage::end_of_candidates()),
            Some(_) => Err(LinkError::protocol("ice candidate string has unexpected type")),
        },
        // Flat form: {"candidate": "...", "sdpMid": .., "sdpMLineIndex": ..}
        Some(Value::String(s)) => Ok(candidate_fields(obj, s)),
        Some(Value::Null) => Ok(SignalingMessage::end_of_candidates()),
        None => Err(LinkError::protocol("ice message missing 'candidate'")),
        Some(_) => Err(LinkError::protocol("ice candidate has unexpected shape")),
    }
}

/// Why the signaling transport closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// `true` for an orderly close by the relay, `false` for a transport error
    pub clean: bool,
    pub reason: String,
}

impl CloseReason {
    pub fn clean(reason: impl Into<String>) -> Self {
        Self {
            clean: true,
            reason: reason.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            clean: false,
            reason: reason.into(),
        }
    }
}

/// Inbound signaling event
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Raw text frame, parsed by the receiver
    Message(String),
    /// Transport closed; terminal for the link
    Closed(CloseReason),
}

/// Outbound half of an open signaling transport
pub trait SignalingLink: Send + Sync {
    /// Queue a message for transmission
    fn send(&self, message: &SignalingMessage) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Close the transport; safe to call more than once
    fn close(&self);
}

/// Opens signaling transports to a relay address
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a transport; failure maps to [`LinkError::TransportUnavailable`]
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Box<dyn SignalingLink>, mpsc::UnboundedReceiver<SignalingEvent>)>;
}

/// One open signaling transport with its inbound handler attached
pub struct SignalingChannel {
    link: Box<dyn SignalingLink>,
    forwarder: Option<JoinHandle<()>>,
}

impl SignalingChannel {
    /// Attach `on_event` to every inbound event, in arrival order
    pub fn attach<F>(
        link: Box<dyn SignalingLink>,
        mut events: mpsc::UnboundedReceiver<SignalingEvent>,
        on_event: F,
    ) -> Self
    where
        F: Fn(SignalingEvent) + Send + 'static,
    {
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closed = matches!(event, SignalingEvent::Closed(_));
                on_event(event);
                if closed {
                    break;
                }
            }
        });

        Self {
            link,
            forwarder: Some(forwarder),
        }
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<()> {
        debug!("Signaling -> {}", message.type_name());
        self.link.send(message)
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// Detach the inbound handler, then close the transport
    pub fn close(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.link.close();
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        let msg = SignalingMessage::parse(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Answer { sdp: "v=0".into() });
    }

    #[test]
    fn test_parse_nested_candidate() {
        let msg = SignalingMessage::parse(
            r#"{"type":"ice","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();

        match msg {
            SignalingMessage::Ice {
                candidate: Some(c),
                end_of_candidates: false,
            } => {
                assert!(c.candidate.starts_with("candidate:1"));
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("Expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_flat_candidate() {
        let msg = SignalingMessage::parse(
            r#"{"type":"ice","candidate":"candidate:2 1 udp 1 10.0.0.2 5001 typ host","sdpMLineIndex":"1"}"#,
        )
        .unwrap();

        match msg {
            SignalingMessage::Ice {
                candidate: Some(c), ..
            } => {
                assert_eq!(c.sdp_mid, None);
                assert_eq!(c.sdp_mline_index, Some(1));
            }
            other => panic!("Expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_end_of_candidates() {
        for text in [
            r#"{"type":"ice","candidate":null,"endOfCandidates":true}"#,
            r#"{"type":"ice","endOfCandidates":true}"#,
            r#"{"type":"ice","candidate":""}"#,
            r#"{"type":"ice","candidate":{"candidate":""}}"#,
            r#"{"type":"ice","candidate":null}"#,
            r#"{"type":"ice","candidate":{"candidate":null,"sdpMid":"0","sdpMLineIndex":0}}"#,
            r#"{"type":"ice","candidate":{"sdpMid":"0","sdpMLineIndex":0}}"#,
            r#"{"type":"ice","candidate":{"sdpMid":"0","sdpMLineIndex":0},"endOfCandidates":true}"#,
            r#"{"type":"ice","candidate":42,"endOfCandidates":true}"#,
        ] {
            assert_eq!(
                SignalingMessage::parse(text).unwrap(),
                SignalingMessage::end_of_candidates(),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_parse_violations() {
        for text in [
            "not json",
            r#"["offer"]"#,
            r#"{"sdp":"v=0"}"#,
            r#"{"type":"answer"}"#,
            r#"{"type":"ice"}"#,
            r#"{"type":"error"}"#,
            r#"{"type":"renegotiate"}"#,
        ] {
            assert!(
                matches!(
                    SignalingMessage::parse(text),
                    Err(LinkError::ProtocolViolation(_))
                ),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_serialize_outbound() {
        let offer = SignalingMessage::Offer { sdp: "v=0".into() }.to_json().unwrap();
        assert_eq!(offer, r#"{"type":"offer","sdp":"v=0"}"#);

        let bye = SignalingMessage::Bye.to_json().unwrap();
        assert_eq!(bye, r#"{"type":"bye"}"#);

        let eoc = SignalingMessage::end_of_candidates().to_json().unwrap();
        assert_eq!(eoc, r#"{"type":"ice","endOfCandidates":true}"#);

        let ice = serde_json::to_value(SignalingMessage::candidate(
            IceCandidate::new("candidate:1").with_mid("0", 0),
        ))
        .unwrap();
        assert_eq!(ice["candidate"]["sdpMid"], "0");
        assert!(ice.get("endOfCandidates").is_none());
    }

    #[test]
    fn test_candidate_defaults() {
        let c = IceCandidate::new("candidate:1").with_defaults("controller");
        assert_eq!(c.sdp_mid.as_deref(), Some("controller"));
        assert_eq!(c.sdp_mline_index, Some(0));

        let c = IceCandidate::new("candidate:1")
            .with_mid("0", 2)
            .with_defaults("controller");
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(2));
    }
}
