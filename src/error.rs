use thiserror::Error;

/// Link-wide error type
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Signaling transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Negotiation failed [{step}]: {reason}")]
    NegotiationFailure { step: NegotiationStep, reason: String },

    #[error("Send failed: {0}")]
    SendFailure(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Negotiation step that produced a [`LinkError::NegotiationFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    CreatePeer,
    CreateOffer,
    SetRemoteDescription,
    AddCandidate,
}

impl std::fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationStep::CreatePeer => write!(f, "create-peer"),
            NegotiationStep::CreateOffer => write!(f, "create-offer"),
            NegotiationStep::SetRemoteDescription => write!(f, "set-remote-description"),
            NegotiationStep::AddCandidate => write!(f, "add-candidate"),
        }
    }
}

impl LinkError {
    pub fn negotiation(step: NegotiationStep, reason: impl std::fmt::Display) -> Self {
        Self::NegotiationFailure {
            step,
            reason: reason.to_string(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_message() {
        let err = LinkError::negotiation(NegotiationStep::AddCandidate, "bad candidate");
        assert_eq!(
            err.to_string(),
            "Negotiation failed [add-candidate]: bad candidate"
        );
    }
}
