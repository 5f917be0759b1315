//! Peer session state machine
//!
//! ```text
//!   Idle --signaling open--> Negotiating --channel open--> Open
//!                                 |                         |
//!                                 +--failed/disconnected----+--> Failed
//!                                 +--channel closed---------+
//!   any --local teardown--> Closed
//! ```
//!
//! Transitions are a pure function of `(state, signal)`; the side effects
//! they request are carried out by the bridge actor. Everything that awaits
//! the WebRTC stack runs on a per-peer worker task that executes operations
//! in submission order and reports back through a [`PeerEventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::signaling::IceCandidate;
use crate::error::{LinkError, NegotiationStep, Result};
use crate::events::StopSource;

/// Peer connection state as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Peer session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating,
    Open,
    Failed,
    Closed,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Idle => write!(f, "idle"),
            PeerState::Negotiating => write!(f, "negotiating"),
            PeerState::Open => write!(f, "open"),
            PeerState::Failed => write!(f, "failed"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

/// Input to the peer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSignal {
    /// Signaling transport is open; start negotiating
    SignalingOpen,
    /// DataChannel reported open
    ChannelOpen,
    /// Peer connection state change
    Connection(ConnectionState),
    /// DataChannel closed without a local teardown
    ChannelClosed,
    /// Remote peer sent `bye`
    RemoteLeft,
    /// Peer creation, offer or remote description failed
    NegotiationFailed,
    /// Explicit local teardown
    LocalTeardown,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEffect {
    /// Create the peer connection and send a local offer
    Negotiate,
    MarkReady,
    MarkNotReady,
    StopRequest(StopSource),
    ScheduleRestart,
}

fn fail(source: Option<StopSource>) -> (PeerState, Vec<PeerEffect>) {
    let mut effects = vec![PeerEffect::MarkNotReady];
    if let Some(source) = source {
        effects.push(PeerEffect::StopRequest(source));
    }
    effects.push(PeerEffect::ScheduleRestart);
    (PeerState::Failed, effects)
}

/// Apply one signal to a state
pub fn transition(state: PeerState, signal: PeerSignal) -> (PeerState, Vec<PeerEffect>) {
    use PeerSignal::*;
    use PeerState::*;

    match (state, signal) {
        (Closed, _) => (Closed, vec![]),
        (_, LocalTeardown) => (Closed, vec![PeerEffect::MarkNotReady]),

        (Idle, SignalingOpen) => (Negotiating, vec![PeerEffect::Negotiate]),
        (Negotiating, ChannelOpen) => (Open, vec![PeerEffect::MarkReady]),

        (Negotiating | Open, Connection(ConnectionState::Failed | ConnectionState::Disconnected)) => {
            fail(Some(StopSource::ConnectionState))
        }
        (Idle | Negotiating | Open, ChannelClosed) => fail(Some(StopSource::ChannelClose)),
        (Idle | Negotiating | Open, RemoteLeft) => fail(Some(StopSource::ConnectionState)),
        (Negotiating, NegotiationFailed) => fail(None),

        (state, _) => (state, vec![]),
    }
}

/// Event raised by a peer backend's observers
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Locally discovered candidate; `None` when gathering is complete
    LocalCandidate(Option<IceCandidate>),
    Connection(ConnectionState),
    ChannelOpen,
    ChannelClosed,
}

/// Notice delivered to the owner of a peer session
pub enum PeerNotice {
    Event(PeerEvent),
    Created(Arc<dyn PeerBackend>),
    LocalOffer(String),
    RemoteDescriptionSet,
    NegotiationFailed(LinkError),
    CandidateRejected(LinkError),
    SendFailed(LinkError),
}

impl std::fmt::Debug for PeerNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerNotice::Event(e) => f.debug_tuple("Event").field(e).finish(),
            PeerNotice::Created(_) => write!(f, "Created"),
            PeerNotice::LocalOffer(_) => write!(f, "LocalOffer"),
            PeerNotice::RemoteDescriptionSet => write!(f, "RemoteDescriptionSet"),
            PeerNotice::NegotiationFailed(e) => f.debug_tuple("NegotiationFailed").field(e).finish(),
            PeerNotice::CandidateRejected(e) => f.debug_tuple("CandidateRejected").field(e).finish(),
            PeerNotice::SendFailed(e) => f.debug_tuple("SendFailed").field(e).finish(),
        }
    }
}

/// Delivery handle bound to one peer generation
#[derive(Clone)]
pub struct PeerEventSink {
    deliver: Arc<dyn Fn(PeerNotice) + Send + Sync>,
}

impl PeerEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(PeerNotice) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Report an observer event
    pub fn emit(&self, event: PeerEvent) {
        (self.deliver)(PeerNotice::Event(event));
    }

    pub(crate) fn notice(&self, notice: PeerNotice) {
        (self.deliver)(notice);
    }
}

/// One peer connection with its single DataChannel
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Create a local offer, set it as the local description, return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Set the remote answer
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Forward end-of-candidates when the stack supports it
    async fn end_of_candidates(&self) -> Result<()> {
        Ok(())
    }

    /// Send one text message on the DataChannel
    async fn send_text(&self, text: String) -> Result<()>;

    fn is_channel_open(&self) -> bool;

    /// Replace every observer with a no-op
    fn detach_handlers(&self);

    async fn close_channel(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer backends
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a peer connection and its DataChannel with observers wired to `sink`
    async fn create(&self, session_id: &str, sink: PeerEventSink) -> Result<Arc<dyn PeerBackend>>;
}

/// Operation executed by the peer worker, in submission order
#[derive(Debug, Clone, PartialEq)]
pub enum PeerOp {
    CreateOffer,
    ApplyAnswer(String),
    AddCandidate(IceCandidate),
    EndOfCandidates,
    Send(String),
}

async fn run_worker(
    factory: Arc<dyn PeerFactory>,
    session_id: String,
    sink: PeerEventSink,
    mut ops: mpsc::UnboundedReceiver<PeerOp>,
) {
    let backend = match factory.create(&session_id, sink.clone()).await {
        Ok(backend) => backend,
        Err(e) => {
            sink.notice(PeerNotice::NegotiationFailed(match e {
                e @ LinkError::NegotiationFailure { .. } => e,
                e => LinkError::negotiation(NegotiationStep::CreatePeer, e),
            }));
            return;
        }
    };
    sink.notice(PeerNotice::Created(backend.clone()));

    while let Some(op) = ops.recv().await {
        match op {
            PeerOp::CreateOffer => match backend.create_offer().await {
                Ok(sdp) => sink.notice(PeerNotice::LocalOffer(sdp)),
                Err(e) => sink.notice(PeerNotice::NegotiationFailed(e)),
            },
            PeerOp::ApplyAnswer(sdp) => match backend.apply_answer(sdp).await {
                Ok(()) => sink.notice(PeerNotice::RemoteDescriptionSet),
                Err(e) => sink.notice(PeerNotice::NegotiationFailed(e)),
            },
            PeerOp::AddCandidate(candidate) => {
                if let Err(e) = backend.add_candidate(candidate).await {
                    sink.notice(PeerNotice::CandidateRejected(e));
                }
            }
            PeerOp::EndOfCandidates => {
                if let Err(e) = backend.end_of_candidates().await {
                    debug!("Ignoring end-of-candidates error: {}", e);
                }
            }
            PeerOp::Send(text) => {
                if let Err(e) = backend.send_text(text).await {
                    sink.notice(PeerNotice::SendFailed(e));
                }
            }
        }
    }

    debug!("Peer {} worker stopped", session_id);
}

/// The one peer session of a connection session
pub struct PeerSession {
    generation: u64,
    session_id: String,
    state: PeerState,
    ops: Option<mpsc::UnboundedSender<PeerOp>>,
    backend: Option<Arc<dyn PeerBackend>>,
}

impl PeerSession {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            session_id: uuid::Uuid::new_v4().to_string(),
            state: PeerState::Idle,
            ops: None,
            backend: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Apply a signal and return the requested effects
    pub fn handle(&mut self, signal: PeerSignal) -> Vec<PeerEffect> {
        let (next, effects) = transition(self.state, signal);
        if next != self.state {
            info!(
                "Peer {} state: {} -> {} ({:?})",
                self.session_id, self.state, next, signal
            );
            self.state = next;
        }
        effects
    }

    /// Spawn the worker and queue the local offer
    pub fn start(&mut self, factory: Arc<dyn PeerFactory>, sink: PeerEventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(PeerOp::CreateOffer);
        self.ops = Some(tx);
        tokio::spawn(run_worker(factory, self.session_id.clone(), sink, rx));
    }

    pub fn attach_backend(&mut self, backend: Arc<dyn PeerBackend>) {
        self.backend = Some(backend);
    }

    /// Queue an operation; `false` when the worker is gone
    pub fn submit(&self, op: PeerOp) -> bool {
        match &self.ops {
            Some(tx) => tx.send(op).is_ok(),
            None => false,
        }
    }

    pub fn is_channel_open(&self) -> bool {
        self.backend
            .as_ref()
            .map(|b| b.is_channel_open())
            .unwrap_or(false)
    }

    /// Detach observers, then close the channel and the connection
    ///
    /// Each step runs regardless of the others failing.
    pub async fn teardown(&mut self) {
        self.handle(PeerSignal::LocalTeardown);
        self.ops = None;

        if let Some(backend) = self.backend.take() {
            close_backend(&self.session_id, backend).await;
        }
    }
}

/// Release a backend: observers first, then channel, then connection
pub async fn close_backend(session_id: &str, backend: Arc<dyn PeerBackend>) {
    backend.detach_handlers();
    if let Err(e) = backend.close_channel().await {
        debug!("Ignoring channel close error on peer {}: {}", session_id, e);
    }
    if let Err(e) = backend.close().await {
        warn!("Failed to close peer connection {}: {}", session_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_path() {
        let (state, effects) = transition(PeerState::Idle, PeerSignal::SignalingOpen);
        assert_eq!(state, PeerState::Negotiating);
        assert_eq!(effects, vec![PeerEffect::Negotiate]);

        let (state, effects) = transition(state, PeerSignal::ChannelOpen);
        assert_eq!(state, PeerState::Open);
        assert_eq!(effects, vec![PeerEffect::MarkReady]);
    }

    #[test]
    fn test_connected_state_does_not_mark_ready() {
        let (state, effects) = transition(
            PeerState::Negotiating,
            PeerSignal::Connection(ConnectionState::Connected),
        );
        assert_eq!(state, PeerState::Negotiating);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_connection_failure() {
        for from in [PeerState::Negotiating, PeerState::Open] {
            for cs in [ConnectionState::Failed, ConnectionState::Disconnected] {
                let (state, effects) = transition(from, PeerSignal::Connection(cs));
                assert_eq!(state, PeerState::Failed);
                assert_eq!(
                    effects,
                    vec![
                        PeerEffect::MarkNotReady,
                        PeerEffect::StopRequest(StopSource::ConnectionState),
                        PeerEffect::ScheduleRestart,
                    ]
                );
            }
        }
    }

    #[test]
    fn test_repeated_failure_is_quiet() {
        let (state, effects) = transition(
            PeerState::Failed,
            PeerSignal::Connection(ConnectionState::Failed),
        );
        assert_eq!(state, PeerState::Failed);
        assert!(effects.is_empty());

        let (_, effects) = transition(PeerState::Failed, PeerSignal::ChannelClosed);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_channel_close() {
        let (state, effects) = transition(PeerState::Open, PeerSignal::ChannelClosed);
        assert_eq!(state, PeerState::Failed);
        assert!(effects.contains(&PeerEffect::StopRequest(StopSource::ChannelClose)));
        assert!(effects.contains(&PeerEffect::ScheduleRestart));
    }

    #[test]
    fn test_negotiation_failure_has_no_stop_request() {
        let (state, effects) = transition(PeerState::Negotiating, PeerSignal::NegotiationFailed);
        assert_eq!(state, PeerState::Failed);
        assert_eq!(
            effects,
            vec![PeerEffect::MarkNotReady, PeerEffect::ScheduleRestart]
        );
    }

    #[test]
    fn test_closed_is_terminal() {
        let (state, _) = transition(PeerState::Open, PeerSignal::LocalTeardown);
        assert_eq!(state, PeerState::Closed);

        for signal in [
            PeerSignal::SignalingOpen,
            PeerSignal::ChannelOpen,
            PeerSignal::ChannelClosed,
            PeerSignal::Connection(ConnectionState::Failed),
        ] {
            assert_eq!(
                transition(PeerState::Closed, signal),
                (PeerState::Closed, vec![])
            );
        }
    }

    struct Recording {
        steps: std::sync::Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl PeerBackend for Recording {
        async fn create_offer(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn apply_answer(&self, _sdp: String) -> Result<()> {
            Ok(())
        }
        async fn add_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn send_text(&self, _text: String) -> Result<()> {
            Ok(())
        }
        fn is_channel_open(&self) -> bool {
            false
        }
        fn detach_handlers(&self) {
            self.steps.lock().unwrap().push("detach");
        }
        async fn close_channel(&self) -> Result<()> {
            self.steps.lock().unwrap().push("close_channel");
            Err(LinkError::WebRtc("already closed".into()))
        }
        async fn close(&self) -> Result<()> {
            self.steps.lock().unwrap().push("close");
            Ok(())
        }
    }

    #[test]
    fn test_close_backend_runs_every_step() {
        let backend = Arc::new(Recording {
            steps: std::sync::Mutex::new(Vec::new()),
        });

        tokio_test::block_on(close_backend("test", backend.clone()));

        assert_eq!(
            *backend.steps.lock().unwrap(),
            vec!["detach", "close_channel", "close"]
        );
    }

    #[test]
    fn test_channel_open_after_failure_ignored() {
        let (state, effects) = transition(PeerState::Failed, PeerSignal::ChannelOpen);
        assert_eq!(state, PeerState::Failed);
        assert!(effects.is_empty());
    }
}
