//! Bridge facade and its actor
//!
//! [`Bridge`] is a cheap, cloneable handle. Every call is posted to one
//! unbounded queue owned by a single actor task; signaling frames, peer
//! observer callbacks, negotiation completions and restart timers are posted
//! to the same queue. The actor therefore never runs two transitions at once.
//!
//! Stale work is discarded by identity rather than by flags:
//! - signaling events carry the connection session number,
//! - peer notices carry the peer generation,
//! - restart timers carry a timer id checked by the supervisor.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use super::candidates::{CandidateAction, CandidateBuffer};
use super::peer::{
    close_backend, PeerEffect, PeerEvent, PeerEventSink, PeerFactory, PeerNotice, PeerOp,
    PeerSession, PeerSignal, PeerState,
};
use super::rtc::RtcPeerFactory;
use super::signaling::{
    CloseReason, SignalingChannel, SignalingConnector, SignalingEvent, SignalingLink,
    SignalingMessage,
};
use super::supervisor::{ReconnectSupervisor, ScheduleOutcome};
use super::ws::WsConnector;
use crate::config::{LinkConfig, WebRtcConfig};
use crate::error::LinkError;
use crate::events::{BridgeEvent, EventBus, LinkStatus, StopSource};
use crate::telemetry::TelemetryPayload;

/// Point-in-time view of the bridge, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSnapshot {
    pub ready: bool,
    pub should_reconnect: bool,
    pub signaling_open: bool,
    /// Generation of the current peer session, if any
    pub generation: Option<u64>,
    pub peer_state: Option<PeerState>,
    pub buffered_candidates: usize,
    pub restart_pending: bool,
}

enum Input {
    Connect(String),
    Disconnect,
    Send(String),
    Snapshot(oneshot::Sender<BridgeSnapshot>),
    Shutdown(oneshot::Sender<()>),
    SignalingOpened {
        session: u64,
        link: Box<dyn SignalingLink>,
        events: mpsc::UnboundedReceiver<SignalingEvent>,
    },
    SignalingFailed {
        session: u64,
        error: LinkError,
    },
    Signaling {
        session: u64,
        event: SignalingEvent,
    },
    Peer {
        generation: u64,
        notice: PeerNotice,
    },
    RestartDue {
        timer: u64,
    },
}

/// The single object callers touch
///
/// `connect`, `disconnect` and `send` never fail observably; outcomes are
/// reported through the event bus.
#[derive(Clone)]
pub struct Bridge {
    tx: mpsc::UnboundedSender<Input>,
    events: EventBus,
    ready: watch::Receiver<bool>,
}

impl Bridge {
    /// Bridge over WebSocket signaling and the `webrtc` stack
    pub fn new(config: &LinkConfig) -> Self {
        Self::with_backends(
            &config.webrtc,
            Arc::new(WsConnector::new()),
            Arc::new(RtcPeerFactory::new(config.webrtc.clone())),
            EventBus::new(),
        )
    }

    /// Bridge over caller-supplied signaling and peer implementations
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_backends(
        config: &WebRtcConfig,
        connector: Arc<dyn SignalingConnector>,
        factory: Arc<dyn PeerFactory>,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let actor = BridgeActor {
            channel_name: config.channel_name.clone(),
            connector,
            factory,
            events: events.clone(),
            ready_tx,
            inbox: tx.downgrade(),
            session: 0,
            opening: false,
            signaling: None,
            peer: None,
            next_generation: 0,
            answer_received: false,
            candidates: CandidateBuffer::new(),
            supervisor: ReconnectSupervisor::new(config.reconnect_delay()),
            should_reconnect: false,
            ready: false,
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            events,
            ready: ready_rx,
        }
    }

    /// Tear down any live session, then start a new one against `address`
    pub fn connect(&self, address: impl Into<String>) {
        let _ = self.tx.send(Input::Connect(address.into()));
    }

    pub fn disconnect(&self) {
        let _ = self.tx.send(Input::Disconnect);
    }

    /// Transmit one payload if the DataChannel is open; otherwise a no-op
    pub fn send(&self, payload: &TelemetryPayload) {
        if !self.is_ready() {
            return;
        }
        match payload.to_json() {
            Ok(text) => {
                let _ = self.tx.send(Input::Send(text));
            }
            Err(e) => self
                .events
                .log_warn(LinkError::SendFailure(e.to_string()).to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Current state, after every previously posted call has been handled
    pub async fn snapshot(&self) -> Option<BridgeSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Input::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Disconnect and stop the actor
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Input::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct BridgeActor {
    channel_name: String,
    connector: Arc<dyn SignalingConnector>,
    factory: Arc<dyn PeerFactory>,
    events: EventBus,
    ready_tx: watch::Sender<bool>,
    inbox: mpsc::WeakUnboundedSender<Input>,

    /// Connection session number; bumped by connect and disconnect
    session: u64,
    opening: bool,
    signaling: Option<SignalingChannel>,
    peer: Option<PeerSession>,
    next_generation: u64,
    answer_received: bool,
    candidates: CandidateBuffer,
    supervisor: ReconnectSupervisor,
    should_reconnect: bool,
    ready: bool,
}

fn post(inbox: &mpsc::WeakUnboundedSender<Input>, input: Input) {
    if let Some(tx) = inbox.upgrade() {
        let _ = tx.send(input);
    }
}

impl BridgeActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            if !self.handle(input).await {
                debug!("Bridge actor stopped");
                return;
            }
        }

        // Every handle dropped
        if self.is_live() {
            self.disconnect(false).await;
        }
        debug!("Bridge actor stopped");
    }

    /// `false` once the actor should stop
    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Connect(address) => self.connect(address).await,
            Input::Disconnect => self.disconnect(true).await,
            Input::Send(text) => self.send(text),
            Input::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Input::Shutdown(done) => {
                if self.is_live() {
                    self.disconnect(true).await;
                }
                let _ = done.send(());
                return false;
            }
            Input::SignalingOpened {
                session,
                link,
                events,
            } => self.on_signaling_opened(session, link, events),
            Input::SignalingFailed { session, error } => {
                if session == self.session && self.opening {
                    self.opening = false;
                    self.should_reconnect = false;
                    self.events.log_warn(error.to_string());
                    self.events.status(LinkStatus::Disconnected);
                }
            }
            Input::Signaling { session, event } => {
                if session == self.session && self.signaling.is_some() {
                    self.on_signaling(event).await;
                }
            }
            Input::Peer { generation, notice } => self.on_peer(generation, notice).await,
            Input::RestartDue { timer } => self.on_restart_due(timer).await,
        }
        true
    }

    fn is_live(&self) -> bool {
        self.opening || self.signaling.is_some() || self.peer.is_some()
    }

    fn signaling_open(&self) -> bool {
        self.signaling.as_ref().map_or(false, |s| s.is_open())
    }

    fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            ready: self.ready,
            should_reconnect: self.should_reconnect,
            signaling_open: self.signaling_open(),
            generation: self.peer.as_ref().map(|p| p.generation()),
            peer_state: self.peer.as_ref().map(|p| p.state()),
            buffered_candidates: self.candidates.len(),
            restart_pending: self.supervisor.is_pending(),
        }
    }

    fn set_ready(&mut self, ready: bool) {
        if self.ready != ready {
            self.ready = ready;
            self.ready_tx.send_replace(ready);
        }
    }

    async fn connect(&mut self, address: String) {
        if self.is_live() {
            self.disconnect(false).await;
        }

        self.session += 1;
        self.should_reconnect = true;
        self.opening = true;
        self.events.status(LinkStatus::Connecting);
        self.events.log(format!("Connecting to {}", address));

        let session = self.session;
        let connector = self.connector.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let input = match connector.open(&address).await {
                Ok((link, events)) => Input::SignalingOpened {
                    session,
                    link,
                    events,
                },
                Err(error) => Input::SignalingFailed {
                    session,
                    error: match error {
                        e @ LinkError::TransportUnavailable(_) => e,
                        e => LinkError::TransportUnavailable(e.to_string()),
                    },
                },
            };
            post(&inbox, input);
        });
    }

    /// Each step runs independently; a failing one never skips the rest
    async fn disconnect(&mut self, announce: bool) {
        self.should_reconnect = false;
        self.supervisor.cancel();
        self.session += 1;
        self.opening = false;
        self.set_ready(false);

        if let Some(signaling) = &self.signaling {
            if signaling.is_open() {
                if let Err(e) = signaling.send(&SignalingMessage::Bye) {
                    debug!("Failed to send bye: {}", e);
                }
            }
        }

        self.teardown_peer().await;

        if let Some(mut signaling) = self.signaling.take() {
            signaling.close();
        }
        self.candidates.reset();

        if announce {
            self.events.log("Disconnected");
            self.events.status(LinkStatus::Disconnected);
        }
    }

    async fn teardown_peer(&mut self) {
        self.answer_received = false;
        if let Some(mut peer) = self.peer.take() {
            peer.teardown().await;
        }
    }

    fn send(&mut self, text: String) {
        if !self.ready {
            return;
        }
        let Some(peer) = &self.peer else {
            return;
        };
        if !peer.is_channel_open() {
            return;
        }
        if !peer.submit(PeerOp::Send(text)) {
            self.events.log_warn(
                LinkError::SendFailure("peer worker stopped".into()).to_string(),
            );
        }
    }

    fn send_signal(&self, message: SignalingMessage) {
        match &self.signaling {
            Some(signaling) => {
                if let Err(e) = signaling.send(&message) {
                    self.events.log_warn(format!(
                        "Failed to send {} message: {}",
                        message.type_name(),
                        e
                    ));
                }
            }
            None => debug!("Cannot send {}, signaling closed", message.type_name()),
        }
    }

    fn on_signaling_opened(
        &mut self,
        session: u64,
        link: Box<dyn SignalingLink>,
        events: mpsc::UnboundedReceiver<SignalingEvent>,
    ) {
        if session != self.session || !self.opening {
            debug!("Closing stale signaling transport (session {})", session);
            link.close();
            return;
        }
        self.opening = false;

        let inbox = self.inbox.clone();
        self.signaling = Some(SignalingChannel::attach(link, events, move |event| {
            post(&inbox, Input::Signaling { session, event });
        }));
        self.events.log("Signaling established");

        self.start_peer();
    }

    /// Start a fresh peer session from Idle over the open signaling path
    fn start_peer(&mut self) {
        self.next_generation += 1;
        self.candidates.reset();
        self.answer_received = false;

        let mut peer = PeerSession::new(self.next_generation);
        let effects = peer.handle(PeerSignal::SignalingOpen);
        self.peer = Some(peer);
        self.apply(effects);
    }

    fn peer_sink(&self, generation: u64) -> PeerEventSink {
        let inbox = self.inbox.clone();
        PeerEventSink::new(move |notice| post(&inbox, Input::Peer { generation, notice }))
    }

    fn signal_peer(&mut self, signal: PeerSignal) {
        if let Some(peer) = self.peer.as_mut() {
            let effects = peer.handle(signal);
            self.apply(effects);
        }
    }

    fn apply(&mut self, effects: Vec<PeerEffect>) {
        for effect in effects {
            match effect {
                PeerEffect::Negotiate => {
                    let factory = self.factory.clone();
                    let Some(generation) = self.peer.as_ref().map(|p| p.generation()) else {
                        continue;
                    };
                    let sink = self.peer_sink(generation);
                    if let Some(peer) = self.peer.as_mut() {
                        peer.start(factory, sink);
                        self.events
                            .log(format!("Negotiating peer session {}", peer.session_id()));
                    }
                }
                PeerEffect::MarkReady => {
                    self.set_ready(true);
                    self.events.log("DataChannel open");
                    self.events.status(LinkStatus::Connected);
                }
                PeerEffect::MarkNotReady => self.set_ready(false),
                PeerEffect::StopRequest(source) => self.events.request_stop(source),
                PeerEffect::ScheduleRestart => self.schedule_restart(),
            }
        }
    }

    fn schedule_restart(&mut self) {
        let inbox = self.inbox.clone();
        let outcome = self
            .supervisor
            .schedule_restart(self.should_reconnect, self.signaling_open(), move |timer| {
                post(&inbox, Input::RestartDue { timer })
            });

        match outcome {
            ScheduleOutcome::Scheduled { timer } => {
                debug!("Restart timer {} scheduled", timer);
                self.events.log(format!(
                    "Renegotiating in {} ms",
                    self.supervisor.delay().as_millis()
                ));
                self.events.status(LinkStatus::Connecting);
            }
            ScheduleOutcome::ReconnectDisabled => debug!("Restart suppressed: reconnect disabled"),
            ScheduleOutcome::SignalingClosed => {
                self.events
                    .log_warn("Cannot renegotiate: signaling transport is closed");
                self.events.status(LinkStatus::Disconnected);
            }
        }
    }

    async fn on_restart_due(&mut self, timer: u64) {
        if !self.supervisor.claim(timer) {
            debug!("Ignoring stale restart timer {}", timer);
            return;
        }
        if !self.should_reconnect || !self.signaling_open() {
            return;
        }

        self.events.log("Restarting peer session");
        self.teardown_peer().await;
        self.start_peer();
    }

    async fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(text) => match SignalingMessage::parse(&text) {
                Ok(message) => self.on_signaling_message(message),
                Err(e) => self
                    .events
                    .log_warn(format!("Dropping signaling message: {}", e)),
            },
            SignalingEvent::Closed(reason) => self.on_signaling_closed(reason).await,
        }
    }

    fn on_signaling_message(&mut self, message: SignalingMessage) {
        debug!("Signaling <- {}", message.type_name());
        match message {
            SignalingMessage::Answer { sdp } => {
                let negotiating = self
                    .peer
                    .as_ref()
                    .map_or(false, |p| p.state() == PeerState::Negotiating);
                if !negotiating || self.answer_received {
                    self.events.log_warn(
                        LinkError::protocol("answer received outside negotiation").to_string(),
                    );
                    return;
                }
                self.answer_received = true;
                self.events.log("Remote answer received");
                if let Some(peer) = &self.peer {
                    peer.submit(PeerOp::ApplyAnswer(sdp));
                }
            }
            SignalingMessage::Ice {
                candidate: Some(candidate),
                ..
            } => {
                let candidate = candidate.with_defaults(&self.channel_name);
                match self.candidates.push(candidate) {
                    CandidateAction::Apply(candidate) => {
                        if let Some(peer) = &self.peer {
                            peer.submit(PeerOp::AddCandidate(candidate));
                        }
                    }
                    CandidateAction::Buffered => {
                        debug!("Buffered remote candidate ({} pending)", self.candidates.len())
                    }
                }
            }
            SignalingMessage::Ice { candidate: None, .. } => {
                if self.candidates.remote_description_set() {
                    if let Some(peer) = &self.peer {
                        peer.submit(PeerOp::EndOfCandidates);
                    }
                } else {
                    debug!("Ignoring end-of-candidates before remote description");
                }
            }
            SignalingMessage::Bye => {
                self.events.log("Remote peer left");
                self.signal_peer(PeerSignal::RemoteLeft);
            }
            SignalingMessage::Error { reason } => {
                self.events.log_warn(format!("Relay error: {}", reason));
            }
            SignalingMessage::Offer { .. } => {
                self.events.log_warn(
                    LinkError::protocol("unexpected offer from relay").to_string(),
                );
            }
        }
    }

    /// Relay closed: terminal for the session, no reconnect at this layer
    async fn on_signaling_closed(&mut self, reason: CloseReason) {
        let source = if reason.clean {
            StopSource::SignalingClose
        } else {
            StopSource::SocketClose
        };
        self.events
            .log_warn(format!("Signaling closed: {}", reason.reason));

        self.supervisor.cancel();
        self.set_ready(false);
        if let Some(mut signaling) = self.signaling.take() {
            signaling.close();
        }
        self.teardown_peer().await;
        self.candidates.reset();

        self.events.request_stop(source);
        self.events.status(LinkStatus::Disconnected);
    }

    async fn on_peer(&mut self, generation: u64, notice: PeerNotice) {
        let current = self
            .peer
            .as_ref()
            .map_or(false, |p| p.generation() == generation);
        if !current {
            match notice {
                PeerNotice::Created(backend) => {
                    debug!("Releasing peer from stale generation {}", generation);
                    tokio::spawn(async move {
                        close_backend("stale", backend).await;
                    });
                }
                notice => debug!(
                    "Dropping stale notice from generation {}: {:?}",
                    generation, notice
                ),
            }
            return;
        }

        match notice {
            PeerNotice::Created(backend) => {
                if let Some(peer) = self.peer.as_mut() {
                    peer.attach_backend(backend);
                }
            }
            PeerNotice::LocalOffer(sdp) => {
                self.send_signal(SignalingMessage::Offer { sdp });
                self.events.log("Local offer sent");
            }
            PeerNotice::RemoteDescriptionSet => {
                let buffered = self.candidates.drain();
                info!(
                    "Remote description set; applying {} buffered candidate(s)",
                    buffered.len()
                );
                if let Some(peer) = &self.peer {
                    for candidate in buffered {
                        peer.submit(PeerOp::AddCandidate(candidate));
                    }
                }
            }
            PeerNotice::NegotiationFailed(e) => {
                self.events.log_warn(e.to_string());
                self.signal_peer(PeerSignal::NegotiationFailed);
            }
            PeerNotice::CandidateRejected(e) => self.events.log_warn(e.to_string()),
            PeerNotice::SendFailed(e) => self.events.log_warn(e.to_string()),
            PeerNotice::Event(event) => self.on_peer_event(event),
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(Some(candidate)) => {
                self.send_signal(SignalingMessage::candidate(candidate));
            }
            PeerEvent::LocalCandidate(None) => {
                self.send_signal(SignalingMessage::end_of_candidates());
            }
            PeerEvent::Connection(state) => {
                self.events
                    .log(format!("Peer connection state: {}", state));
                self.signal_peer(PeerSignal::Connection(state));
            }
            PeerEvent::ChannelOpen => self.signal_peer(PeerSignal::ChannelOpen),
            PeerEvent::ChannelClosed => {
                self.events.log_warn("DataChannel closed");
                self.signal_peer(PeerSignal::ChannelClosed);
            }
        }
    }
}
