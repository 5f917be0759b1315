//! Peer backend on top of the `webrtc` crate

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::peer::{ConnectionState, PeerBackend, PeerEvent, PeerEventSink, PeerFactory};
use super::signaling::IceCandidate;
use crate::config::WebRtcConfig;
use crate::error::{LinkError, NegotiationStep, Result};

/// Creates `webrtc` peer connections with one DataChannel each
pub struct RtcPeerFactory {
    config: WebRtcConfig,
}

impl RtcPeerFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

fn create_failed(e: impl std::fmt::Display) -> LinkError {
    LinkError::negotiation(NegotiationStep::CreatePeer, e)
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, session_id: &str, sink: PeerEventSink) -> Result<Arc<dyn PeerBackend>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| create_failed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| create_failed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| create_failed(format!("Failed to create peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        let dc = pc
            .create_data_channel(&self.config.channel_name, None)
            .await
            .map_err(|e| create_failed(format!("Failed to create data channel: {}", e)))?;
        info!(
            "Peer {} created with data channel '{}'",
            session_id, self.config.channel_name
        );

        let backend = RtcPeer { pc, dc };
        backend.attach_handlers(session_id, sink);
        Ok(Arc::new(backend))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
}

impl RtcPeer {
    fn attach_handlers(&self, session_id: &str, sink: PeerEventSink) {
        let candidate_sink = sink.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = candidate_sink.clone();
                Box::pin(async move {
                    match candidate {
                        Some(c) => match c.to_json() {
                            Ok(init) => {
                                debug!("Local ICE candidate: {}", init.candidate);
                                sink.emit(PeerEvent::LocalCandidate(Some(IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    username_fragment: init.username_fragment,
                                })));
                            }
                            Err(e) => warn!("Failed to serialize local candidate: {}", e),
                        },
                        None => sink.emit(PeerEvent::LocalCandidate(None)),
                    }
                })
            }));

        let state_sink = sink.clone();
        let id = session_id.to_string();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = state_sink.clone();
                let id = id.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Peer {} connection state: {}", id, state);
                    sink.emit(PeerEvent::Connection(state));
                })
            }));

        let open_sink = sink.clone();
        self.dc.on_open(Box::new(move || {
            let sink = open_sink.clone();
            Box::pin(async move {
                sink.emit(PeerEvent::ChannelOpen);
            })
        }));

        let close_sink = sink;
        self.dc.on_close(Box::new(move || {
            let sink = close_sink.clone();
            Box::pin(async move {
                sink.emit(PeerEvent::ChannelClosed);
            })
        }));

        let label = self.dc.label().to_string();
        self.dc.on_error(Box::new(move |e| {
            warn!("DataChannel '{}' error: {}", label, e);
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerBackend for RtcPeer {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| LinkError::negotiation(NegotiationStep::CreateOffer, e))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| LinkError::negotiation(NegotiationStep::CreateOffer, e))?;

        Ok(offer.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| LinkError::negotiation(NegotiationStep::SetRemoteDescription, e))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| LinkError::negotiation(NegotiationStep::SetRemoteDescription, e))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| LinkError::negotiation(NegotiationStep::AddCandidate, e))
    }

    async fn end_of_candidates(&self) -> Result<()> {
        // An empty candidate string is the end-of-candidates marker
        self.pc
            .add_ice_candidate(RTCIceCandidateInit::default())
            .await
            .map_err(|e| LinkError::negotiation(NegotiationStep::AddCandidate, e))
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| LinkError::SendFailure(e.to_string()))
    }

    fn is_channel_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn detach_handlers(&self) {
        self.dc.on_close(Box::new(|| Box::pin(async {})));
        self.dc.on_open(Box::new(|| Box::pin(async {})));
        self.pc
            .on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
    }

    async fn close_channel(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| LinkError::WebRtc(format!("Failed to close data channel: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| LinkError::WebRtc(format!("Failed to close peer connection: {}", e)))
    }
}
