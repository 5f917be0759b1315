//! WebSocket signaling transport

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::signaling::{CloseReason, SignalingConnector, SignalingEvent, SignalingLink, SignalingMessage};
use crate::error::{LinkError, Result};

/// Opens signaling transports with `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Box<dyn SignalingLink>, mpsc::UnboundedReceiver<SignalingEvent>)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| LinkError::TransportUnavailable(format!("{}: {}", address, e)))?;
        info!("Signaling connected: {}", address);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        // Writer: drains queued frames; a Close frame ends the stream
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    debug!("Signaling write failed: {}", e);
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader: forwards text frames, reports the close exactly once
        let reader_open = open.clone();
        tokio::spawn(async move {
            let reason = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let _ = event_tx.send(SignalingEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = event_tx.send(SignalingEvent::Message(text));
                        }
                        Err(_) => warn!("Discarding non-UTF8 signaling frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "connection closed".to_string());
                        break CloseReason::clean(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::error(e.to_string()),
                    None => break CloseReason::clean("connection closed"),
                }
            };
            reader_open.store(false, Ordering::SeqCst);
            let _ = event_tx.send(SignalingEvent::Closed(reason));
        });

        let link = WsLink { out_tx, open };
        Ok((Box::new(link), event_rx))
    }
}

struct WsLink {
    out_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SignalingLink for WsLink {
    fn send(&self, message: &SignalingMessage) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::SendFailure("signaling transport closed".into()));
        }
        let text = message.to_json()?;
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| LinkError::SendFailure("signaling writer stopped".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.out_tx.send(Message::Close(None));
        }
    }
}
