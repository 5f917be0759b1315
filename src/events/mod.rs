//! Event system for bridge notifications
//!
//! This module provides the event bus used to announce status changes,
//! log lines and stop requests to the presentation layer and to the
//! telemetry sampler.

pub mod types;

pub use types::{BridgeEvent, LinkStatus, StatusTone, StopSource};

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting bridge events
///
/// The event bus uses tokio's broadcast channel to distribute events
/// to multiple subscribers. Events are delivered to all active subscribers.
///
/// # Example
///
/// ```no_run
/// use vr_link::events::{BridgeEvent, EventBus, LinkStatus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(BridgeEvent::status(LinkStatus::Connecting));
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("Received event: {:?}", event);
///     }
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn publish(&self, event: BridgeEvent) {
        // If no subscribers, send returns Err which is normal
        let _ = self.tx.send(event);
    }

    /// Announce a connection phase change
    pub fn status(&self, status: LinkStatus) {
        self.publish(BridgeEvent::status(status));
    }

    /// Emit a presentation log line, mirrored to tracing
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(BridgeEvent::log(message));
    }

    /// Emit a presentation log line for a failure, mirrored as a warning
    pub fn log_warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.publish(BridgeEvent::log(message));
    }

    /// Ask the sampling collaborator to halt input capture
    pub fn request_stop(&self, source: StopSource) {
        info!("Stop requested (source: {})", source);
        self.publish(BridgeEvent::StopRequested { source });
    }

    /// Subscribe to events
    ///
    /// The receiver uses a ring buffer, so if a subscriber falls too far
    /// behind, it will receive a `Lagged` error and miss some events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.status(LinkStatus::Connecting);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            BridgeEvent::StatusChanged {
                status: "Connecting…".to_string(),
                tone: Some(StatusTone::Connecting),
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.request_stop(StopSource::Controller);

        assert!(matches!(
            rx1.recv().await.unwrap(),
            BridgeEvent::StopRequested {
                source: StopSource::Controller
            }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            BridgeEvent::StopRequested { .. }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        // Should not panic when publishing with no subscribers
        bus.log("nobody listening");
    }
}
