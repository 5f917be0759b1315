//! Fixed-rate telemetry sampling

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{ControllerState, Hand, TelemetryPayload};
use crate::bridge::Bridge;
use crate::config::TelemetryConfig;
use crate::events::{BridgeEvent, StopSource};

/// Supplies the current controller state
pub trait PoseSource: Send {
    /// `None` when the hand is not tracked
    fn sample(&mut self, hand: Hand) -> Option<ControllerState>;
}

/// Fires once per press when the menu button is held long enough
#[derive(Debug)]
pub struct MenuHoldDetector {
    threshold: Duration,
    held: Duration,
    triggered: bool,
}

impl MenuHoldDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            held: Duration::ZERO,
            triggered: false,
        }
    }

    /// Advance by `delta`; returns `true` on the tick the hold completes
    pub fn update(&mut self, pressed: bool, delta: Duration) -> bool {
        if !pressed {
            self.held = Duration::ZERO;
            self.triggered = false;
            return false;
        }

        self.held += delta;
        if self.held >= self.threshold && !self.triggered {
            self.triggered = true;
            return true;
        }
        false
    }
}

/// Why the sampler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerExit {
    StopRequested(StopSource),
    Cancelled,
}

pub struct TelemetrySampler {
    config: TelemetryConfig,
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl TelemetrySampler {
    pub fn new(config: TelemetryConfig) -> Self {
        Self { config }
    }

    /// One payload holding the configured hands that are currently tracked
    pub fn build_payload<S: PoseSource + ?Sized>(
        &self,
        source: &mut S,
        timestamp: u64,
    ) -> TelemetryPayload {
        self.config
            .hands
            .iter()
            .filter_map(|hand| source.sample(*hand).filter(|s| s.hand == *hand))
            .fold(TelemetryPayload::new(timestamp), |payload, state| {
                payload.with_controller(state)
            })
    }

    /// Sample until a stop request is observed or `cancel` fires
    pub async fn run<S: PoseSource>(
        self,
        bridge: Bridge,
        mut source: S,
        cancel: CancellationToken,
    ) -> SamplerExit {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events = bridge.subscribe();
        let mut menu = MenuHoldDetector::new(self.config.menu_hold());
        let mut last_tick: Option<Instant> = None;

        info!(
            "Telemetry sampler started ({} ms, hands: {:?})",
            self.config.interval_ms, self.config.hands
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telemetry sampler cancelled");
                    return SamplerExit::Cancelled;
                }
                event = events.recv() => match event {
                    Ok(BridgeEvent::StopRequested { source }) => {
                        info!("Telemetry sampler stopping (source: {})", source);
                        return SamplerExit::StopRequested(source);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => debug!("Sampler skipped {} events", n),
                    Err(RecvError::Closed) => return SamplerExit::Cancelled,
                },
                now = ticker.tick() => {
                    let delta = last_tick.map(|t| now - t).unwrap_or_default();
                    last_tick = Some(now);

                    if !bridge.is_ready() {
                        continue;
                    }

                    let payload = self.build_payload(&mut source, now_millis());
                    if payload.has_controllers() {
                        bridge.send(&payload);
                    }

                    let pressed = payload.controllers().any(|c| c.menu_pressed);
                    if menu.update(pressed, delta) {
                        bridge.events().log("Controller requested stop (menu held)");
                        bridge.events().request_stop(StopSource::Controller);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Position, Quaternion};

    struct FixedSource {
        left: Option<ControllerState>,
        right: Option<ControllerState>,
    }

    impl PoseSource for FixedSource {
        fn sample(&mut self, hand: Hand) -> Option<ControllerState> {
            match hand {
                Hand::Left => self.left.clone(),
                Hand::Right => self.right.clone(),
            }
        }
    }

    fn state(hand: Hand) -> ControllerState {
        ControllerState::new(hand, Position::new(0.0, 1.0, 0.0), Quaternion::IDENTITY)
    }

    #[test]
    fn test_menu_hold_fires_once() {
        let mut menu = MenuHoldDetector::new(Duration::from_millis(800));
        let tick = Duration::from_millis(20);

        let mut fired = 0;
        for _ in 0..100 {
            if menu.update(true, tick) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        // Release re-arms
        assert!(!menu.update(false, tick));
        let fired_at = (1..=100).find(|_| menu.update(true, tick));
        assert_eq!(fired_at, Some(40));
    }

    #[test]
    fn test_short_presses_do_not_fire() {
        let mut menu = MenuHoldDetector::new(Duration::from_millis(800));
        for _ in 0..10 {
            for _ in 0..30 {
                assert!(!menu.update(true, Duration::from_millis(20)));
            }
            assert!(!menu.update(false, Duration::from_millis(20)));
        }
    }

    #[test]
    fn test_build_payload_respects_hands() {
        let mut config = TelemetryConfig::default();
        config.hands = [Hand::Right].into_iter().collect();
        let sampler = TelemetrySampler::new(config);
        let mut source = FixedSource {
            left: Some(state(Hand::Left)),
            right: Some(state(Hand::Right)),
        };

        let payload = sampler.build_payload(&mut source, 42);
        assert_eq!(payload.timestamp, 42);
        assert!(payload.left_controller.is_none());
        assert!(payload.right_controller.is_some());
    }

    #[test]
    fn test_build_payload_untracked_hand() {
        let sampler = TelemetrySampler::new(TelemetryConfig::default());
        let mut source = FixedSource {
            left: None,
            right: None,
        };
        assert!(!sampler.build_payload(&mut source, 1).has_controllers());

        // A record for the wrong hand is not placed in the other slot
        let mut source = FixedSource {
            left: Some(state(Hand::Right)),
            right: None,
        };
        let payload = sampler.build_payload(&mut source, 1);
        assert!(!payload.has_controllers());
    }
}
