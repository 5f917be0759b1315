//! Supervised peer renegotiation
//!
//! At most one restart timer is pending. Scheduling again replaces it
//! (debounce). A timer only counts when its id matches the pending one, so
//! a fire that raced with `cancel` or a replacement is ignored.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Result of a schedule request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { timer: u64 },
    /// `disconnect` was called; reconnection is off
    ReconnectDisabled,
    /// No live signaling path to renegotiate over
    SignalingClosed,
}

pub struct ReconnectSupervisor {
    delay: Duration,
    pending: Option<(u64, JoinHandle<()>)>,
    next_timer: u64,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next_timer: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the restart timer; `fire` receives the timer id
    pub fn schedule_restart<F>(
        &mut self,
        should_reconnect: bool,
        signaling_open: bool,
        fire: F,
    ) -> ScheduleOutcome
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if !should_reconnect {
            self.cancel();
            return ScheduleOutcome::ReconnectDisabled;
        }
        if !signaling_open {
            self.cancel();
            return ScheduleOutcome::SignalingClosed;
        }

        self.cancel();
        self.next_timer += 1;
        let timer = self.next_timer;
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(timer);
        });
        self.pending = Some((timer, handle));
        debug!("Restart timer {} armed ({:?})", timer, delay);

        ScheduleOutcome::Scheduled { timer }
    }

    /// Disarm any pending timer
    pub fn cancel(&mut self) {
        if let Some((timer, handle)) = self.pending.take() {
            handle.abort();
            debug!("Restart timer {} cancelled", timer);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Claim a fired timer; `false` for stale or cancelled ids
    pub fn claim(&mut self, timer: u64) -> bool {
        match &self.pending {
            Some((pending, _)) if *pending == timer => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn supervisor() -> ReconnectSupervisor {
        ReconnectSupervisor::new(Duration::from_millis(1500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let mut sup = supervisor();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = sup.schedule_restart(true, true, move |t| {
            let _ = tx.send(t);
        });
        let ScheduleOutcome::Scheduled { timer } = outcome else {
            panic!("Expected scheduled, got {:?}", outcome);
        };

        tokio::time::sleep(Duration::from_millis(1499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(timer));
        assert!(sup.claim(timer));
        assert!(!sup.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let mut sup = supervisor();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx1 = tx.clone();
        sup.schedule_restart(true, true, move |t| {
            let _ = tx1.send(t);
        });
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let tx2 = tx.clone();
        let outcome = sup.schedule_restart(true, true, move |t| {
            let _ = tx2.send(t);
        });
        assert_eq!(outcome, ScheduleOutcome::Scheduled { timer: 2 });

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed() {
        let mut sup = supervisor();
        assert_eq!(
            sup.schedule_restart(false, true, |_| {}),
            ScheduleOutcome::ReconnectDisabled
        );
        assert_eq!(
            sup.schedule_restart(true, false, |_| {}),
            ScheduleOutcome::SignalingClosed
        );
        assert!(!sup.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let mut sup = supervisor();
        let (tx, mut rx) = mpsc::unbounded_channel();

        sup.schedule_restart(true, true, move |t| {
            let _ = tx.send(t);
        });
        sup.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(!sup.claim(1));
    }
}
