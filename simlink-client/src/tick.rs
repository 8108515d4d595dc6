//! Tick synchronisation.
//!
//! The pumps bump a send stamp after every successful write and a receive
//! stamp after every non-empty inbound batch. Callers wait for a stamp to
//! move to align with the simulation's tick.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::state::lock;

#[derive(Debug)]
pub struct SyncClock {
    sent: watch::Sender<u64>,
    received: watch::Sender<u64>,
    last_inbound: Mutex<Option<Instant>>,
}

impl Default for SyncClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClock {
    pub fn new() -> Self {
        let (sent, _) = watch::channel(0);
        let (received, _) = watch::channel(0);
        Self {
            sent,
            received,
            last_inbound: Mutex::new(None),
        }
    }

    // ── Pump side ────────────────────────────────────────────────

    pub fn mark_sent(&self) {
        self.sent.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub fn mark_received(&self) {
        self.received.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Any inbound bytes count as life for the watchdog.
    pub fn note_inbound(&self, now: Instant) {
        *lock(&self.last_inbound) = Some(now);
    }

    pub fn last_inbound(&self) -> Option<Instant> {
        *lock(&self.last_inbound)
    }

    pub fn reset(&self) {
        *lock(&self.last_inbound) = None;
    }

    // ── Caller side ──────────────────────────────────────────────

    pub fn sent_stamp(&self) -> u64 {
        *self.sent.borrow()
    }

    pub fn received_stamp(&self) -> u64 {
        *self.received.borrow()
    }

    /// Wait until the send stamp moves. `false` on timeout.
    pub async fn wait_sent(&self, timeout: Duration) -> bool {
        wait_change(self.sent.subscribe(), timeout).await
    }

    /// Wait until the receive stamp moves. `false` on timeout.
    pub async fn wait_received(&self, timeout: Duration) -> bool {
        wait_change(self.received.subscribe(), timeout).await
    }
}

async fn wait_change(mut rx: watch::Receiver<u64>, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, rx.changed()).await, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn wait_times_out_without_activity() {
        let clock = SyncClock::new();
        assert!(!clock.wait_received(Duration::from_millis(20)).await);
        assert!(!clock.wait_sent(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn wait_sees_bump() {
        let clock = Arc::new(SyncClock::new());
        let bumper = clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            bumper.mark_received();
        });
        assert!(clock.wait_received(Duration::from_secs(5)).await);
        assert_eq!(clock.received_stamp(), 1);
        assert_eq!(clock.sent_stamp(), 0);
    }

    #[test]
    fn inbound_timestamp() {
        let clock = SyncClock::new();
        assert!(clock.last_inbound().is_none());
        let now = Instant::now();
        clock.note_inbound(now);
        assert_eq!(clock.last_inbound(), Some(now));
        clock.reset();
        assert!(clock.last_inbound().is_none());
    }
}
