//! Heartbeat Monitor
//!
//! Probes every open link on a fixed interval and tracks round-trip
//! latency from the echoed timestamps. A missed ack marks latency unknown
//! but never closes the link — closing is the transport's call, so one
//! dropped probe cannot evict a healthy peer.

use std::collections::{BTreeMap, VecDeque};

use crate::network::registry::LinkId;

/// Current wall clock in epoch milliseconds, as embedded in probes.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Per-link probe bookkeeping and RTT smoothing.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout_ms: u64,
    window: usize,
    /// Send time of the earliest unanswered probe per link.
    pending: BTreeMap<LinkId, u64>,
    /// Recent RTT samples per link.
    samples: BTreeMap<LinkId, VecDeque<u32>>,
}

impl HeartbeatMonitor {
    /// Create a monitor. `timeout_ms` bounds how long a probe may stay
    /// unanswered (2x the probe interval by default); `window` is the
    /// sliding-window length for smoothing.
    pub fn new(timeout_ms: u64, window: usize) -> Self {
        Self {
            timeout_ms,
            window: window.max(1),
            pending: BTreeMap::new(),
            samples: BTreeMap::new(),
        }
    }

    /// Record a probe being sent. Returns the timestamp to embed. An
    /// already-pending probe keeps its original send time, so the timeout
    /// is measured from the first unanswered probe.
    pub fn probe(&mut self, link: LinkId, now: u64) -> u64 {
        self.pending.entry(link).or_insert(now);
        now
    }

    /// Links whose earliest unanswered probe exceeded the timeout. Their
    /// pending state and samples are reset so latency reads unknown until
    /// a later ack arrives.
    pub fn timed_out(&mut self, now: u64) -> Vec<LinkId> {
        let expired: Vec<LinkId> = self
            .pending
            .iter()
            .filter(|(_, sent)| now.saturating_sub(**sent) >= self.timeout_ms)
            .map(|(link, _)| *link)
            .collect();

        for link in &expired {
            self.pending.remove(link);
            self.samples.remove(link);
        }
        expired
    }

    /// Record an ack carrying the probe's original timestamp. Returns the
    /// smoothed RTT over the sliding window.
    pub fn on_ack(&mut self, link: LinkId, echoed: u64, now: u64) -> u32 {
        self.pending.remove(&link);

        let rtt = now.saturating_sub(echoed).min(u32::MAX as u64) as u32;
        let samples = self.samples.entry(link).or_default();
        samples.push_back(rtt);
        while samples.len() > self.window {
            samples.pop_front();
        }

        let sum: u64 = samples.iter().map(|s| *s as u64).sum();
        (sum / samples.len() as u64) as u32
    }

    /// Drop all state for a closed link.
    pub fn forget(&mut self, link: LinkId) {
        self.pending.remove(&link);
        self.samples.remove(&link);
    }

    /// Drop all state (session teardown).
    pub fn clear(&mut self) {
        self.pending.clear();
        self.samples.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_smooths_over_window() {
        let mut monitor = HeartbeatMonitor::new(10_000, 3);

        assert_eq!(monitor.on_ack(1, 1_000, 1_030), 30);
        assert_eq!(monitor.on_ack(1, 2_000, 2_060), 45); // (30 + 60) / 2
        assert_eq!(monitor.on_ack(1, 3_000, 3_030), 40); // (30 + 60 + 30) / 3

        // Window slides: the first sample drops out.
        assert_eq!(monitor.on_ack(1, 4_000, 4_090), 60); // (60 + 30 + 90) / 3
    }

    #[test]
    fn test_timeout_measured_from_first_unanswered_probe() {
        let mut monitor = HeartbeatMonitor::new(10_000, 3);

        monitor.probe(1, 0);
        monitor.probe(1, 5_000); // re-probe does not push the deadline out

        assert!(monitor.timed_out(9_999).is_empty());
        assert_eq!(monitor.timed_out(10_000), vec![1]);

        // After expiry the slate is clean; a fresh probe re-arms.
        assert!(monitor.timed_out(20_000).is_empty());
        monitor.probe(1, 20_000);
        assert_eq!(monitor.timed_out(30_000), vec![1]);
    }

    #[test]
    fn test_ack_clears_pending() {
        let mut monitor = HeartbeatMonitor::new(10_000, 3);

        monitor.probe(1, 0);
        monitor.on_ack(1, 0, 40);
        assert!(monitor.timed_out(10_000).is_empty());
    }

    #[test]
    fn test_forget_drops_state() {
        let mut monitor = HeartbeatMonitor::new(10_000, 3);

        monitor.probe(1, 0);
        monitor.on_ack(2, 0, 25);
        monitor.forget(1);
        monitor.forget(2);

        assert!(monitor.timed_out(50_000).is_empty());
        // A fresh ack starts a new window rather than averaging stale data.
        assert_eq!(monitor.on_ack(2, 100, 200), 100);
    }

    #[test]
    fn test_clock_skew_saturates() {
        let mut monitor = HeartbeatMonitor::new(10_000, 3);
        assert_eq!(monitor.on_ack(1, 5_000, 4_000), 0);
    }
}
