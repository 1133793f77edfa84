//! Congestion window policy.
//!
//! The retransmission ledger asks a [`CongestionControl`] how many bytes may
//! be in flight and reports acks and loss to it. [`SlowStartPolicy`] follows
//! RFC 4960 section 7.2.

use std::fmt::Debug;

pub trait CongestionControl: Debug {
    /// Bytes allowed in flight.
    fn congestion_window(&self) -> usize;

    /// Newly acknowledged bytes. `window_full` is true if the window was
    /// fully used before this ack.
    fn on_ack(&mut self, bytes_acked: usize, window_full: bool);

    /// Loss detected through three miss indications.
    fn on_fast_retransmit(&mut self);

    /// T3-rtx expired.
    fn on_retransmission_timeout(&mut self);
}

#[derive(Debug, Clone)]
pub struct SlowStartPolicy {
    mtu: usize,
    cwnd: usize,
    ssthresh: usize,
    partial_bytes_acked: usize,
}

impl SlowStartPolicy {
    /// `peer_rwnd` seeds the slow-start threshold.
    pub fn new(mtu: usize, peer_rwnd: u32) -> Self {
        Self {
            mtu,
            cwnd: (4 * mtu).min((2 * mtu).max(4380)),
            ssthresh: peer_rwnd as usize,
            partial_bytes_acked: 0,
        }
    }

    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    fn reduced_threshold(&self) -> usize {
        (self.cwnd / 2).max(4 * self.mtu)
    }
}

impl CongestionControl for SlowStartPolicy {
    fn congestion_window(&self) -> usize {
        self.cwnd
    }

    fn on_ack(&mut self, bytes_acked: usize, window_full: bool) {
        if !window_full || bytes_acked == 0 {
            return;
        }
        if self.cwnd <= self.ssthresh {
            self.cwnd += bytes_acked.min(self.mtu);
        } else {
            self.partial_bytes_acked += bytes_acked;
            if self.partial_bytes_acked >= self.cwnd {
                self.partial_bytes_acked -= self.cwnd;
                self.cwnd += self.mtu;
            }
        }
    }

    fn on_fast_retransmit(&mut self) {
        self.ssthresh = self.reduced_threshold();
        self.cwnd = self.ssthresh;
        self.partial_bytes_acked = 0;
    }

    fn on_retransmission_timeout(&mut self) {
        self.ssthresh = self.reduced_threshold();
        self.cwnd = self.mtu;
        self.partial_bytes_acked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_window() {
        let policy = SlowStartPolicy::new(1200, 131072);
        // min(4800, max(2400, 4380))
        assert_eq!(policy.congestion_window(), 4380);
        assert_eq!(policy.ssthresh(), 131072);
    }

    #[test]
    fn test_slow_start_growth_limited_by_mtu() {
        let mut policy = SlowStartPolicy::new(1200, 131072);
        policy.on_ack(5000, true);
        assert_eq!(policy.congestion_window(), 4380 + 1200);

        policy.on_ack(500, true);
        assert_eq!(policy.congestion_window(), 4380 + 1700);
    }

    #[test]
    fn test_no_growth_when_window_not_full() {
        let mut policy = SlowStartPolicy::new(1200, 131072);
        policy.on_ack(1200, false);
        assert_eq!(policy.congestion_window(), 4380);
    }

    #[test]
    fn test_congestion_avoidance() {
        let mut policy = SlowStartPolicy::new(1000, 4000);
        // cwnd = 4000 == ssthresh, one more slow-start step
        policy.on_ack(1000, true);
        assert_eq!(policy.congestion_window(), 5000);

        policy.on_ack(3000, true);
        assert_eq!(policy.congestion_window(), 5000);
        policy.on_ack(2000, true);
        assert_eq!(policy.congestion_window(), 6000);
    }

    #[test]
    fn test_timeout_collapses_window() {
        let mut policy = SlowStartPolicy::new(1000, 131072);
        policy.on_retransmission_timeout();
        assert_eq!(policy.congestion_window(), 1000);
        assert_eq!(policy.ssthresh(), 4000);
    }

    #[test]
    fn test_fast_retransmit_halves() {
        let mut policy = SlowStartPolicy::new(1000, 131072);
        for _ in 0..10 {
            policy.on_ack(1000, true);
        }
        assert_eq!(policy.congestion_window(), 14000);
        policy.on_fast_retransmit();
        assert_eq!(policy.congestion_window(), 7000);
    }
}
