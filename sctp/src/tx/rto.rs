//! Retransmission timeout estimation (RFC 6298).
//!
//! ```text
//! first sample:  SRTT = R, RTTVAR = R/2
//! later:         RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|
//!                SRTT   = 7/8 SRTT   + 1/8 R
//! RTO = clamp(SRTT + 4 RTTVAR, rto_min, rto_max)
//! ```

use crate::config::AssociationConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min: Duration,
    max: Duration,
}

impl RtoEstimator {
    pub fn new(config: &AssociationConfig) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.rto_initial,
            min: config.rto_min,
            max: config.rto_max,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Feeds one round-trip measurement. Callers must only pass samples from
    /// transmissions that were never retransmitted (Karn's rule).
    pub fn observe(&mut self, rtt: Duration) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            }
            Some(srtt) => {
                self.rttvar = self.rttvar * 3 / 4 + srtt.abs_diff(rtt) / 4;
                srtt * 7 / 8 + rtt / 8
            }
        };
        self.srtt = Some(srtt);
        self.rto = (srtt + self.rttvar * 4).clamp(self.min, self.max);
    }

    /// Multiplies the RTO after a retransmission timeout, capped at `rto_max`.
    pub fn back_off(&mut self, multiplier: u32) {
        self.rto = self.rto.saturating_mul(multiplier).min(self.max);
    }
}
