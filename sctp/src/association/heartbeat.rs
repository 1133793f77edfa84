//! Path liveness probing.
//!
//! While the association is idle, a HEARTBEAT is sent every interval. Its
//! info parameter carries a [`HeartbeatToken`]: creation time, a random
//! nonce and the transmission number. An unanswered probe is sent again
//! with the transmission number raised. Only an answer to a first
//! transmission of a probe that was never resent yields an RTT sample.

use crate::config::AssociationConfig;
use crate::env::TimerService;
use crate::error::{Result, SctpError};
use crate::packet::{HeartbeatChunk, read_u32, read_u64};
use crate::timer::{Backoff, Timer, TimerKind};
use crate::types::Timestamp;
use std::time::Duration;

const TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatToken {
    pub created_at: Timestamp,
    pub nonce: u32,
    pub transmission: u32,
}

impl HeartbeatToken {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TOKEN_LEN);
        buf.extend_from_slice(&self.created_at.as_millis().to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.transmission.to_be_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != TOKEN_LEN {
            return Err(SctpError::InvalidPacket(format!(
                "heartbeat info of {} bytes, expected {}",
                data.len(),
                TOKEN_LEN
            )));
        }
        Ok(Self {
            created_at: Timestamp::from_millis(read_u64(data, 0)?),
            nonce: read_u32(data, 8)?,
            transmission: read_u32(data, 12)?,
        })
    }
}

/// Result of matching a HEARTBEAT-ACK against the outstanding probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAck {
    /// Answers the outstanding probe; `rtt` is set when it may be sampled.
    Matched { rtt: Option<Duration> },
    /// Answers a probe that is no longer outstanding.
    Stale,
}

#[derive(Debug)]
pub struct Heartbeat {
    interval: Option<Timer>,
    timeout: Timer,
    probe: Option<HeartbeatToken>,
}

impl Heartbeat {
    pub fn new(config: &AssociationConfig) -> Self {
        let interval = (!config.heartbeat_interval.is_zero()).then(|| {
            Timer::new(
                TimerKind::HeartbeatInterval,
                config.heartbeat_interval,
                Backoff::Fixed,
                None,
            )
        });
        Self {
            interval,
            timeout: Timer::new(
                TimerKind::HeartbeatTimeout,
                config.rto_initial,
                Backoff::Fixed,
                None,
            ),
            probe: None,
        }
    }

    pub fn start(&mut self, timers: &mut dyn TimerService) {
        if let Some(interval) = self.interval.as_mut() {
            interval.start(timers);
        }
    }

    pub fn stop(&mut self, timers: &mut dyn TimerService) {
        if let Some(interval) = self.interval.as_mut() {
            interval.stop(timers);
        }
        self.timeout.stop(timers);
        self.probe = None;
    }

    pub fn is_interval(&self, handle: crate::env::TimerHandle) -> bool {
        self.interval.as_ref().is_some_and(|t| t.matches(handle))
    }

    pub fn is_timeout(&self, handle: crate::env::TimerHandle) -> bool {
        self.timeout.matches(handle)
    }

    pub fn outstanding_probe(&self) -> Option<HeartbeatToken> {
        self.probe
    }

    /// Interval timer fired. Re-arms it and returns a probe to send if the
    /// association is idle and no probe is outstanding.
    pub fn on_interval_expired(
        &mut self,
        now: Timestamp,
        idle: bool,
        rto: Duration,
        timers: &mut dyn TimerService,
    ) -> Option<HeartbeatChunk> {
        let interval = self.interval.as_mut()?;
        interval.expire();
        interval.start(timers);
        if !idle || self.probe.is_some() {
            return None;
        }
        let token = HeartbeatToken {
            created_at: now,
            nonce: rand::random(),
            transmission: 1,
        };
        self.probe = Some(token);
        self.timeout.set_duration(rto);
        self.timeout.start(timers);
        Some(HeartbeatChunk::with_info(token.to_bytes()))
    }

    /// Timeout fired without an answer. Returns the probe to resend.
    pub fn on_timeout_expired(
        &mut self,
        rto: Duration,
        timers: &mut dyn TimerService,
    ) -> Option<HeartbeatChunk> {
        self.timeout.expire();
        let probe = self.probe.as_mut()?;
        probe.transmission += 1;
        let info = probe.to_bytes();
        self.timeout.set_duration(rto);
        self.timeout.start(timers);
        Some(HeartbeatChunk::with_info(info))
    }

    /// Matches a HEARTBEAT-ACK's info against the outstanding probe.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidPacket` if the info parameter is missing or
    /// malformed.
    pub fn on_ack(
        &mut self,
        info: Option<&[u8]>,
        now: Timestamp,
        timers: &mut dyn TimerService,
    ) -> Result<HeartbeatAck> {
        let info = info.ok_or_else(|| {
            SctpError::InvalidPacket("HEARTBEAT-ACK without heartbeat info".to_string())
        })?;
        let token = HeartbeatToken::from_bytes(info)?;
        let Some(probe) = self.probe else {
            return Ok(HeartbeatAck::Stale);
        };
        if probe.nonce != token.nonce {
            return Ok(HeartbeatAck::Stale);
        }
        self.probe = None;
        self.timeout.stop(timers);

        let never_resent = probe.transmission == 1 && token.transmission == 1;
        let rtt = (never_resent && token.created_at <= now)
            .then(|| now.saturating_since(token.created_at));
        Ok(HeartbeatAck::Matched { rtt })
    }
}
