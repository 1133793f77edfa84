//! Protocol timers on top of the injected [`TimerService`].
//!
//! A [`Timer`] remembers its base duration, backoff policy and how many times
//! it has expired since it was last started. The service only ever sees
//! one-shot timers; restarts after expiry are armed again by the owner.

use crate::env::{TimerHandle, TimerService};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    T1Init,
    T1Cookie,
    T2Shutdown,
    T3Rtx,
    HeartbeatInterval,
    HeartbeatTimeout,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::T1Init => "t1-init",
            TimerKind::T1Cookie => "t1-cookie",
            TimerKind::T2Shutdown => "t2-shutdown",
            TimerKind::T3Rtx => "t3-rtx",
            TimerKind::HeartbeatInterval => "heartbeat-interval",
            TimerKind::HeartbeatTimeout => "heartbeat-timeout",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Multiply the duration by `multiplier` per expiration, capped at `max`
    Exponential { multiplier: u32, max: Duration },
}

/// Outcome of an expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Within the restart ceiling; the owner should retry and re-arm.
    Retry,
    /// The restart ceiling was exceeded.
    Exhausted,
}

#[derive(Debug)]
pub struct Timer {
    kind: TimerKind,
    duration: Duration,
    backoff: Backoff,
    max_restarts: Option<u32>,
    expirations: u32,
    handle: Option<TimerHandle>,
}

impl Timer {
    pub fn new(
        kind: TimerKind,
        duration: Duration,
        backoff: Backoff,
        max_restarts: Option<u32>,
    ) -> Self {
        Self {
            kind,
            duration,
            backoff,
            max_restarts,
            expirations: 0,
            handle: None,
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Changes the base duration used by the next start.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn expirations(&self) -> u32 {
        self.expirations
    }

    /// True if `handle` is the one this timer currently has armed.
    pub fn matches(&self, handle: TimerHandle) -> bool {
        self.handle == Some(handle)
    }

    /// (Re)starts from the base duration and clears the expiration count.
    pub fn start(&mut self, timers: &mut dyn TimerService) {
        self.stop(timers);
        self.expirations = 0;
        self.handle = Some(timers.start_timer(self.kind, self.duration));
    }

    pub fn stop(&mut self, timers: &mut dyn TimerService) {
        if let Some(handle) = self.handle.take() {
            timers.stop_timer(handle);
        }
    }

    /// Records that the armed timer fired. The timer is no longer running.
    pub fn expire(&mut self) -> Expiry {
        self.handle = None;
        self.expirations = self.expirations.saturating_add(1);
        match self.max_restarts {
            Some(max) if self.expirations > max => Expiry::Exhausted,
            _ => Expiry::Retry,
        }
    }

    /// Arms the timer again with the duration backed off for the current
    /// expiration count.
    pub fn rearm(&mut self, timers: &mut dyn TimerService) {
        self.stop(timers);
        self.handle = Some(timers.start_timer(self.kind, self.backed_off_duration()));
    }

    pub fn backed_off_duration(&self) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.duration,
            Backoff::Exponential { multiplier, max } => {
                let mut duration = self.duration;
                for _ in 0..self.expirations {
                    duration = duration.saturating_mul(multiplier);
                    if duration >= max {
                        return max;
                    }
                }
                duration.min(max)
            }
        }
    }
}
