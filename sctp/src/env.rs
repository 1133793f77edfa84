//! Collaborators the association is driven through.
//!
//! The association owns no socket, thread or clock. Datagrams go out through
//! a [`DatagramTransport`], timers are armed on a [`TimerService`] and reported
//! back via `Association::handle_timeout`, time comes from a [`Clock`], and
//! every asynchronous outcome is delivered to an [`Observer`].

use crate::error::Result;
use crate::events::AssociationEvent;
use crate::timer::TimerKind;
use crate::types::Timestamp;
use std::time::{Duration, Instant};

/// Opaque identifier of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

pub trait DatagramTransport {
    /// Hands one encoded SCTP packet to the lower layer.
    ///
    /// Failures are logged by the association and never retried; lost
    /// datagrams are recovered by the protocol's own timers.
    fn send_datagram(&mut self, datagram: &[u8]) -> Result<()>;
}

pub trait TimerService {
    /// Arms a one-shot timer. The returned handle is later passed to
    /// `Association::handle_timeout` when it fires.
    fn start_timer(&mut self, kind: TimerKind, duration: Duration) -> TimerHandle;

    /// Disarms a timer. Unknown or already fired handles are ignored.
    fn stop_timer(&mut self, handle: TimerHandle);
}

pub trait Clock {
    fn now(&self) -> Timestamp;
}

pub trait Observer {
    fn on_event(&mut self, event: AssociationEvent);
}

/// The four collaborators an association needs.
pub struct Collaborators {
    pub transport: Box<dyn DatagramTransport>,
    pub timers: Box<dyn TimerService>,
    pub clock: Box<dyn Clock>,
    pub observer: Box<dyn Observer>,
}

/// Wall clock measured from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.origin.elapsed().as_millis() as u64)
    }
}
