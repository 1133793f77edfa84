//! Events delivered to the observer.
//!
//! Handlers never call the observer directly. They push onto
//! [`DeferredEvents`], and the association drains the queue once at the end
//! of each public operation, after its internal state is consistent. Events
//! raised while draining (an observer calling back into the association)
//! are queued again and delivered on that call's own drain.

use crate::env::Observer;
use crate::error::ErrorKind;
use crate::types::{LifecycleId, StreamId};
use std::fmt;

/// A reassembled user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub stream_id: StreamId,
    /// Payload protocol identifier
    pub ppid: u32,
    pub payload: Vec<u8>,
    pub ordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Shutdown handshake completed
    Graceful,
    /// Local `close()`
    UserAbort,
    /// ABORT received, with its causes rendered as text
    PeerAbort(String),
    /// Fatal local error
    Fatal(ErrorKind),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Graceful => write!(f, "graceful shutdown"),
            CloseReason::UserAbort => write!(f, "closed by user"),
            CloseReason::PeerAbort(reason) => write!(f, "aborted by peer: {}", reason),
            CloseReason::Fatal(kind) => write!(f, "fatal error: {}", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationEvent {
    Connected,
    DataReceived(Message),
    Error {
        kind: ErrorKind,
        message: String,
        lifecycle_id: Option<LifecycleId>,
    },
    /// The message tagged with this id is no longer tracked.
    LifecycleEnd(LifecycleId),
    Closed(CloseReason),
}

/// Swap-and-drain queue of pending events.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    pending: Vec<AssociationEvent>,
}

impl DeferredEvents {
    pub fn push(&mut self, event: AssociationEvent) {
        self.pending.push(event);
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.push(AssociationEvent::Error {
            kind,
            message: message.into(),
            lifecycle_id: None,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Moves out everything queued so far; later pushes start a fresh batch.
    pub fn take(&mut self) -> Vec<AssociationEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Delivers every queued event to `observer` in insertion order.
    pub fn flush(&mut self, observer: &mut dyn Observer) {
        for event in self.take() {
            observer.on_event(event);
        }
    }
}
