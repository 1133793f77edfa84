//! Outbound message queue.
//!
//! Messages are split into fragments when queued. Each ordered stream keeps
//! its own SSN counter; unordered messages carry SSN 0.

use crate::error::{Result, SctpError};
use crate::types::{LifecycleId, Ssn, StreamId};
use std::collections::{HashMap, VecDeque};

/// Per-message send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Deliver without regard to stream order
    pub unordered: bool,
    /// Payload protocol identifier
    pub ppid: u32,
    /// Reported back in `LifecycleEnd` once the message is no longer tracked
    pub lifecycle_id: Option<LifecycleId>,
}

/// One fragment waiting for a TSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFragment {
    pub stream_id: StreamId,
    pub ssn: Ssn,
    pub ppid: u32,
    pub unordered: bool,
    pub beginning: bool,
    pub ending: bool,
    pub payload: Vec<u8>,
    /// Set on the last fragment only
    pub lifecycle_id: Option<LifecycleId>,
}

#[derive(Debug)]
pub struct SendQueue {
    fragments: VecDeque<PendingFragment>,
    buffered_bytes: usize,
    max_buffered_bytes: usize,
    fragment_size: usize,
    next_ssn: HashMap<StreamId, Ssn>,
}

impl SendQueue {
    pub fn new(fragment_size: usize, max_buffered_bytes: usize) -> Self {
        Self {
            fragments: VecDeque::new(),
            buffered_bytes: 0,
            max_buffered_bytes,
            fragment_size: fragment_size.max(1),
            next_ssn: HashMap::new(),
        }
    }

    /// Fragments and queues one message, returning the fragment count.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::ResourceExhaustion` if the message would push the
    /// queue past its byte ceiling. Nothing is queued in that case.
    pub fn enqueue(
        &mut self,
        stream_id: StreamId,
        payload: &[u8],
        options: &SendOptions,
    ) -> Result<usize> {
        if self.buffered_bytes + payload.len() > self.max_buffered_bytes {
            return Err(SctpError::ResourceExhaustion(format!(
                "send buffer holds {} bytes, cannot add {} (limit {})",
                self.buffered_bytes,
                payload.len(),
                self.max_buffered_bytes
            )));
        }

        let ssn = if options.unordered {
            Ssn(0)
        } else {
            let next = self.next_ssn.entry(stream_id).or_default();
            let ssn = *next;
            *next = next.next();
            ssn
        };

        let pieces: Vec<&[u8]> = payload.chunks(self.fragment_size).collect();
        let count = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            let ending = i + 1 == count;
            self.fragments.push_back(PendingFragment {
                stream_id,
                ssn,
                ppid: options.ppid,
                unordered: options.unordered,
                beginning: i == 0,
                ending,
                payload: piece.to_vec(),
                lifecycle_id: if ending { options.lifecycle_id } else { None },
            });
        }
        self.buffered_bytes += payload.len();
        Ok(count)
    }

    /// Payload size of the next fragment, if any.
    pub fn peek_len(&self) -> Option<usize> {
        self.fragments.front().map(|f| f.payload.len())
    }

    pub fn pop(&mut self) -> Option<PendingFragment> {
        let fragment = self.fragments.pop_front()?;
        self.buffered_bytes -= fragment.payload.len();
        Some(fragment)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Drops everything queued and returns the lifecycle ids it carried.
    pub fn clear(&mut self) -> Vec<LifecycleId> {
        self.buffered_bytes = 0;
        self.fragments
            .drain(..)
            .filter_map(|f| f.lifecycle_id)
            .collect()
    }
}
