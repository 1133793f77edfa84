//! Reassembly of fragmented messages.
//!
//! Fragments are held per stream. Ordered streams group fragments by SSN
//! and release whole messages strictly in SSN order. Unordered fragments
//! are released as soon as a contiguous B..E run of TSNs is present.
//! Buffered payload bytes are capped; the cap covers fragments of
//! incomplete messages and complete messages waiting for an earlier SSN.

use crate::error::{Result, SctpError};
use crate::events::Message;
use crate::packet::DataChunk;
use crate::types::{SsnUnwrapper, StreamId};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug)]
struct Fragment {
    beginning: bool,
    ending: bool,
    ppid: u32,
    payload: Vec<u8>,
}

type FragmentsByTsn = BTreeMap<u64, Fragment>;

#[derive(Debug, Default)]
struct OrderedStream {
    unwrapper: SsnUnwrapper,
    next_ssn: Option<u64>,
    messages: BTreeMap<u64, FragmentsByTsn>,
}

#[derive(Debug)]
pub struct ReassemblyQueue {
    ordered: HashMap<StreamId, OrderedStream>,
    unordered: HashMap<StreamId, FragmentsByTsn>,
    ready: VecDeque<Message>,
    buffered_bytes: usize,
    max_buffered_bytes: usize,
}

impl ReassemblyQueue {
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            ordered: HashMap::new(),
            unordered: HashMap::new(),
            ready: VecDeque::new(),
            buffered_bytes: 0,
            max_buffered_bytes,
        }
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Adds one new (non-duplicate) fragment keyed by its unwrapped TSN.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::ResourceExhaustion` if buffering the fragment would
    /// exceed the byte ceiling. The fragment is not stored in that case.
    pub fn add(&mut self, unwrapped_tsn: u64, chunk: DataChunk) -> Result<()> {
        let len = chunk.payload.len();
        if self.buffered_bytes + len > self.max_buffered_bytes {
            return Err(SctpError::ResourceExhaustion(format!(
                "reassembly buffer holds {} bytes, cannot add {} (limit {})",
                self.buffered_bytes, len, self.max_buffered_bytes
            )));
        }
        self.buffered_bytes += len;

        let fragment = Fragment {
            beginning: chunk.beginning,
            ending: chunk.ending,
            ppid: chunk.ppid,
            payload: chunk.payload,
        };
        if chunk.unordered {
            let fragments = self.unordered.entry(chunk.stream_id).or_default();
            fragments.insert(unwrapped_tsn, fragment);
            if let Some(message) = take_unordered(fragments, unwrapped_tsn, chunk.stream_id) {
                self.release(message);
            }
        } else {
            let stream = self.ordered.entry(chunk.stream_id).or_default();
            let ssn = stream.unwrapper.unwrap(chunk.ssn);
            // Streams start at SSN 0, anchored at the unwrapper's origin.
            let next_ssn = *stream
                .next_ssn
                .get_or_insert_with(|| ssn - chunk.ssn.0 as u64);
            if ssn < next_ssn {
                // Already delivered; a conforming peer never sends this.
                self.buffered_bytes -= len;
                return Ok(());
            }
            stream
                .messages
                .entry(ssn)
                .or_default()
                .insert(unwrapped_tsn, fragment);

            let mut delivered = Vec::new();
            while let Some(next) = stream.next_ssn
                && let Some(fragments) = stream.messages.get(&next)
                && is_complete(fragments)
            {
                if let Some(fragments) = stream.messages.remove(&next) {
                    delivered.push(assemble(fragments, chunk.stream_id, true));
                }
                stream.next_ssn = Some(next + 1);
            }
            for message in delivered {
                self.release(message);
            }
        }
        Ok(())
    }

    fn release(&mut self, message: Message) {
        self.buffered_bytes -= message.payload.len();
        self.ready.push_back(message);
    }

    /// Next complete message, in delivery order.
    pub fn pop_message(&mut self) -> Option<Message> {
        self.ready.pop_front()
    }

    pub fn has_messages(&self) -> bool {
        !self.ready.is_empty()
    }
}

/// True if `fragments` (all of one SSN) form exactly one B..E run of
/// consecutive TSNs.
fn is_complete(fragments: &FragmentsByTsn) -> bool {
    let (Some((&first, head)), Some((&last, tail))) =
        (fragments.first_key_value(), fragments.last_key_value())
    else {
        return false;
    };
    head.beginning && tail.ending && (last - first + 1) as usize == fragments.len()
}

/// Finds the contiguous B..E run containing `tsn`, if complete, and removes
/// it from `fragments`.
fn take_unordered(fragments: &mut FragmentsByTsn, tsn: u64, stream_id: StreamId) -> Option<Message> {
    let mut start = tsn;
    loop {
        let fragment = fragments.get(&start)?;
        if fragment.beginning {
            break;
        }
        let previous = fragments.get(&(start - 1))?;
        if previous.ending {
            return None;
        }
        start -= 1;
    }
    let mut end = tsn;
    loop {
        let fragment = fragments.get(&end)?;
        if fragment.ending {
            break;
        }
        let next = fragments.get(&(end + 1))?;
        if next.beginning {
            return None;
        }
        end += 1;
    }

    let run: FragmentsByTsn = (start..=end)
        .filter_map(|t| fragments.remove(&t).map(|f| (t, f)))
        .collect();
    Some(assemble(run, stream_id, false))
}

fn assemble(fragments: FragmentsByTsn, stream_id: StreamId, ordered: bool) -> Message {
    let ppid = fragments.values().next().map_or(0, |f| f.ppid);
    let mut payload = Vec::with_capacity(fragments.values().map(|f| f.payload.len()).sum());
    for fragment in fragments.into_values() {
        payload.extend_from_slice(&fragment.payload);
    }
    Message {
        stream_id,
        ppid,
        payload,
        ordered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ssn, Tsn};

    fn fragment(
        tsn: u32,
        ssn: u16,
        beginning: bool,
        ending: bool,
        payload: &[u8],
    ) -> (u64, DataChunk) {
        (
            tsn as u64,
            DataChunk {
                tsn: Tsn(tsn),
                stream_id: StreamId(1),
                ssn: Ssn(ssn),
                ppid: 51,
                unordered: false,
                beginning,
                ending,
                payload: payload.to_vec(),
            },
        )
    }

    fn unordered(tsn: u32, beginning: bool, ending: bool, payload: &[u8]) -> (u64, DataChunk) {
        let (key, mut chunk) = fragment(tsn, 0, beginning, ending, payload);
        chunk.unordered = true;
        (key, chunk)
    }

    fn add(queue: &mut ReassemblyQueue, (tsn, chunk): (u64, DataChunk)) {
        queue.add(tsn, chunk).unwrap();
    }

    #[test]
    fn test_single_fragment_message() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, fragment(10, 0, true, true, b"hello"));

        let message = queue.pop_message().unwrap();
        assert_eq!(message.payload, b"hello");
        assert_eq!(message.stream_id, StreamId(1));
        assert!(message.ordered);
        assert_eq!(queue.buffered_bytes(), 0);
    }

    #[test]
    fn test_out_of_order_fragments() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, fragment(12, 0, false, true, b"c"));
        add(&mut queue, fragment(10, 0, true, false, b"a"));
        assert!(!queue.has_messages());
        add(&mut queue, fragment(11, 0, false, false, b"b"));

        assert_eq!(queue.pop_message().unwrap().payload, b"abc");
        assert!(queue.pop_message().is_none());
    }

    #[test]
    fn test_missing_end_never_delivers() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, fragment(10, 0, true, false, b"a"));
        add(&mut queue, fragment(11, 0, false, false, b"b"));

        assert!(queue.pop_message().is_none());
        assert_eq!(queue.buffered_bytes(), 2);
    }

    #[test]
    fn test_ordered_waits_for_earlier_ssn() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, fragment(11, 1, true, true, b"second"));
        assert!(queue.pop_message().is_none());

        add(&mut queue, fragment(10, 0, true, true, b"first"));
        assert_eq!(queue.pop_message().unwrap().payload, b"first");
        assert_eq!(queue.pop_message().unwrap().payload, b"second");
    }

    #[test]
    fn test_unordered_delivered_immediately() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, fragment(10, 0, true, false, b"ordered"));
        add(&mut queue, unordered(12, false, true, b"y"));
        add(&mut queue, unordered(11, true, false, b"x"));

        let message = queue.pop_message().unwrap();
        assert_eq!(message.payload, b"xy");
        assert!(!message.ordered);
        assert_eq!(queue.buffered_bytes(), 7);
    }

    #[test]
    fn test_unordered_run_does_not_cross_messages() {
        let mut queue = ReassemblyQueue::new(1024);
        add(&mut queue, unordered(1, true, true, b"a"));
        add(&mut queue, unordered(3, false, true, b"c"));
        assert_eq!(queue.pop_message().unwrap().payload, b"a");
        assert!(queue.pop_message().is_none());
    }

    #[test]
    fn test_byte_ceiling() {
        let mut queue = ReassemblyQueue::new(4);
        add(&mut queue, fragment(10, 0, true, false, b"abc"));
        let (tsn, chunk) = fragment(11, 0, false, true, b"de");

        assert!(matches!(
            queue.add(tsn, chunk),
            Err(SctpError::ResourceExhaustion(_))
        ));
        assert_eq!(queue.buffered_bytes(), 3);
    }

    #[test]
    fn test_ssn_wraparound() {
        let mut queue = ReassemblyQueue::new(1 << 20);
        for ssn in 0..=u16::MAX as u32 + 2 {
            add(
                &mut queue,
                fragment(ssn, ssn as u16, true, true, &[ssn as u8]),
            );
            assert!(queue.pop_message().is_some(), "ssn {} not delivered", ssn);
        }
    }
}
