//! Receive-side TSN bookkeeping and SACK construction.

use crate::packet::{GapAckBlock, SackChunk};
use crate::types::{Tsn, TsnUnwrapper};
use std::collections::BTreeSet;

/// TSNs further than this beyond the cumulative ack are refused.
const MAX_TSN_LOOKAHEAD: u64 = 0xFFFF;
/// Duplicate TSNs reported per SACK.
const MAX_DUPLICATES_REPORTED: usize = 32;
/// Gap-ack blocks reported per SACK.
const MAX_GAP_BLOCKS_REPORTED: usize = 64;

/// How a received TSN relates to what was already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsnStatus {
    New,
    Duplicate,
    /// Too far ahead of the cumulative ack to track
    OutOfWindow,
}

#[derive(Debug)]
pub struct DataTracker {
    unwrapper: TsnUnwrapper,
    last_cumulative: u64,
    /// Received TSNs above the cumulative ack
    received_above: BTreeSet<u64>,
    duplicates: Vec<Tsn>,
}

impl DataTracker {
    pub fn new(peer_initial_tsn: Tsn) -> Self {
        let mut unwrapper = TsnUnwrapper::new();
        let last_cumulative = unwrapper.unwrap(peer_initial_tsn.prev());
        Self {
            unwrapper,
            last_cumulative,
            received_above: BTreeSet::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn cumulative_tsn_ack(&self) -> Tsn {
        TsnUnwrapper::rewrap(self.last_cumulative)
    }

    /// Unwrapped form of `tsn`, for queues keyed on a total order.
    pub fn unwrapped(&self, tsn: Tsn) -> u64 {
        self.unwrapper.peek(tsn)
    }

    /// Records an inbound TSN.
    pub fn observe(&mut self, tsn: Tsn) -> TsnStatus {
        let value = self.unwrapper.peek(tsn);
        if value <= self.last_cumulative || self.received_above.contains(&value) {
            if self.duplicates.len() < MAX_DUPLICATES_REPORTED {
                self.duplicates.push(tsn);
            }
            return TsnStatus::Duplicate;
        }
        if value > self.last_cumulative + MAX_TSN_LOOKAHEAD {
            return TsnStatus::OutOfWindow;
        }

        self.unwrapper.unwrap(tsn);
        if value == self.last_cumulative + 1 {
            self.last_cumulative = value;
            while self.received_above.remove(&(self.last_cumulative + 1)) {
                self.last_cumulative += 1;
            }
        } else {
            self.received_above.insert(value);
        }
        TsnStatus::New
    }

    /// True if TSNs above the cumulative ack have been received.
    pub fn has_gaps(&self) -> bool {
        !self.received_above.is_empty()
    }

    /// Builds a SACK for the current state and clears the duplicate list.
    pub fn create_sack(&mut self, a_rwnd: u32) -> SackChunk {
        let base = self.last_cumulative;
        let mut gap_ack_blocks: Vec<GapAckBlock> = Vec::new();
        for &value in &self.received_above {
            let offset = (value - base) as u16;
            match gap_ack_blocks.last_mut() {
                Some(block) if block.end.wrapping_add(1) == offset => block.end = offset,
                _ => {
                    if gap_ack_blocks.len() == MAX_GAP_BLOCKS_REPORTED {
                        break;
                    }
                    gap_ack_blocks.push(GapAckBlock {
                        start: offset,
                        end: offset,
                    });
                }
            }
        }

        SackChunk {
            cumulative_tsn_ack: self.cumulative_tsn_ack(),
            a_rwnd,
            gap_ack_blocks,
            duplicate_tsns: std::mem::take(&mut self.duplicates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_advances_cumulative() {
        let mut tracker = DataTracker::new(Tsn(100));
        assert_eq!(tracker.cumulative_tsn_ack(), Tsn(99));

        assert_eq!(tracker.observe(Tsn(100)), TsnStatus::New);
        assert_eq!(tracker.observe(Tsn(101)), TsnStatus::New);
        assert_eq!(tracker.cumulative_tsn_ack(), Tsn(101));
        assert!(!tracker.has_gaps());
    }

    #[test]
    fn test_gaps_reported_as_blocks() {
        let mut tracker = DataTracker::new(Tsn(1));
        for tsn in [1, 3, 4, 6] {
            tracker.observe(Tsn(tsn));
        }

        let sack = tracker.create_sack(1000);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(1));
        assert_eq!(
            sack.gap_ack_blocks,
            vec![GapAckBlock { start: 2, end: 3 }, GapAckBlock { start: 5, end: 5 }]
        );
        assert_eq!(sack.a_rwnd, 1000);
    }

    #[test]
    fn test_filling_gap_collapses_blocks() {
        let mut tracker = DataTracker::new(Tsn(1));
        for tsn in [1, 3, 4, 2] {
            tracker.observe(Tsn(tsn));
        }
        assert_eq!(tracker.cumulative_tsn_ack(), Tsn(4));
        assert!(tracker.create_sack(0).gap_ack_blocks.is_empty());
    }

    #[test]
    fn test_duplicates_reported_once() {
        let mut tracker = DataTracker::new(Tsn(1));
        tracker.observe(Tsn(1));
        tracker.observe(Tsn(3));
        assert_eq!(tracker.observe(Tsn(1)), TsnStatus::Duplicate);
        assert_eq!(tracker.observe(Tsn(3)), TsnStatus::Duplicate);

        let sack = tracker.create_sack(0);
        assert_eq!(sack.duplicate_tsns, vec![Tsn(1), Tsn(3)]);
        assert!(tracker.create_sack(0).duplicate_tsns.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let mut tracker = DataTracker::new(Tsn(u32::MAX));
        tracker.observe(Tsn(u32::MAX));
        tracker.observe(Tsn(0));
        tracker.observe(Tsn(2));

        let sack = tracker.create_sack(0);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(0));
        assert_eq!(sack.gap_ack_blocks, vec![GapAckBlock { start: 2, end: 2 }]);
    }

    #[test]
    fn test_far_future_tsn_refused() {
        let mut tracker = DataTracker::new(Tsn(1));
        assert_eq!(tracker.observe(Tsn(1 + 0x20000)), TsnStatus::OutOfWindow);
        assert_eq!(tracker.cumulative_tsn_ack(), Tsn(0));
    }
}
