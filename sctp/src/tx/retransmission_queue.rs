//! Retransmission ledger.
//!
//! Tracks every DATA chunk from TSN assignment until it is covered by the
//! peer's cumulative ack. Entries are keyed by unwrapped TSN so ordering
//! survives wraparound. Only chunks that were never retransmitted produce
//! RTT samples.

use super::congestion::CongestionControl;
use super::rto::RtoEstimator;
use super::send_queue::PendingFragment;
use crate::error::{Result, SctpError};
use crate::packet::{DataChunk, SackChunk};
use crate::types::{LifecycleId, Timestamp, Tsn, TsnUnwrapper};
use std::collections::BTreeMap;
use std::time::Duration;

/// Miss indications before a chunk is fast-retransmitted.
const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    InFlight,
    /// Covered by a gap-ack block, not yet by the cumulative ack
    GapAcked,
    ToRetransmit,
}

#[derive(Debug, Clone)]
pub struct OutstandingChunk {
    pub chunk: DataChunk,
    pub state: ChunkState,
    pub sent_at: Timestamp,
    pub retransmissions: u32,
    nack_count: u32,
    lifecycle_id: Option<LifecycleId>,
}

impl OutstandingChunk {
    fn payload_len(&self) -> usize {
        self.chunk.payload.len()
    }
}

/// What a SACK changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SackOutcome {
    pub cumulative_ack_advanced: bool,
    pub bytes_acked: usize,
    pub rtt: Option<Duration>,
    pub fast_retransmits: usize,
    /// Messages whose last fragment is now cumulatively acked
    pub lifecycle_ends: Vec<LifecycleId>,
}

#[derive(Debug)]
pub struct RetransmissionQueue {
    unwrapper: TsnUnwrapper,
    next_tsn: Tsn,
    last_cumulative_ack: u64,
    outstanding: BTreeMap<u64, OutstandingChunk>,
    /// Payload bytes of chunks in state `InFlight`
    bytes_in_flight: usize,
    peer_rwnd: u32,
    rto: RtoEstimator,
    congestion: Box<dyn CongestionControl>,
    max_chunk_retransmissions: u32,
}

impl RetransmissionQueue {
    pub fn new(
        initial_tsn: Tsn,
        peer_rwnd: u32,
        rto: RtoEstimator,
        congestion: Box<dyn CongestionControl>,
        max_chunk_retransmissions: u32,
    ) -> Self {
        let mut unwrapper = TsnUnwrapper::new();
        let last_cumulative_ack = unwrapper.unwrap(initial_tsn.prev());
        Self {
            unwrapper,
            next_tsn: initial_tsn,
            last_cumulative_ack,
            outstanding: BTreeMap::new(),
            bytes_in_flight: 0,
            peer_rwnd,
            rto,
            congestion,
            max_chunk_retransmissions,
        }
    }

    pub fn next_tsn(&self) -> Tsn {
        self.next_tsn
    }

    pub fn last_cumulative_ack(&self) -> Tsn {
        TsnUnwrapper::rewrap(self.last_cumulative_ack)
    }

    pub fn rto(&self) -> Duration {
        self.rto.rto()
    }

    pub fn rto_estimator_mut(&mut self) -> &mut RtoEstimator {
        &mut self.rto
    }

    pub fn peer_rwnd(&self) -> u32 {
        self.peer_rwnd
    }

    pub fn congestion_window(&self) -> usize {
        self.congestion.congestion_window()
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// No chunk is awaiting acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn has_pending_retransmissions(&self) -> bool {
        self.outstanding
            .values()
            .any(|c| c.state == ChunkState::ToRetransmit)
    }

    pub fn get(&self, tsn: Tsn) -> Option<&OutstandingChunk> {
        self.outstanding.get(&self.unwrapper.peek(tsn))
    }

    /// True if a new chunk of `payload_len` bytes may be sent now.
    ///
    /// With nothing in flight one chunk is always allowed, so a zero window
    /// is probed rather than deadlocked.
    pub fn can_send(&self, payload_len: usize) -> bool {
        if self.bytes_in_flight == 0 {
            return true;
        }
        self.bytes_in_flight < self.congestion.congestion_window()
            && payload_len <= self.peer_rwnd as usize
    }

    /// Assigns the next TSN to `fragment` and records it as in flight.
    pub fn allocate(&mut self, fragment: PendingFragment, now: Timestamp) -> DataChunk {
        let tsn = self.next_tsn;
        self.next_tsn = tsn.next();
        let chunk = DataChunk {
            tsn,
            stream_id: fragment.stream_id,
            ssn: fragment.ssn,
            ppid: fragment.ppid,
            unordered: fragment.unordered,
            beginning: fragment.beginning,
            ending: fragment.ending,
            payload: fragment.payload,
        };
        let len = chunk.payload.len();
        self.bytes_in_flight += len;
        self.peer_rwnd = self.peer_rwnd.saturating_sub(len as u32);
        let key = self.unwrapper.unwrap(tsn);
        self.outstanding.insert(
            key,
            OutstandingChunk {
                chunk: chunk.clone(),
                state: ChunkState::InFlight,
                sent_at: now,
                retransmissions: 0,
                nack_count: 0,
                lifecycle_id: fragment.lifecycle_id,
            },
        );
        chunk
    }

    /// Applies a SACK.
    ///
    /// A cumulative ack older than the current one is ignored entirely; the
    /// ack point never moves backward.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidPacket` if the SACK acknowledges a TSN that
    /// was never sent, and `SctpError::ResourceExhaustion` if a chunk exceeds
    /// its retransmission ceiling while being marked for fast retransmit.
    pub fn handle_sack(&mut self, sack: &SackChunk, now: Timestamp) -> Result<SackOutcome> {
        let cumulative = self.unwrapper.peek(sack.cumulative_tsn_ack);
        let highest_sent = self.unwrapper.peek(self.next_tsn) - 1;
        if cumulative > highest_sent {
            return Err(SctpError::InvalidPacket(format!(
                "SACK acknowledges TSN {} but the highest sent is {}",
                sack.cumulative_tsn_ack,
                TsnUnwrapper::rewrap(highest_sent)
            )));
        }
        let mut outcome = SackOutcome::default();
        if cumulative < self.last_cumulative_ack {
            return Ok(outcome);
        }

        let window_full = self.bytes_in_flight >= self.congestion.congestion_window();
        let mut newest_sample: Option<Timestamp> = None;

        if cumulative > self.last_cumulative_ack {
            outcome.cumulative_ack_advanced = true;
            self.last_cumulative_ack = cumulative;
            self.unwrapper.unwrap(sack.cumulative_tsn_ack);
            let still_outstanding = self.outstanding.split_off(&(cumulative + 1));
            let acked = std::mem::replace(&mut self.outstanding, still_outstanding);
            for (_, chunk) in acked {
                self.account_ack(&chunk, &mut outcome, &mut newest_sample);
                if let Some(id) = chunk.lifecycle_id {
                    outcome.lifecycle_ends.push(id);
                }
            }
        }

        let mut highest_gap_acked = None;
        for block in &sack.gap_ack_blocks {
            let start = cumulative + block.start as u64;
            let end = cumulative + block.end as u64;
            if block.start == 0 || end < start {
                continue;
            }
            let mut newly_acked = Vec::new();
            for (_, chunk) in self.outstanding.range_mut(start..=end) {
                if chunk.state != ChunkState::GapAcked {
                    newly_acked.push(chunk.clone());
                    chunk.state = ChunkState::GapAcked;
                }
            }
            for chunk in &newly_acked {
                self.account_ack(chunk, &mut outcome, &mut newest_sample);
            }
            highest_gap_acked = highest_gap_acked.max(Some(end));
        }

        if let Some(highest) = highest_gap_acked {
            outcome.fast_retransmits = self.apply_miss_indications(highest)?;
        }

        self.peer_rwnd = sack.a_rwnd.saturating_sub(self.bytes_in_flight as u32);
        if outcome.bytes_acked > 0 {
            self.congestion.on_ack(outcome.bytes_acked, window_full);
        }
        if let Some(sent_at) = newest_sample {
            let rtt = now.saturating_since(sent_at);
            self.rto.observe(rtt);
            outcome.rtt = Some(rtt);
        }
        Ok(outcome)
    }

    fn account_ack(
        &mut self,
        chunk: &OutstandingChunk,
        outcome: &mut SackOutcome,
        newest_sample: &mut Option<Timestamp>,
    ) {
        match chunk.state {
            ChunkState::InFlight => {
                self.bytes_in_flight -= chunk.payload_len();
                outcome.bytes_acked += chunk.payload_len();
            }
            ChunkState::ToRetransmit => outcome.bytes_acked += chunk.payload_len(),
            ChunkState::GapAcked => {}
        }
        if chunk.state != ChunkState::GapAcked && chunk.retransmissions == 0 {
            *newest_sample = (*newest_sample).max(Some(chunk.sent_at));
        }
    }

    fn apply_miss_indications(&mut self, highest_gap_acked: u64) -> Result<usize> {
        let mut marked = 0;
        let mut exceeded = None;
        for (_, chunk) in self.outstanding.range_mut(..highest_gap_acked) {
            if chunk.state != ChunkState::InFlight {
                continue;
            }
            chunk.nack_count += 1;
            if chunk.nack_count >= FAST_RETRANSMIT_THRESHOLD {
                chunk.state = ChunkState::ToRetransmit;
                chunk.nack_count = 0;
                chunk.retransmissions += 1;
                self.bytes_in_flight -= chunk.payload_len();
                if chunk.retransmissions > self.max_chunk_retransmissions {
                    exceeded = Some(chunk.chunk.tsn);
                }
                marked += 1;
            }
        }
        if let Some(tsn) = exceeded {
            return Err(self.ceiling_error(tsn));
        }
        if marked > 0 {
            self.congestion.on_fast_retransmit();
        }
        Ok(marked)
    }

    /// Marks every unacknowledged chunk for retransmission after T3-rtx
    /// expired and backs off the RTO.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::ResourceExhaustion` if any chunk exceeds the
    /// per-chunk retransmission ceiling.
    pub fn handle_t3_expiry(&mut self, backoff_multiplier: u32) -> Result<usize> {
        let mut marked = 0;
        let mut exceeded = None;
        for chunk in self.outstanding.values_mut() {
            if chunk.state == ChunkState::GapAcked {
                continue;
            }
            if chunk.state == ChunkState::InFlight {
                self.bytes_in_flight -= chunk.payload_len();
            }
            chunk.state = ChunkState::ToRetransmit;
            chunk.nack_count = 0;
            chunk.retransmissions += 1;
            if chunk.retransmissions > self.max_chunk_retransmissions {
                exceeded = Some(chunk.chunk.tsn);
            }
            marked += 1;
        }
        self.rto.back_off(backoff_multiplier);
        self.congestion.on_retransmission_timeout();
        match exceeded {
            Some(tsn) => Err(self.ceiling_error(tsn)),
            None => Ok(marked),
        }
    }

    fn ceiling_error(&self, tsn: Tsn) -> SctpError {
        SctpError::ResourceExhaustion(format!(
            "TSN {} exceeded {} retransmissions",
            tsn, self.max_chunk_retransmissions
        ))
    }

    /// Takes chunks marked for retransmission, oldest first, while they fit
    /// in `room` bytes of packet space. They are in flight again on return.
    pub fn take_retransmissions(&mut self, now: Timestamp, mut room: usize) -> Vec<DataChunk> {
        let mut chunks = Vec::new();
        for chunk in self.outstanding.values_mut() {
            if chunk.state != ChunkState::ToRetransmit {
                continue;
            }
            let size = DataChunk::encoded_len(chunk.payload_len());
            if size > room {
                break;
            }
            room -= size;
            chunk.state = ChunkState::InFlight;
            chunk.sent_at = now;
            self.bytes_in_flight += chunk.payload_len();
            chunks.push(chunk.chunk.clone());
        }
        chunks
    }

    /// Forgets every chunk, returning the lifecycle ids they carried.
    pub fn clear(&mut self) -> Vec<LifecycleId> {
        self.bytes_in_flight = 0;
        std::mem::take(&mut self.outstanding)
            .into_values()
            .filter_map(|c| c.lifecycle_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationConfig;
    use crate::packet::GapAckBlock;
    use crate::tx::congestion::SlowStartPolicy;
    use crate::types::{Ssn, StreamId};

    fn queue(initial_tsn: u32) -> RetransmissionQueue {
        let config = AssociationConfig {
            rto_min: Duration::from_millis(10),
            ..Default::default()
        };
        RetransmissionQueue::new(
            Tsn(initial_tsn),
            131072,
            RtoEstimator::new(&config),
            Box::new(SlowStartPolicy::new(1200, 131072)),
            2,
        )
    }

    fn fragment(len: usize, lifecycle_id: Option<LifecycleId>) -> PendingFragment {
        PendingFragment {
            stream_id: StreamId(0),
            ssn: Ssn(0),
            ppid: 53,
            unordered: false,
            beginning: true,
            ending: true,
            payload: vec![0xAB; len],
            lifecycle_id,
        }
    }

    fn sack(cumulative: u32, gaps: &[(u16, u16)]) -> SackChunk {
        SackChunk {
            cumulative_tsn_ack: Tsn(cumulative),
            a_rwnd: 131072,
            gap_ack_blocks: gaps
                .iter()
                .map(|&(start, end)| GapAckBlock { start, end })
                .collect(),
            duplicate_tsns: Vec::new(),
        }
    }

    fn send(queue: &mut RetransmissionQueue, count: usize, now: u64) {
        for _ in 0..count {
            queue.allocate(fragment(100, None), Timestamp::from_millis(now));
        }
    }

    #[test]
    fn test_allocate_assigns_consecutive_tsns() {
        let mut q = queue(u32::MAX);
        let a = q.allocate(fragment(10, None), Timestamp::from_millis(0));
        let b = q.allocate(fragment(10, None), Timestamp::from_millis(0));

        assert_eq!(a.tsn, Tsn(u32::MAX));
        assert_eq!(b.tsn, Tsn(0));
        assert_eq!(q.bytes_in_flight(), 20);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_cumulative_ack_removes_and_samples_rtt() {
        let mut q = queue(10);
        send(&mut q, 3, 1_000);

        let outcome = q.handle_sack(&sack(11, &[]), Timestamp::from_millis(1_100)).unwrap();

        assert!(outcome.cumulative_ack_advanced);
        assert_eq!(outcome.bytes_acked, 200);
        assert_eq!(outcome.rtt, Some(Duration::from_millis(100)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.last_cumulative_ack(), Tsn(11));
        assert_eq!(q.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_stale_sack_ignored() {
        let mut q = queue(10);
        send(&mut q, 3, 0);
        q.handle_sack(&sack(11, &[]), Timestamp::from_millis(10)).unwrap();

        let outcome = q.handle_sack(&sack(10, &[]), Timestamp::from_millis(20)).unwrap();
        assert_eq!(outcome, SackOutcome::default());
        assert_eq!(q.last_cumulative_ack(), Tsn(11));
    }

    #[test]
    fn test_ack_of_unsent_tsn_rejected() {
        let mut q = queue(10);
        send(&mut q, 2, 0);
        assert!(q.handle_sack(&sack(12, &[]), Timestamp::from_millis(0)).is_err());
    }

    #[test]
    fn test_gap_blocks_and_fast_retransmit() {
        let mut q = queue(1);
        send(&mut q, 5, 0);

        // TSN 1 acked, 2 missing, 3..=3 then 3..=4 then 3..=5 gap-acked
        q.handle_sack(&sack(1, &[(2, 2)]), Timestamp::from_millis(10)).unwrap();
        q.handle_sack(&sack(1, &[(2, 3)]), Timestamp::from_millis(20)).unwrap();
        assert_eq!(q.get(Tsn(2)).unwrap().state, ChunkState::InFlight);

        let outcome = q.handle_sack(&sack(1, &[(2, 4)]), Timestamp::from_millis(30)).unwrap();
        assert_eq!(outcome.fast_retransmits, 1);
        assert_eq!(q.get(Tsn(2)).unwrap().state, ChunkState::ToRetransmit);
        assert_eq!(q.get(Tsn(3)).unwrap().state, ChunkState::GapAcked);
        assert!(q.has_pending_retransmissions());

        let resent = q.take_retransmissions(Timestamp::from_millis(40), 1200);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].tsn, Tsn(2));
        assert!(!q.has_pending_retransmissions());
    }

    #[test]
    fn test_retransmitted_chunk_gives_no_rtt_sample() {
        let mut q = queue(1);
        send(&mut q, 1, 0);
        q.handle_t3_expiry(2).unwrap();
        let rto_after_backoff = q.rto();
        q.take_retransmissions(Timestamp::from_millis(1_000), 1200);

        let outcome = q.handle_sack(&sack(1, &[]), Timestamp::from_millis(1_050)).unwrap();
        assert!(outcome.cumulative_ack_advanced);
        assert_eq!(outcome.rtt, None);
        assert_eq!(q.rto(), rto_after_backoff);
    }

    #[test]
    fn test_t3_expiry_marks_all_and_backs_off() {
        let mut q = queue(1);
        send(&mut q, 3, 0);
        q.handle_sack(&sack(0, &[(2, 2)]), Timestamp::from_millis(5)).unwrap();

        let marked = q.handle_t3_expiry(2).unwrap();
        assert_eq!(marked, 2);
        assert_eq!(q.bytes_in_flight(), 0);
        assert_eq!(q.rto(), Duration::from_millis(1_000));
        assert_eq!(q.get(Tsn(2)).unwrap().state, ChunkState::GapAcked);
    }

    #[test]
    fn test_take_retransmissions_respects_room() {
        let mut q = queue(1);
        send(&mut q, 3, 0);
        q.handle_t3_expiry(2).unwrap();

        // Each chunk is 116 bytes on the wire
        let resent = q.take_retransmissions(Timestamp::from_millis(1), 240);
        assert_eq!(resent.len(), 2);
        assert_eq!(q.bytes_in_flight(), 200);
        assert!(q.has_pending_retransmissions());
    }

    #[test]
    fn test_chunk_retransmission_ceiling() {
        let mut q = queue(1);
        send(&mut q, 1, 0);
        assert!(q.handle_t3_expiry(2).is_ok());
        assert!(q.handle_t3_expiry(2).is_ok());
        assert!(matches!(
            q.handle_t3_expiry(2),
            Err(SctpError::ResourceExhaustion(_))
        ));
    }

    #[test]
    fn test_lifecycle_released_on_cumulative_ack() {
        let mut q = queue(1);
        q.allocate(fragment(10, None), Timestamp::from_millis(0));
        q.allocate(fragment(10, Some(LifecycleId(7))), Timestamp::from_millis(0));
        q.allocate(fragment(10, Some(LifecycleId(8))), Timestamp::from_millis(0));

        let outcome = q.handle_sack(&sack(2, &[(1, 1)]), Timestamp::from_millis(1)).unwrap();
        assert_eq!(outcome.lifecycle_ends, vec![LifecycleId(7)]);
        assert_eq!(q.clear(), vec![LifecycleId(8)]);
    }

    #[test]
    fn test_can_send_limited_by_window() {
        let mut q = queue(1);
        assert!(q.can_send(1_000_000));
        // 4380 byte initial window
        for _ in 0..5 {
            q.allocate(fragment(1000, None), Timestamp::from_millis(0));
        }
        assert!(!q.can_send(100));
    }
}
