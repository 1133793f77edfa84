//! Transmission Control Block.
//!
//! Exists from the moment the handshake completes until the association
//! closes. It owns both TSN spaces, the verification tag pair, the send and
//! receive queues, and every timer started on behalf of an established
//! association. [`Tcb::stop_timers`] must run before a TCB is dropped.

use super::heartbeat::Heartbeat;
use super::state_cookie::SctpImplementation;
use crate::config::AssociationConfig;
use crate::env::TimerService;
use crate::packet::{Chunk, CommonHeader, DataChunk, PacketBuilder};
use crate::rx::{DataTracker, ReassemblyQueue};
use crate::timer::{Backoff, Timer, TimerKind};
use crate::tx::{RetransmissionQueue, RtoEstimator, SendQueue, SlowStartPolicy};
use crate::types::{LifecycleId, Timestamp, Tsn};

/// Everything the handshake settles, whichever side opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcbParams {
    pub local_tag: u32,
    pub peer_tag: u32,
    pub local_initial_tsn: Tsn,
    pub peer_initial_tsn: Tsn,
    pub peer_a_rwnd: u32,
    /// Streams the peer may send on
    pub inbound_streams: u16,
    /// Streams we may send on
    pub outbound_streams: u16,
    pub peer_implementation: SctpImplementation,
}

/// Consecutive transmissions that went unanswered.
#[derive(Debug, Clone, Copy)]
pub struct TxErrorCounter {
    count: u32,
    limit: u32,
}

impl TxErrorCounter {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// Counts one failure. Returns true once the limit is exceeded.
    pub fn increment(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count > self.limit
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug)]
pub struct Tcb {
    pub params: TcbParams,
    pub data_tracker: DataTracker,
    pub reassembly: ReassemblyQueue,
    pub retransmission: RetransmissionQueue,
    pub send_queue: SendQueue,
    pub heartbeat: Heartbeat,
    pub t3_rtx: Timer,
    pub tx_errors: TxErrorCounter,
    /// A packet with DATA arrived since the last SACK went out
    pub sack_pending: bool,
    header: CommonHeader,
    mtu: usize,
    max_receiver_window: u32,
}

impl Tcb {
    pub fn new(config: &AssociationConfig, params: TcbParams) -> Self {
        let rto = RtoEstimator::new(config);
        let initial_rto = rto.rto();
        Self {
            params,
            data_tracker: DataTracker::new(params.peer_initial_tsn),
            reassembly: ReassemblyQueue::new(config.max_reassembly_buffer_size),
            retransmission: RetransmissionQueue::new(
                params.local_initial_tsn,
                params.peer_a_rwnd,
                rto,
                Box::new(SlowStartPolicy::new(config.mtu, params.peer_a_rwnd)),
                config.max_chunk_retransmissions,
            ),
            send_queue: SendQueue::new(config.fragment_size(), config.max_send_buffer_size),
            heartbeat: Heartbeat::new(config),
            t3_rtx: Timer::new(TimerKind::T3Rtx, initial_rto, Backoff::Fixed, None),
            tx_errors: TxErrorCounter::new(config.max_retransmissions),
            sack_pending: false,
            header: CommonHeader {
                source_port: config.local_port,
                destination_port: config.remote_port,
                verification_tag: params.peer_tag,
            },
            mtu: config.mtu,
            max_receiver_window: config.max_receiver_window,
        }
    }

    pub fn local_tag(&self) -> u32 {
        self.params.local_tag
    }

    pub fn peer_tag(&self) -> u32 {
        self.params.peer_tag
    }

    /// Empty packet addressed to the peer.
    pub fn packet_builder(&self) -> PacketBuilder {
        PacketBuilder::new(self.header, self.mtu)
    }

    /// One datagram carrying just `chunk`.
    pub fn single_chunk_packet(&self, chunk: &Chunk) -> Vec<u8> {
        let mut builder = self.packet_builder();
        builder.add(chunk);
        builder.build()
    }

    /// Receiver window to advertise: configured maximum less what the
    /// reassembly queue still holds.
    pub fn a_rwnd(&self) -> u32 {
        let buffered = u32::try_from(self.reassembly.buffered_bytes()).unwrap_or(u32::MAX);
        self.max_receiver_window.saturating_sub(buffered)
    }

    /// Nothing queued and nothing awaiting acknowledgment.
    pub fn is_drained(&self) -> bool {
        self.send_queue.is_empty() && self.retransmission.is_empty()
    }

    /// SACK for everything received so far, clearing the pending flag.
    pub fn take_sack(&mut self) -> Chunk {
        self.sack_pending = false;
        let a_rwnd = self.a_rwnd();
        Chunk::Sack(self.data_tracker.create_sack(a_rwnd))
    }

    pub fn buffered_amount(&self) -> usize {
        self.send_queue.buffered_bytes()
    }

    /// Restarts T3-rtx from the current RTO if data is outstanding, stops it
    /// otherwise.
    pub fn refresh_t3(&mut self, timers: &mut dyn TimerService) {
        if self.retransmission.is_empty() {
            self.t3_rtx.stop(timers);
        } else {
            self.t3_rtx.set_duration(self.retransmission.rto());
            self.t3_rtx.start(timers);
        }
    }

    /// Packs pending retransmissions, then new fragments the windows allow,
    /// into as many MTU-sized datagrams as needed. Starts T3-rtx if DATA
    /// went out and it is not already running.
    pub fn produce_data_packets(
        &mut self,
        now: Timestamp,
        timers: &mut dyn TimerService,
    ) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        loop {
            let mut builder = self.packet_builder();
            if self.sack_pending {
                let sack = self.take_sack();
                builder.add(&sack);
            }
            let mut carries_data = false;
            for chunk in self
                .retransmission
                .take_retransmissions(now, builder.bytes_remaining())
            {
                builder.add(&Chunk::Data(chunk));
                carries_data = true;
            }
            while let Some(len) = self.send_queue.peek_len() {
                if DataChunk::encoded_len(len) > builder.bytes_remaining()
                    || !self.retransmission.can_send(len)
                {
                    break;
                }
                let Some(fragment) = self.send_queue.pop() else {
                    break;
                };
                let chunk = self.retransmission.allocate(fragment, now);
                builder.add(&Chunk::Data(chunk));
                carries_data = true;
            }
            if builder.is_empty() {
                break;
            }
            packets.push(builder.build());
            if !carries_data {
                break;
            }
        }

        if !self.retransmission.is_empty() && !self.t3_rtx.is_running() {
            self.t3_rtx.set_duration(self.retransmission.rto());
            self.t3_rtx.start(timers);
        }
        packets
    }

    /// Stops every timer this TCB started.
    pub fn stop_timers(&mut self, timers: &mut dyn TimerService) {
        self.t3_rtx.stop(timers);
        self.heartbeat.stop(timers);
    }

    /// Drops all queued and unacknowledged messages, returning the lifecycle
    /// ids they carried.
    pub fn release_messages(&mut self) -> Vec<LifecycleId> {
        let mut ids = self.send_queue.clear();
        ids.extend(self.retransmission.clear());
        ids
    }
}
