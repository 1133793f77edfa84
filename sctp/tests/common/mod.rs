//! Shared harness for association integration tests: manual timers and
//! clock, recording transport and observer, a scripted peer and a
//! two-endpoint link.

#![allow(dead_code)]

use logging::{LogCapture, LogLevel, Logger};
use sctp::packet::{
    Chunk, CookieEchoChunk, DataChunk, HeartbeatChunk, InitChunk, Parameter, SackChunk,
    SctpPacket,
};
use sctp::{
    Association, AssociationConfig, AssociationEvent, AssociationState, Clock, CloseReason,
    Collaborators, DatagramTransport, ErrorKind, Observer, Ssn, StreamId, TimerHandle, TimerKind,
    TimerService, Timestamp, Tsn,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
struct TimerState {
    next: u64,
    armed: Vec<(TimerHandle, TimerKind, Duration)>,
}

/// Timer service whose timers only fire when a test says so.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers(Rc<RefCell<TimerState>>);

impl ManualTimers {
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.duration_of(kind).is_some()
    }

    pub fn duration_of(&self, kind: TimerKind) -> Option<Duration> {
        self.0
            .borrow()
            .armed
            .iter()
            .find(|(_, k, _)| *k == kind)
            .map(|(_, _, d)| *d)
    }

    pub fn armed_count(&self) -> usize {
        self.0.borrow().armed.len()
    }

    /// Disarms the timer of `kind` as if it had fired, returning its handle.
    pub fn expire(&self, kind: TimerKind) -> Option<TimerHandle> {
        let mut state = self.0.borrow_mut();
        let index = state.armed.iter().position(|(_, k, _)| *k == kind)?;
        Some(state.armed.remove(index).0)
    }
}

impl TimerService for ManualTimers {
    fn start_timer(&mut self, kind: TimerKind, duration: Duration) -> TimerHandle {
        let mut state = self.0.borrow_mut();
        state.next += 1;
        let handle = TimerHandle(state.next);
        state.armed.push((handle, kind, duration));
        handle
    }

    fn stop_timer(&mut self, handle: TimerHandle) {
        self.0.borrow_mut().armed.retain(|(h, _, _)| *h != handle);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by.as_millis() as u64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.0.get())
    }
}

/// Keeps undelivered datagrams plus a history of everything sent.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    pending: Rc<RefCell<Vec<Vec<u8>>>>,
    history: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn history(&self) -> Vec<Vec<u8>> {
        self.history.borrow().clone()
    }

    /// Decodes and drains the pending datagrams.
    pub fn take_packets(&self) -> Vec<SctpPacket> {
        self.take()
            .iter()
            .map(|d| SctpPacket::from_bytes(d).unwrap())
            .collect()
    }
}

impl DatagramTransport for RecordingTransport {
    fn send_datagram(&mut self, datagram: &[u8]) -> sctp::Result<()> {
        self.pending.borrow_mut().push(datagram.to_vec());
        self.history.borrow_mut().push(datagram.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingObserver(Rc<RefCell<Vec<AssociationEvent>>>);

impl RecordingObserver {
    pub fn events(&self) -> Vec<AssociationEvent> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn count(&self, predicate: impl Fn(&AssociationEvent) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| predicate(e)).count()
    }

    pub fn connected_count(&self) -> usize {
        self.count(|e| *e == AssociationEvent::Connected)
    }

    pub fn closed_reasons(&self) -> Vec<CloseReason> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                AssociationEvent::Closed(reason) => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                AssociationEvent::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                AssociationEvent::DataReceived(m) => Some(m.payload.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&mut self, event: AssociationEvent) {
        self.0.borrow_mut().push(event);
    }
}

/// An association wired to manual collaborators.
pub struct Endpoint {
    pub association: Association,
    pub timers: ManualTimers,
    pub clock: ManualClock,
    pub transport: RecordingTransport,
    pub observer: RecordingObserver,
    pub logs: LogCapture,
}

impl Endpoint {
    pub fn new(config: AssociationConfig) -> Self {
        let timers = ManualTimers::default();
        let clock = ManualClock::default();
        let transport = RecordingTransport::default();
        let observer = RecordingObserver::default();
        let (logger, logs) = Logger::in_memory(LogLevel::Trace);
        let association = Association::new(
            config,
            Collaborators {
                transport: Box::new(transport.clone()),
                timers: Box::new(timers.clone()),
                clock: Box::new(clock.clone()),
                observer: Box::new(observer.clone()),
            },
            logger,
        )
        .unwrap();
        Self {
            association,
            timers,
            clock,
            transport,
            observer,
            logs,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.association.state()
    }

    /// Fires the armed timer of `kind`. Returns false if none is armed.
    pub fn fire(&mut self, kind: TimerKind) -> bool {
        match self.timers.expire(kind) {
            Some(handle) => {
                self.association.handle_timeout(handle);
                true
            }
            None => false,
        }
    }

    pub fn assert_tcb_matches_state(&self) {
        assert_eq!(
            self.association.has_tcb(),
            self.state().has_tcb(),
            "TCB presence disagrees with state {}",
            self.state()
        );
    }
}

/// Delivers datagrams both ways until neither side has anything to send.
/// Returns the number of datagrams delivered.
pub fn pump(a: &mut Endpoint, b: &mut Endpoint) -> usize {
    let mut delivered = 0;
    for _ in 0..100_000 {
        let from_a = a.transport.take();
        let from_b = b.transport.take();
        if from_a.is_empty() && from_b.is_empty() {
            return delivered;
        }
        delivered += from_a.len() + from_b.len();
        for datagram in from_a {
            b.association.handle_inbound_frame(&datagram);
        }
        for datagram in from_b {
            a.association.handle_inbound_frame(&datagram);
        }
        a.assert_tcb_matches_state();
        b.assert_tcb_matches_state();
    }
    panic!("link did not go quiet");
}

/// Two endpoints that completed the handshake, with their events cleared.
pub fn connected_pair() -> (Endpoint, Endpoint) {
    connected_pair_with(AssociationConfig::default(), AssociationConfig::default())
}

pub fn connected_pair_with(a_config: AssociationConfig, b_config: AssociationConfig) -> (Endpoint, Endpoint) {
    let mut a = Endpoint::new(a_config);
    let mut b = Endpoint::new(b_config);
    a.association.connect();
    pump(&mut a, &mut b);
    assert_eq!(a.state(), AssociationState::Established);
    assert_eq!(b.state(), AssociationState::Established);
    a.observer.clear();
    b.observer.clear();
    (a, b)
}

/// A remote endpoint scripted frame by frame through the public codec.
pub struct FakePeer {
    pub tag: u32,
    pub initial_tsn: Tsn,
    pub next_tsn: Tsn,
    /// The association's verification tag, learned from its INIT
    pub remote_tag: u32,
    /// The association's first TSN, learned from its INIT
    pub remote_initial_tsn: Tsn,
    pub streams: u16,
    port: u16,
}

impl FakePeer {
    pub fn new() -> Self {
        Self {
            tag: 0x0BAD_CAFE,
            initial_tsn: Tsn(1000),
            next_tsn: Tsn(1000),
            remote_tag: 0,
            remote_initial_tsn: Tsn(0),
            streams: 16,
            port: 5000,
        }
    }

    pub fn packet(&self, verification_tag: u32, chunks: Vec<Chunk>) -> Vec<u8> {
        let mut packet = SctpPacket::new(self.port, self.port, verification_tag);
        for chunk in chunks {
            packet.add_chunk(chunk);
        }
        packet.to_bytes()
    }

    /// Packet addressed to the association.
    pub fn to_remote(&self, chunks: Vec<Chunk>) -> Vec<u8> {
        self.packet(self.remote_tag, chunks)
    }

    /// Drives `endpoint` from `connect()` to Established, answering with
    /// a cookie that identifies the peer as a C++ dcSCTP stack.
    pub fn handshake(&mut self, endpoint: &mut Endpoint) {
        endpoint.association.connect();
        let init = single_chunk(&endpoint.transport);
        let Chunk::Init(init) = init else {
            panic!("expected INIT, got {:?}", init);
        };
        self.remote_tag = init.initiate_tag;
        self.remote_initial_tsn = init.initial_tsn;

        let init_ack = Chunk::InitAck(InitChunk {
            initiate_tag: self.tag,
            a_rwnd: 131072,
            num_outbound_streams: self.streams,
            num_inbound_streams: self.streams,
            initial_tsn: self.initial_tsn,
            parameters: vec![Parameter::StateCookie(b"dcSCTP00 opaque cookie".to_vec())],
        });
        endpoint
            .association
            .handle_inbound_frame(&self.to_remote(vec![init_ack]));
        let echo = single_chunk(&endpoint.transport);
        assert!(matches!(echo, Chunk::CookieEcho(CookieEchoChunk { .. })));

        endpoint
            .association
            .handle_inbound_frame(&self.to_remote(vec![Chunk::CookieAck]));
        assert_eq!(endpoint.state(), AssociationState::Established);
    }

    pub fn data_chunk(
        &self,
        tsn: Tsn,
        stream: u16,
        ssn: u16,
        (beginning, ending): (bool, bool),
        payload: &[u8],
    ) -> Chunk {
        Chunk::Data(DataChunk {
            tsn,
            stream_id: StreamId(stream),
            ssn: Ssn(ssn),
            ppid: 51,
            unordered: false,
            beginning,
            ending,
            payload: payload.to_vec(),
        })
    }

    /// A complete single-fragment ordered message on the next TSN.
    pub fn message(&mut self, stream: u16, ssn: u16, payload: &[u8]) -> Vec<u8> {
        let tsn = self.next_tsn;
        self.next_tsn = tsn.next();
        let chunk = self.data_chunk(tsn, stream, ssn, (true, true), payload);
        self.to_remote(vec![chunk])
    }

    /// Acknowledges everything up to `cumulative_tsn_ack`.
    pub fn sack(&self, cumulative_tsn_ack: Tsn) -> Vec<u8> {
        self.to_remote(vec![Chunk::Sack(SackChunk {
            cumulative_tsn_ack,
            a_rwnd: 131072,
            gap_ack_blocks: Vec::new(),
            duplicate_tsns: Vec::new(),
        })])
    }

    pub fn heartbeat_ack(&self, heartbeat: &HeartbeatChunk) -> Vec<u8> {
        self.to_remote(vec![Chunk::HeartbeatAck(heartbeat.clone())])
    }
}

/// Takes exactly one pending datagram holding exactly one chunk.
pub fn single_chunk(transport: &RecordingTransport) -> Chunk {
    let mut packets = transport.take_packets();
    assert_eq!(packets.len(), 1, "expected one datagram, got {:?}", packets);
    let mut packet = packets.remove(0);
    assert_eq!(packet.chunks.len(), 1, "expected one chunk, got {:?}", packet.chunks);
    packet.chunks.remove(0)
}

/// All chunks in the datagrams currently pending.
pub fn pending_chunks(transport: &RecordingTransport) -> Vec<Chunk> {
    transport
        .take_packets()
        .into_iter()
        .flat_map(|p| p.chunks)
        .collect()
}
