//! SCTP association state machine.
//!
//! An [`Association`] is driven entirely from outside: public operations,
//! inbound frames and timer expirations each run to completion, then the
//! datagrams they produced go to the transport and the events they raised
//! go to the observer, in that order.
//!
//! ```text
//! Closed --connect--> CookieWait --INIT-ACK--> CookieEchoed --COOKIE-ACK--> Established
//! Closed --COOKIE-ECHO (valid cookie)--------------------------------------> Established
//! Established --shutdown, drained--> ShutdownSent --SHUTDOWN-ACK--> Closed
//! Established --shutdown--> ShutdownPending --drained--> ShutdownSent
//! Established --SHUTDOWN--> ShutdownReceived --drained, SHUTDOWN-ACK sent--> Closed
//! any --ABORT / fatal error / close--> Closed
//! ```

mod dispatch;
pub mod heartbeat;
pub mod state_cookie;
pub mod tcb;

pub use state_cookie::SctpImplementation;

use crate::config::AssociationConfig;
use crate::env::{Clock, Collaborators, DatagramTransport, Observer, TimerHandle, TimerService};
use crate::error::{ErrorKind, Result, SctpError};
use crate::events::{AssociationEvent, CloseReason, DeferredEvents};
use crate::packet::{
    AbortChunk, Chunk, CommonHeader, CookieEchoChunk, ErrorCause, InitChunk, PacketBuilder,
    ShutdownChunk,
};
use crate::timer::{Backoff, Expiry, Timer, TimerKind};
use crate::tx::SendOptions;
use crate::types::{StreamId, Timestamp, Tsn};
use logging::Logger;
use rand::Rng;
use std::fmt;
use std::time::Duration;
use tcb::{Tcb, TcbParams};

/// Externally visible association state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationState {
    /// No association
    Closed,
    /// INIT sent, waiting for INIT-ACK
    CookieWait,
    /// COOKIE-ECHO sent, waiting for COOKIE-ACK
    CookieEchoed,
    /// Handshake complete, data flows both ways
    Established,
    /// Shutdown requested, draining outstanding data
    ShutdownPending,
    /// SHUTDOWN sent, waiting for SHUTDOWN-ACK
    ShutdownSent,
    /// SHUTDOWN received, draining before SHUTDOWN-ACK
    ShutdownReceived,
    /// Part of the state set; this implementation closes right after
    /// sending SHUTDOWN-ACK and never reports it.
    ShutdownAckSent,
}

impl AssociationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationState::Closed => "CLOSED",
            AssociationState::CookieWait => "COOKIE-WAIT",
            AssociationState::CookieEchoed => "COOKIE-ECHOED",
            AssociationState::Established => "ESTABLISHED",
            AssociationState::ShutdownPending => "SHUTDOWN-PENDING",
            AssociationState::ShutdownSent => "SHUTDOWN-SENT",
            AssociationState::ShutdownReceived => "SHUTDOWN-RECEIVED",
            AssociationState::ShutdownAckSent => "SHUTDOWN-ACK-SENT",
        }
    }

    /// A TCB exists exactly in these states.
    pub fn has_tcb(&self) -> bool {
        matches!(
            self,
            AssociationState::Established
                | AssociationState::ShutdownPending
                | AssociationState::ShutdownSent
                | AssociationState::ShutdownReceived
        )
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct CookieWaitState {
    local_tag: u32,
    initial_tsn: Tsn,
    t1_init: Timer,
}

#[derive(Debug)]
struct CookieEchoedState {
    params: TcbParams,
    cookie: Vec<u8>,
    t1_cookie: Timer,
}

#[derive(Debug)]
struct ShutdownSentState {
    tcb: Box<Tcb>,
    t2_shutdown: Timer,
}

#[derive(Debug)]
enum State {
    Closed,
    CookieWait(CookieWaitState),
    CookieEchoed(CookieEchoedState),
    Established(Box<Tcb>),
    ShutdownPending(Box<Tcb>),
    ShutdownSent(ShutdownSentState),
    ShutdownReceived(Box<Tcb>),
}

impl State {
    fn public(&self) -> AssociationState {
        match self {
            State::Closed => AssociationState::Closed,
            State::CookieWait(_) => AssociationState::CookieWait,
            State::CookieEchoed(_) => AssociationState::CookieEchoed,
            State::Established(_) => AssociationState::Established,
            State::ShutdownPending(_) => AssociationState::ShutdownPending,
            State::ShutdownSent(_) => AssociationState::ShutdownSent,
            State::ShutdownReceived(_) => AssociationState::ShutdownReceived,
        }
    }

    fn tcb(&self) -> Option<&Tcb> {
        match self {
            State::Established(tcb) | State::ShutdownPending(tcb) | State::ShutdownReceived(tcb) => {
                Some(tcb)
            }
            State::ShutdownSent(s) => Some(&s.tcb),
            State::Closed | State::CookieWait(_) | State::CookieEchoed(_) => None,
        }
    }

    fn tcb_mut(&mut self) -> Option<&mut Tcb> {
        match self {
            State::Established(tcb) | State::ShutdownPending(tcb) | State::ShutdownReceived(tcb) => {
                Some(tcb)
            }
            State::ShutdownSent(s) => Some(&mut s.tcb),
            State::Closed | State::CookieWait(_) | State::CookieEchoed(_) => None,
        }
    }

    fn local_tag(&self) -> Option<u32> {
        match self {
            State::Closed => None,
            State::CookieWait(s) => Some(s.local_tag),
            State::CookieEchoed(s) => Some(s.params.local_tag),
            _ => self.tcb().map(Tcb::local_tag),
        }
    }

    fn peer_tag(&self) -> Option<u32> {
        match self {
            State::CookieEchoed(s) => Some(s.params.peer_tag),
            _ => self.tcb().map(Tcb::peer_tag),
        }
    }
}

struct Context {
    config: AssociationConfig,
    base_logger: Logger,
    logger: Logger,
    transport: Box<dyn DatagramTransport>,
    timers: Box<dyn TimerService>,
    clock: Box<dyn Clock>,
    observer: Box<dyn Observer>,
    events: DeferredEvents,
    outbound: Vec<Vec<u8>>,
}

impl Context {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Tags log lines with the local verification tag from here on.
    fn use_local_tag(&mut self, tag: u32) {
        self.logger = self.base_logger.for_component(&format!("sctp[{:08x}]", tag));
    }

    /// One datagram carrying `chunk` under `verification_tag`.
    fn packet(&self, verification_tag: u32, chunk: &Chunk) -> Vec<u8> {
        let header = CommonHeader {
            source_port: self.config.local_port,
            destination_port: self.config.remote_port,
            verification_tag,
        };
        let mut builder = PacketBuilder::new(header, self.config.mtu);
        builder.add(chunk);
        builder.build()
    }

    fn backoff_timer(&self, kind: TimerKind, duration: Duration, max_restarts: u32) -> Timer {
        Timer::new(
            kind,
            duration,
            Backoff::Exponential {
                multiplier: self.config.backoff_multiplier,
                max: self.config.max_timer_backoff,
            },
            Some(max_restarts),
        )
    }
}

/// One SCTP association endpoint.
///
/// Single-threaded and non-reentrant: every method runs to completion and
/// the observer is only called after the association's state is settled.
pub struct Association {
    state: State,
    ctx: Context,
}

impl Association {
    /// Creates a closed association.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidConfig` if `config` fails validation.
    pub fn new(config: AssociationConfig, collaborators: Collaborators, logger: Logger) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            transport,
            timers,
            clock,
            observer,
        } = collaborators;
        Ok(Self {
            state: State::Closed,
            ctx: Context {
                config,
                logger: logger.for_component("sctp"),
                base_logger: logger,
                transport,
                timers,
                clock,
                observer,
                events: DeferredEvents::default(),
                outbound: Vec::new(),
            },
        })
    }

    pub fn state(&self) -> AssociationState {
        self.state.public()
    }

    /// Local verification tag, zero while none is chosen.
    pub fn verification_tag(&self) -> u32 {
        self.state.local_tag().unwrap_or(0)
    }

    pub fn has_tcb(&self) -> bool {
        self.state.tcb().is_some()
    }

    /// Bytes queued for sending and not yet assigned a TSN.
    pub fn buffered_amount(&self) -> usize {
        self.state.tcb().map_or(0, Tcb::buffered_amount)
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.state
            .tcb()
            .map_or(self.ctx.config.rto_initial, |tcb| tcb.retransmission.rto())
    }

    /// Peer stack inferred from its state cookie. Only the active side sees
    /// a peer cookie, so passive opens report `Unknown`.
    pub fn peer_implementation(&self) -> SctpImplementation {
        match &self.state {
            State::CookieEchoed(s) => s.params.peer_implementation,
            other => other
                .tcb()
                .map_or(SctpImplementation::Unknown, |tcb| tcb.params.peer_implementation),
        }
    }

    /// Starts the four-way handshake by sending INIT.
    pub fn connect(&mut self) {
        if !matches!(self.state, State::Closed) {
            let message = format!("Cannot connect in state {}", self.state());
            self.ctx.events.error(ErrorKind::WrongSequence, message);
            return self.finish();
        }

        let local_tag = rand::thread_rng().gen_range(1..=u32::MAX);
        let initial_tsn = Tsn(rand::random());
        self.ctx.use_local_tag(local_tag);

        let mut t1_init = self.ctx.backoff_timer(
            TimerKind::T1Init,
            self.ctx.config.t1_init_timeout,
            self.ctx.config.max_init_retransmits,
        );
        t1_init.start(self.ctx.timers.as_mut());
        self.transition(|_| {
            State::CookieWait(CookieWaitState {
                local_tag,
                initial_tsn,
                t1_init,
            })
        });
        self.ctx.logger.info("Connecting: sending INIT");
        self.send_init();
        self.finish();
    }

    /// Queues one message.
    ///
    /// Rejections are also reported as an `Error` event carrying the
    /// message's lifecycle id, followed by its `LifecycleEnd`.
    ///
    /// # Errors
    ///
    /// - `SctpError::NotConnected` if there is no TCB
    /// - `SctpError::ShuttingDown` once shutdown has started
    /// - `SctpError::MessageEmpty` / `MessageTooLarge` for bad payload sizes
    /// - `SctpError::InvalidStream` if the stream was not negotiated
    /// - `SctpError::ResourceExhaustion` if the send buffer is full
    pub fn send(&mut self, stream_id: StreamId, payload: &[u8], options: &SendOptions) -> Result<()> {
        let result = self.enqueue(stream_id, payload, options);
        if let Err(err) = &result {
            self.ctx
                .logger
                .debug(&format!("Rejected message on stream {}: {}", stream_id, err));
            self.ctx.events.push(AssociationEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
                lifecycle_id: options.lifecycle_id,
            });
            if let Some(id) = options.lifecycle_id {
                self.ctx.events.push(AssociationEvent::LifecycleEnd(id));
            }
        }
        self.finish();
        result
    }

    fn enqueue(&mut self, stream_id: StreamId, payload: &[u8], options: &SendOptions) -> Result<()> {
        let max_message_size = self.ctx.config.max_message_size;
        let tcb = match &mut self.state {
            State::Established(tcb) => tcb,
            State::ShutdownPending(_) | State::ShutdownSent(_) | State::ShutdownReceived(_) => {
                return Err(SctpError::ShuttingDown);
            }
            State::Closed | State::CookieWait(_) | State::CookieEchoed(_) => {
                return Err(SctpError::NotConnected);
            }
        };
        if payload.is_empty() {
            return Err(SctpError::MessageEmpty);
        }
        if payload.len() > max_message_size {
            return Err(SctpError::MessageTooLarge {
                size: payload.len(),
                max: max_message_size,
            });
        }
        if stream_id.0 >= tcb.params.outbound_streams {
            return Err(SctpError::InvalidStream(stream_id.0));
        }
        tcb.send_queue.enqueue(stream_id, payload, options)?;
        Ok(())
    }

    /// Starts a graceful shutdown once everything sent has been acknowledged.
    pub fn shutdown(&mut self) {
        match &self.state {
            State::Established(tcb) if tcb.is_drained() => self.enter_shutdown_sent(),
            State::Established(_) => {
                self.ctx.logger.info("Shutdown requested, waiting for data to drain");
                self.transition(|state| match state {
                    State::Established(tcb) => State::ShutdownPending(tcb),
                    other => other,
                });
            }
            _ => {
                let message = format!("Cannot shut down in state {}", self.state());
                self.ctx.events.error(ErrorKind::WrongSequence, message);
            }
        }
        self.finish();
    }

    /// Abortive close. Sends ABORT if a TCB exists. Idempotent.
    pub fn close(&mut self) {
        if !matches!(self.state, State::Closed) {
            if let Some(tcb) = self.state.tcb() {
                let abort = Chunk::Abort(AbortChunk {
                    tag_reflected: false,
                    causes: vec![ErrorCause::UserInitiatedAbort("Close called".to_string())],
                });
                self.ctx.outbound.push(tcb.single_chunk_packet(&abort));
            }
            self.teardown(
                CloseReason::UserAbort,
                Some((ErrorKind::UserAbort, "Association closed by user".to_string())),
            );
        }
        self.finish();
    }

    /// Processes one datagram received from the peer.
    pub fn handle_inbound_frame(&mut self, frame: &[u8]) {
        self.process_frame(frame);
        self.finish();
    }

    /// Processes the expiry of a timer started through the timer service.
    /// Handles this association no longer owns are ignored.
    pub fn handle_timeout(&mut self, handle: TimerHandle) {
        match self.timer_kind(handle) {
            Some(TimerKind::T1Init) => self.on_t1_init_expired(),
            Some(TimerKind::T1Cookie) => self.on_t1_cookie_expired(),
            Some(TimerKind::T2Shutdown) => self.on_t2_shutdown_expired(),
            Some(TimerKind::T3Rtx) => self.on_t3_rtx_expired(),
            Some(TimerKind::HeartbeatInterval) => self.on_heartbeat_interval_expired(),
            Some(TimerKind::HeartbeatTimeout) => self.on_heartbeat_timeout_expired(),
            None => self
                .ctx
                .logger
                .debug(&format!("Ignoring stale timer {:?}", handle)),
        }
        self.finish();
    }

    fn timer_kind(&self, handle: TimerHandle) -> Option<TimerKind> {
        match &self.state {
            State::CookieWait(s) if s.t1_init.matches(handle) => return Some(TimerKind::T1Init),
            State::CookieEchoed(s) if s.t1_cookie.matches(handle) => {
                return Some(TimerKind::T1Cookie);
            }
            State::ShutdownSent(s) if s.t2_shutdown.matches(handle) => {
                return Some(TimerKind::T2Shutdown);
            }
            _ => {}
        }
        let tcb = self.state.tcb()?;
        if tcb.t3_rtx.matches(handle) {
            Some(TimerKind::T3Rtx)
        } else if tcb.heartbeat.is_interval(handle) {
            Some(TimerKind::HeartbeatInterval)
        } else if tcb.heartbeat.is_timeout(handle) {
            Some(TimerKind::HeartbeatTimeout)
        } else {
            None
        }
    }

    fn on_t1_init_expired(&mut self) {
        let State::CookieWait(s) = &mut self.state else {
            return;
        };
        match s.t1_init.expire() {
            Expiry::Retry => {
                s.t1_init.rearm(self.ctx.timers.as_mut());
                self.ctx.logger.debug(&format!(
                    "T1-init expired, resending INIT (attempt {})",
                    s.t1_init.expirations() + 1
                ));
                self.send_init();
            }
            Expiry::Exhausted => self.fail(
                ErrorKind::RetransmissionLimitExceeded,
                "No INIT-ACK received".to_string(),
            ),
        }
    }

    fn on_t1_cookie_expired(&mut self) {
        let State::CookieEchoed(s) = &mut self.state else {
            return;
        };
        match s.t1_cookie.expire() {
            Expiry::Retry => {
                s.t1_cookie.rearm(self.ctx.timers.as_mut());
                self.ctx
                    .logger
                    .debug("T1-cookie expired, resending COOKIE-ECHO");
                self.send_cookie_echo();
            }
            Expiry::Exhausted => self.fail(
                ErrorKind::RetransmissionLimitExceeded,
                "No COOKIE-ACK received".to_string(),
            ),
        }
    }

    fn on_t2_shutdown_expired(&mut self) {
        let State::ShutdownSent(s) = &mut self.state else {
            return;
        };
        match s.t2_shutdown.expire() {
            Expiry::Retry => {
                s.t2_shutdown.rearm(self.ctx.timers.as_mut());
                self.ctx.logger.debug("T2-shutdown expired, resending SHUTDOWN");
                self.send_shutdown();
            }
            Expiry::Exhausted => self.fail(
                ErrorKind::RetransmissionLimitExceeded,
                "No SHUTDOWN-ACK received".to_string(),
            ),
        }
    }

    fn on_t3_rtx_expired(&mut self) {
        let multiplier = self.ctx.config.backoff_multiplier;
        let Some(tcb) = self.state.tcb_mut() else {
            return;
        };
        tcb.t3_rtx.expire();
        let marked = match tcb.retransmission.handle_t3_expiry(multiplier) {
            Ok(marked) => marked,
            Err(err) => return self.fail(ErrorKind::RetransmissionLimitExceeded, err.to_string()),
        };
        if tcb.tx_errors.increment() {
            return self.fail(
                ErrorKind::RetransmissionLimitExceeded,
                "Too many retransmissions".to_string(),
            );
        }
        self.ctx.logger.debug(&format!(
            "T3-rtx expired: retransmitting {} chunks, RTO now {:?}",
            marked,
            tcb.retransmission.rto()
        ));
    }

    fn on_heartbeat_interval_expired(&mut self) {
        let now = self.ctx.now();
        let Some(tcb) = self.state.tcb_mut() else {
            return;
        };
        let idle = tcb.is_drained();
        let rto = tcb.retransmission.rto();
        if let Some(probe) = tcb
            .heartbeat
            .on_interval_expired(now, idle, rto, self.ctx.timers.as_mut())
        {
            self.ctx.logger.trace("Sending HEARTBEAT");
            let packet = tcb.single_chunk_packet(&Chunk::Heartbeat(probe));
            self.ctx.outbound.push(packet);
        }
    }

    fn on_heartbeat_timeout_expired(&mut self) {
        let Some(tcb) = self.state.tcb_mut() else {
            return;
        };
        let rto = tcb.retransmission.rto();
        let Some(probe) = tcb.heartbeat.on_timeout_expired(rto, self.ctx.timers.as_mut()) else {
            return;
        };
        if tcb.tx_errors.increment() {
            return self.fail(
                ErrorKind::RetransmissionLimitExceeded,
                "HEARTBEAT not acknowledged".to_string(),
            );
        }
        self.ctx.logger.debug(&format!(
            "HEARTBEAT unanswered ({} consecutive errors), resending",
            tcb.tx_errors.count()
        ));
        let packet = tcb.single_chunk_packet(&Chunk::Heartbeat(probe));
        self.ctx.outbound.push(packet);
    }

    /// Replaces the state through `f`, logging the change.
    fn transition(&mut self, f: impl FnOnce(State) -> State) {
        let from = self.state.public();
        let previous = std::mem::replace(&mut self.state, State::Closed);
        self.state = f(previous);
        let to = self.state.public();
        if from != to {
            self.ctx
                .logger
                .info(&format!("State changed: {} -> {}", from, to));
        }
    }

    fn send_init(&mut self) {
        let State::CookieWait(s) = &self.state else {
            return;
        };
        let config = &self.ctx.config;
        let init = Chunk::Init(InitChunk {
            initiate_tag: s.local_tag,
            a_rwnd: config.max_receiver_window,
            num_outbound_streams: config.num_outbound_streams,
            num_inbound_streams: config.num_inbound_streams,
            initial_tsn: s.initial_tsn,
            parameters: Vec::new(),
        });
        let packet = self.ctx.packet(0, &init);
        self.ctx.outbound.push(packet);
    }

    fn send_cookie_echo(&mut self) {
        let State::CookieEchoed(s) = &self.state else {
            return;
        };
        let echo = Chunk::CookieEcho(CookieEchoChunk {
            cookie: s.cookie.clone(),
        });
        let packet = self.ctx.packet(s.params.peer_tag, &echo);
        self.ctx.outbound.push(packet);
    }

    fn send_shutdown(&mut self) {
        let State::ShutdownSent(s) = &self.state else {
            return;
        };
        let shutdown = Chunk::Shutdown(ShutdownChunk {
            cumulative_tsn_ack: s.tcb.data_tracker.cumulative_tsn_ack(),
        });
        self.ctx.outbound.push(s.tcb.single_chunk_packet(&shutdown));
    }

    /// Builds the TCB and enters Established.
    fn establish(&mut self, params: TcbParams) {
        self.ctx.use_local_tag(params.local_tag);
        let mut tcb = Box::new(Tcb::new(&self.ctx.config, params));
        tcb.heartbeat.start(self.ctx.timers.as_mut());
        self.transition(|_| State::Established(tcb));
        self.ctx.logger.info(&format!(
            "Association established: peer tag {:08x}, {} outbound / {} inbound streams, peer stack {}",
            params.peer_tag,
            params.outbound_streams,
            params.inbound_streams,
            params.peer_implementation
        ));
        self.ctx.events.push(AssociationEvent::Connected);
    }

    fn enter_shutdown_sent(&mut self) {
        let mut t2_shutdown = self.ctx.backoff_timer(
            TimerKind::T2Shutdown,
            self.ctx.config.t2_shutdown_timeout,
            self.ctx.config.max_retransmissions,
        );
        t2_shutdown.start(self.ctx.timers.as_mut());
        self.transition(move |state| match state {
            State::Established(tcb) | State::ShutdownPending(tcb) => {
                State::ShutdownSent(ShutdownSentState { tcb, t2_shutdown })
            }
            other => other,
        });
        self.ctx.logger.info("Sending SHUTDOWN");
        self.send_shutdown();
    }

    /// Moves a draining shutdown forward once nothing is left in flight.
    fn maybe_progress_shutdown(&mut self) {
        match &self.state {
            State::ShutdownPending(tcb) if tcb.is_drained() => self.enter_shutdown_sent(),
            State::ShutdownReceived(tcb) if tcb.is_drained() => {
                self.ctx
                    .outbound
                    .push(tcb.single_chunk_packet(&Chunk::ShutdownAck));
                self.ctx.logger.info("Sent SHUTDOWN-ACK");
                self.teardown(CloseReason::Graceful, None);
            }
            _ => {}
        }
    }

    /// Sends ABORT with `cause` when the peer's tag is known, then fails.
    fn abort_for(&mut self, kind: ErrorKind, message: String, cause: ErrorCause) {
        if let Some(peer_tag) = self.state.peer_tag() {
            let abort = Chunk::Abort(AbortChunk {
                tag_reflected: false,
                causes: vec![cause],
            });
            let packet = self.ctx.packet(peer_tag, &abort);
            self.ctx.outbound.push(packet);
        }
        self.fail(kind, message);
    }

    fn fail(&mut self, kind: ErrorKind, message: String) {
        self.teardown(CloseReason::Fatal(kind), Some((kind, message)));
    }

    /// The single path into Closed: stops every timer, reports the error,
    /// releases tracked messages, reports the close, then drops the TCB.
    fn teardown(&mut self, reason: CloseReason, error: Option<(ErrorKind, String)>) {
        if matches!(self.state, State::Closed) {
            return;
        }
        let timers = self.ctx.timers.as_mut();
        match &mut self.state {
            State::CookieWait(s) => s.t1_init.stop(timers),
            State::CookieEchoed(s) => s.t1_cookie.stop(timers),
            State::ShutdownSent(s) => {
                s.t2_shutdown.stop(timers);
                s.tcb.stop_timers(timers);
            }
            State::Established(tcb) | State::ShutdownPending(tcb) | State::ShutdownReceived(tcb) => {
                tcb.stop_timers(timers)
            }
            State::Closed => {}
        }

        if let Some((kind, message)) = error {
            self.ctx
                .logger
                .warn(&format!("Closing association: {}: {}", kind, message));
            self.ctx.events.error(kind, message);
        }
        if let Some(tcb) = self.state.tcb_mut() {
            for id in tcb.release_messages() {
                self.ctx.events.push(AssociationEvent::LifecycleEnd(id));
            }
        }
        self.ctx.logger.info(&format!("Association closed: {}", reason));
        self.ctx.events.push(AssociationEvent::Closed(reason));
        self.transition(|_| State::Closed);
    }

    /// Ends every public operation: sends what the TCB has queued, advances
    /// a pending shutdown, hands datagrams to the transport and delivers
    /// deferred events.
    fn finish(&mut self) {
        self.send_buffered_packets();
        self.maybe_progress_shutdown();
        self.flush_outbound();
        self.ctx.events.flush(self.ctx.observer.as_mut());
    }

    fn send_buffered_packets(&mut self) {
        let now = self.ctx.now();
        let Some(tcb) = self.state.tcb_mut() else {
            return;
        };
        let packets = tcb.produce_data_packets(now, self.ctx.timers.as_mut());
        self.ctx.outbound.extend(packets);
    }

    fn flush_outbound(&mut self) {
        for packet in std::mem::take(&mut self.ctx.outbound) {
            self.ctx
                .logger
                .trace(&format!("Sending packet ({} bytes)", packet.len()));
            if let Err(err) = self.ctx.transport.send_datagram(&packet) {
                self.ctx
                    .logger
                    .warn(&format!("Failed to send packet: {}", err));
            }
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("state", &self.state())
            .field("verification_tag", &format_args!("{:08x}", self.verification_tag()))
            .finish()
    }
}
