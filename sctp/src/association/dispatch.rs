//! Inbound packet handling.
//!
//! A frame is validated as a whole (checksum, framing, verification tag)
//! before any chunk is acted on. Chunks are then handled in order; a fatal
//! outcome stops processing of the rest of the packet.

use super::heartbeat::HeartbeatAck;
use super::state_cookie::{SctpImplementation, StateCookie};
use super::tcb::TcbParams;
use super::{Association, CookieEchoedState, CookieWaitState, State};
use crate::error::{ErrorKind, SctpError};
use crate::events::{AssociationEvent, CloseReason};
use crate::packet::{
    AbortChunk, Chunk, ChunkType, CommonHeader, DataChunk, ErrorChunk, ErrorCause,
    HeartbeatChunk, InitChunk, Parameter, RawChunk, SackChunk, ShutdownChunk,
    ShutdownCompleteChunk, parse_frame,
};
use crate::rx::TsnStatus;
use crate::timer::TimerKind;
use crate::types::Tsn;
use rand::Rng;

/// What to do with a chunk type this implementation does not understand,
/// from the two high bits of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecognizedChunkAction {
    /// Keep processing the rest of the packet
    pub skip: bool,
    /// Tell the peer with an ERROR chunk
    pub report: bool,
}

impl UnrecognizedChunkAction {
    pub fn for_type(chunk_type: u8) -> Self {
        Self {
            skip: chunk_type & 0x80 != 0,
            report: chunk_type & 0x40 != 0,
        }
    }
}

impl Association {
    pub(super) fn process_frame(&mut self, frame: &[u8]) {
        let (header, chunks) = match parse_frame(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.ctx
                    .logger
                    .debug(&format!("Dropping malformed frame: {}", err));
                self.ctx.events.error(ErrorKind::ParseFailed, err.to_string());
                return;
            }
        };
        self.ctx.logger.trace(&format!(
            "Received packet: {} bytes, {} chunks, tag {:08x}",
            frame.len(),
            chunks.len(),
            header.verification_tag
        ));

        if !self.accepts_tag(&header, &chunks) {
            self.ctx.logger.debug(&format!(
                "Dropping packet with verification tag {:08x} in state {}",
                header.verification_tag,
                self.state()
            ));
            return;
        }

        let mut carried_data = false;
        for raw in &chunks {
            let chunk = match Chunk::parse(raw) {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.ctx.events.error(
                        ErrorKind::ParseFailed,
                        format!("Failed to parse chunk type {}: {}", raw.chunk_type, err),
                    );
                    if UnrecognizedChunkAction::for_type(raw.chunk_type).skip {
                        continue;
                    }
                    break;
                }
            };
            carried_data |= matches!(chunk, Chunk::Data(_));

            let keep_going = self.dispatch(chunk, raw, &header);
            // Nothing after a chunk that leaves us closed may be processed
            if !keep_going || matches!(self.state, State::Closed) {
                break;
            }
        }

        if carried_data {
            self.repeat_shutdown_after_data();
        }
    }

    /// Verification tag rules. INIT must come alone with a zero tag. ABORT
    /// and SHUTDOWN-COMPLETE with the T bit carry the peer's tag. A
    /// COOKIE-ECHO reaching a closed association is checked against its
    /// cookie, and an out-of-the-blue SHUTDOWN-ACK arriving alone is always
    /// answered. Everything else must carry our tag.
    fn accepts_tag(&self, header: &CommonHeader, chunks: &[RawChunk<'_>]) -> bool {
        let Some(first) = chunks.first() else {
            return false;
        };
        let tag = header.verification_tag;
        let local_tag = self.state.local_tag();
        match ChunkType::from_u8(first.chunk_type) {
            Some(ChunkType::Init) => tag == 0 && chunks.len() == 1,
            Some(ChunkType::Abort) | Some(ChunkType::ShutdownComplete) if first.flags & 0x01 != 0 => {
                self.state.peer_tag() == Some(tag)
            }
            Some(ChunkType::CookieEcho) if matches!(self.state, State::Closed) => true,
            Some(ChunkType::ShutdownAck) if self.state.tcb().is_none() && chunks.len() == 1 => {
                true
            }
            _ => local_tag == Some(tag),
        }
    }

    /// Routes one chunk. Returns false if the rest of the packet must be
    /// skipped.
    fn dispatch(&mut self, chunk: Chunk, raw: &RawChunk<'_>, header: &CommonHeader) -> bool {
        match chunk {
            Chunk::Data(data) => self.handle_data(data),
            Chunk::Init(init) => self.handle_init(init),
            Chunk::InitAck(init_ack) => self.handle_init_ack(init_ack),
            Chunk::Sack(sack) => self.handle_sack(&sack),
            Chunk::Heartbeat(heartbeat) => self.handle_heartbeat(heartbeat),
            Chunk::HeartbeatAck(ack) => self.handle_heartbeat_ack(&ack),
            Chunk::Abort(abort) => self.handle_abort(abort),
            Chunk::Shutdown(shutdown) => self.handle_shutdown(shutdown),
            Chunk::ShutdownAck => self.handle_shutdown_ack(header),
            Chunk::Error(error) => self.handle_error(&error),
            Chunk::CookieEcho(echo) => self.handle_cookie_echo(&echo.cookie, header),
            Chunk::CookieAck => self.handle_cookie_ack(),
            Chunk::ShutdownComplete(_) => self
                .ctx
                .logger
                .debug("Ignoring SHUTDOWN-COMPLETE, association already closed"),
            Chunk::Unknown(_) => return self.handle_unrecognized(raw),
        }
        true
    }

    fn handle_data(&mut self, data: DataChunk) {
        let Some(tcb) = self.state.tcb_mut() else {
            self.ctx.events.error(
                ErrorKind::NotConnected,
                format!("Received DATA (TSN {}) without an association", data.tsn),
            );
            return;
        };
        if data.payload.is_empty() {
            return self.abort_for(
                ErrorKind::ProtocolViolation,
                format!("DATA chunk with TSN {} carries no user data", data.tsn),
                ErrorCause::NoUserData(data.tsn),
            );
        }

        tcb.sack_pending = true;
        if data.stream_id.0 >= tcb.params.inbound_streams {
            // Acknowledged so the peer stops resending it, never delivered
            tcb.data_tracker.observe(data.tsn);
            let error = Chunk::Error(ErrorChunk {
                causes: vec![ErrorCause::InvalidStreamIdentifier(data.stream_id)],
            });
            self.ctx.outbound.push(tcb.single_chunk_packet(&error));
            self.ctx.logger.debug(&format!(
                "DATA on stream {} beyond the {} negotiated",
                data.stream_id, tcb.params.inbound_streams
            ));
            return;
        }

        match tcb.data_tracker.observe(data.tsn) {
            TsnStatus::New => {}
            TsnStatus::Duplicate => {
                self.ctx
                    .logger
                    .trace(&format!("Duplicate DATA TSN {}", data.tsn));
                return;
            }
            TsnStatus::OutOfWindow => {
                self.ctx.logger.debug(&format!(
                    "Dropping DATA TSN {} outside the receive window",
                    data.tsn
                ));
                return;
            }
        }

        let key = tcb.data_tracker.unwrapped(data.tsn);
        if let Err(err) = tcb.reassembly.add(key, data) {
            return self.abort_for(
                ErrorKind::ResourceExhaustion,
                err.to_string(),
                ErrorCause::OutOfResource,
            );
        }
        while let Some(message) = tcb.reassembly.pop_message() {
            self.ctx.events.push(AssociationEvent::DataReceived(message));
        }
    }

    fn handle_init(&mut self, init: InitChunk) {
        if init.initiate_tag == 0 || init.num_outbound_streams == 0 || init.num_inbound_streams == 0 {
            self.ctx.events.error(
                ErrorKind::ProtocolViolation,
                "INIT with zero initiate tag or stream count",
            );
            return;
        }
        let (local_tag, local_initial_tsn) = match &self.state {
            State::Closed => (
                rand::thread_rng().gen_range(1..=u32::MAX),
                Tsn(rand::random()),
            ),
            State::CookieWait(CookieWaitState {
                local_tag,
                initial_tsn,
                ..
            }) => (*local_tag, *initial_tsn),
            State::CookieEchoed(s) => (s.params.local_tag, s.params.local_initial_tsn),
            _ => {
                self.ctx.logger.debug(&format!(
                    "Ignoring INIT in state {}, restarts are not supported",
                    self.state()
                ));
                return;
            }
        };

        let config = &self.ctx.config;
        let cookie = StateCookie {
            peer_tag: init.initiate_tag,
            local_tag,
            peer_initial_tsn: init.initial_tsn,
            local_initial_tsn,
            peer_a_rwnd: init.a_rwnd,
            inbound_streams: config.num_inbound_streams.min(init.num_outbound_streams),
            outbound_streams: config.num_outbound_streams.min(init.num_inbound_streams),
            created_at: self.ctx.now(),
        };
        let sealed = match cookie.seal(&config.cookie_secret) {
            Ok(sealed) => sealed,
            Err(err) => {
                self.ctx.events.error(err.kind(), err.to_string());
                return;
            }
        };

        let mut parameters = vec![Parameter::StateCookie(sealed)];
        parameters.extend(Parameter::unrecognized_report(&init.parameters));
        let init_ack = Chunk::InitAck(InitChunk {
            initiate_tag: local_tag,
            a_rwnd: config.max_receiver_window,
            num_outbound_streams: config.num_outbound_streams,
            num_inbound_streams: config.num_inbound_streams,
            initial_tsn: local_initial_tsn,
            parameters,
        });
        let packet = self.ctx.packet(init.initiate_tag, &init_ack);
        self.ctx.outbound.push(packet);
        self.ctx.logger.info(&format!(
            "Answered INIT from peer tag {:08x} with INIT-ACK",
            init.initiate_tag
        ));
    }

    fn handle_init_ack(&mut self, init_ack: InitChunk) {
        let State::CookieWait(s) = &mut self.state else {
            self.ctx
                .logger
                .debug(&format!("Ignoring INIT-ACK in state {}", self.state()));
            return;
        };
        let Some(cookie) = init_ack.state_cookie() else {
            self.ctx
                .events
                .error(ErrorKind::ProtocolViolation, "INIT-ACK without a state cookie");
            return;
        };
        s.t1_init.stop(self.ctx.timers.as_mut());

        let config = &self.ctx.config;
        let params = TcbParams {
            local_tag: s.local_tag,
            peer_tag: init_ack.initiate_tag,
            local_initial_tsn: s.initial_tsn,
            peer_initial_tsn: init_ack.initial_tsn,
            peer_a_rwnd: init_ack.a_rwnd,
            inbound_streams: config.num_inbound_streams.min(init_ack.num_outbound_streams),
            outbound_streams: config.num_outbound_streams.min(init_ack.num_inbound_streams),
            peer_implementation: SctpImplementation::from_cookie(cookie),
        };
        let cookie = cookie.to_vec();
        let mut t1_cookie = self.ctx.backoff_timer(
            TimerKind::T1Cookie,
            config.t1_cookie_timeout,
            config.max_init_retransmits,
        );
        t1_cookie.start(self.ctx.timers.as_mut());

        self.transition(move |_| {
            State::CookieEchoed(CookieEchoedState {
                params,
                cookie,
                t1_cookie,
            })
        });
        self.ctx.logger.debug(&format!(
            "Received INIT-ACK from {} peer, echoing cookie",
            params.peer_implementation
        ));
        self.send_cookie_echo();
    }

    fn handle_cookie_echo(&mut self, cookie: &[u8], header: &CommonHeader) {
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let cookie = match StateCookie::open(cookie, &config.cookie_secret, now, config.valid_cookie_life) {
            Ok(cookie) => cookie,
            Err(err) => {
                self.ctx
                    .events
                    .error(ErrorKind::ParseFailed, format!("Invalid COOKIE-ECHO: {}", err));
                return;
            }
        };
        if header.verification_tag != cookie.local_tag {
            self.ctx.logger.debug(&format!(
                "Dropping COOKIE-ECHO: packet tag {:08x} does not match cookie tag {:08x}",
                header.verification_tag, cookie.local_tag
            ));
            return;
        }

        if let Some(tcb) = self.state.tcb() {
            if tcb.local_tag() == cookie.local_tag && tcb.peer_tag() == cookie.peer_tag {
                self.ctx.logger.debug("Duplicate COOKIE-ECHO, resending COOKIE-ACK");
                self.ctx
                    .outbound
                    .push(tcb.single_chunk_packet(&Chunk::CookieAck));
            } else {
                self.ctx
                    .logger
                    .debug("Ignoring COOKIE-ECHO for another association, restarts are not supported");
            }
            return;
        }

        let timers = self.ctx.timers.as_mut();
        let peer_implementation = match &mut self.state {
            State::CookieWait(s) => {
                s.t1_init.stop(timers);
                SctpImplementation::Unknown
            }
            State::CookieEchoed(s) => {
                s.t1_cookie.stop(timers);
                s.params.peer_implementation
            }
            _ => SctpImplementation::Unknown,
        };

        self.establish(TcbParams {
            local_tag: cookie.local_tag,
            peer_tag: cookie.peer_tag,
            local_initial_tsn: cookie.local_initial_tsn,
            peer_initial_tsn: cookie.peer_initial_tsn,
            peer_a_rwnd: cookie.peer_a_rwnd,
            inbound_streams: cookie.inbound_streams,
            outbound_streams: cookie.outbound_streams,
            peer_implementation,
        });
        if let Some(tcb) = self.state.tcb() {
            self.ctx
                .outbound
                .push(tcb.single_chunk_packet(&Chunk::CookieAck));
        }
    }

    fn handle_cookie_ack(&mut self) {
        let State::CookieEchoed(s) = &mut self.state else {
            self.ctx
                .logger
                .debug(&format!("Ignoring COOKIE-ACK in state {}", self.state()));
            return;
        };
        s.t1_cookie.stop(self.ctx.timers.as_mut());
        let params = s.params;
        self.establish(params);
    }

    fn handle_sack(&mut self, sack: &SackChunk) {
        let now = self.ctx.now();
        let Some(tcb) = self.state.tcb_mut() else {
            self.ctx
                .logger
                .debug(&format!("Ignoring SACK in state {}", self.state()));
            return;
        };
        let outcome = match tcb.retransmission.handle_sack(sack, now) {
            Ok(outcome) => outcome,
            Err(SctpError::InvalidPacket(message)) => {
                return self.abort_for(
                    ErrorKind::ProtocolViolation,
                    message.clone(),
                    ErrorCause::ProtocolViolation(message),
                );
            }
            Err(err) => return self.fail(ErrorKind::RetransmissionLimitExceeded, err.to_string()),
        };

        if outcome.cumulative_ack_advanced {
            tcb.tx_errors.reset();
            tcb.refresh_t3(self.ctx.timers.as_mut());
        }
        if outcome.fast_retransmits > 0 {
            self.ctx.logger.debug(&format!(
                "Fast retransmit of {} chunks",
                outcome.fast_retransmits
            ));
        }
        for id in outcome.lifecycle_ends {
            self.ctx.events.push(AssociationEvent::LifecycleEnd(id));
        }
    }

    fn handle_heartbeat(&mut self, heartbeat: HeartbeatChunk) {
        let Some(tcb) = self.state.tcb() else {
            return;
        };
        let ack = Chunk::HeartbeatAck(HeartbeatChunk {
            parameters: heartbeat.parameters,
        });
        self.ctx.outbound.push(tcb.single_chunk_packet(&ack));
    }

    fn handle_heartbeat_ack(&mut self, ack: &HeartbeatChunk) {
        let now = self.ctx.now();
        let Some(tcb) = self.state.tcb_mut() else {
            return;
        };
        match tcb.heartbeat.on_ack(ack.info(), now, self.ctx.timers.as_mut()) {
            Ok(HeartbeatAck::Matched { rtt }) => {
                tcb.tx_errors.reset();
                if let Some(rtt) = rtt {
                    tcb.retransmission.rto_estimator_mut().observe(rtt);
                    self.ctx.logger.trace(&format!(
                        "HEARTBEAT RTT {:?}, RTO now {:?}",
                        rtt,
                        tcb.retransmission.rto()
                    ));
                }
            }
            Ok(HeartbeatAck::Stale) => {
                self.ctx.logger.debug("Ignoring HEARTBEAT-ACK for a stale probe");
            }
            Err(err) => self.ctx.events.error(
                ErrorKind::ParseFailed,
                format!("Failed to parse HEARTBEAT-ACK: {}", err),
            ),
        }
    }

    fn handle_abort(&mut self, abort: AbortChunk) {
        if matches!(self.state, State::Closed) {
            return;
        }
        let reason = ErrorCause::describe(&abort.causes);
        self.teardown(
            CloseReason::PeerAbort(reason.clone()),
            Some((ErrorKind::PeerAbort, format!("Association aborted by peer: {}", reason))),
        );
    }

    fn handle_error(&mut self, error: &ErrorChunk) {
        let description = ErrorCause::describe(&error.causes);
        self.ctx
            .logger
            .warn(&format!("Peer reported error: {}", description));
        self.ctx.events.error(ErrorKind::PeerReported, description);
    }

    fn handle_shutdown(&mut self, shutdown: ShutdownChunk) {
        match &self.state {
            State::Established(_) | State::ShutdownPending(_) | State::ShutdownReceived(_) => {}
            State::ShutdownSent(s) => {
                self.ctx.logger.debug("SHUTDOWN collision, answering with SHUTDOWN-ACK");
                self.ctx
                    .outbound
                    .push(s.tcb.single_chunk_packet(&Chunk::ShutdownAck));
                return;
            }
            State::Closed | State::CookieWait(_) | State::CookieEchoed(_) => {
                self.ctx
                    .logger
                    .debug(&format!("Ignoring SHUTDOWN in state {}", self.state()));
                return;
            }
        }

        // The cumulative ack it carries counts like a SACK without gaps
        if let Some(tcb) = self.state.tcb() {
            let in_flight = u32::try_from(tcb.retransmission.bytes_in_flight()).unwrap_or(u32::MAX);
            let sack = SackChunk {
                cumulative_tsn_ack: shutdown.cumulative_tsn_ack,
                a_rwnd: tcb.retransmission.peer_rwnd().saturating_add(in_flight),
                gap_ack_blocks: Vec::new(),
                duplicate_tsns: Vec::new(),
            };
            self.handle_sack(&sack);
        }

        if matches!(self.state, State::Established(_) | State::ShutdownPending(_)) {
            self.ctx.logger.info("Received SHUTDOWN");
            self.transition(|state| match state {
                State::Established(tcb) | State::ShutdownPending(tcb) => State::ShutdownReceived(tcb),
                other => other,
            });
        }
    }

    fn handle_shutdown_ack(&mut self, header: &CommonHeader) {
        match &self.state {
            State::ShutdownSent(s) => {
                let complete = Chunk::ShutdownComplete(ShutdownCompleteChunk {
                    tag_reflected: false,
                });
                self.ctx.outbound.push(s.tcb.single_chunk_packet(&complete));
                self.ctx.logger.info("Received SHUTDOWN-ACK, sent SHUTDOWN-COMPLETE");
                self.teardown(CloseReason::Graceful, None);
            }
            State::Closed | State::CookieWait(_) | State::CookieEchoed(_) => {
                // Out of the blue: answer with the sender's own tag reflected
                let complete = Chunk::ShutdownComplete(ShutdownCompleteChunk {
                    tag_reflected: true,
                });
                let packet = self.ctx.packet(header.verification_tag, &complete);
                self.ctx.outbound.push(packet);
                self.ctx
                    .logger
                    .debug("Answered out-of-the-blue SHUTDOWN-ACK with SHUTDOWN-COMPLETE");
            }
            _ => self
                .ctx
                .logger
                .debug(&format!("Ignoring SHUTDOWN-ACK in state {}", self.state())),
        }
    }

    fn handle_unrecognized(&mut self, raw: &RawChunk<'_>) -> bool {
        let action = UnrecognizedChunkAction::for_type(raw.chunk_type);
        self.ctx.logger.debug(&format!(
            "Unrecognized chunk type {} ({} bytes), {}",
            raw.chunk_type,
            raw.bytes.len(),
            if action.skip { "skipping" } else { "stopping" }
        ));
        if action.report {
            self.ctx.events.error(
                ErrorKind::UnrecognizedChunk,
                format!("Received unrecognized chunk type {}", raw.chunk_type),
            );
            if let Some(peer_tag) = self.state.peer_tag() {
                let error = Chunk::Error(ErrorChunk {
                    causes: vec![ErrorCause::UnrecognizedChunkType(raw.bytes.to_vec())],
                });
                let packet = self.ctx.packet(peer_tag, &error);
                self.ctx.outbound.push(packet);
            }
        }
        action.skip
    }

    /// DATA arriving after our SHUTDOWN means the peer has not seen it yet:
    /// acknowledge the data and send SHUTDOWN again with a fresh T2.
    fn repeat_shutdown_after_data(&mut self) {
        let State::ShutdownSent(s) = &mut self.state else {
            return;
        };
        s.t2_shutdown.start(self.ctx.timers.as_mut());
        let shutdown = Chunk::Shutdown(ShutdownChunk {
            cumulative_tsn_ack: s.tcb.data_tracker.cumulative_tsn_ack(),
        });
        let mut builder = s.tcb.packet_builder();
        if s.tcb.sack_pending {
            let sack = s.tcb.take_sack();
            builder.add(&sack);
        }
        builder.add(&shutdown);
        self.ctx.outbound.push(builder.build());
    }
}
