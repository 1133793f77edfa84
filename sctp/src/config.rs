//! Association configuration

use crate::error::{Result, SctpError};
use crate::packet::{COMMON_HEADER_SIZE, DATA_CHUNK_HEADER_SIZE};
use std::time::Duration;

/// Resolved configuration for one association.
///
/// The core never reads files or the environment; embedders build this value
/// and hand it to [`Association::new`](crate::Association::new), which calls
/// [`validate`](Self::validate) first.
#[derive(Debug, Clone)]
pub struct AssociationConfig {
    /// Local SCTP port
    pub local_port: u16,
    /// Remote SCTP port
    pub remote_port: u16,
    /// Largest datagram handed to the transport
    pub mtu: usize,
    /// Largest DATA payload per fragment
    pub max_fragment_size: usize,
    /// Outbound streams announced in INIT
    pub num_outbound_streams: u16,
    /// Inbound streams announced in INIT
    pub num_inbound_streams: u16,
    /// Receiver window advertised when nothing is buffered
    pub max_receiver_window: u32,
    /// Byte ceiling for partially reassembled messages
    pub max_reassembly_buffer_size: usize,
    /// Byte ceiling for queued outbound messages
    pub max_send_buffer_size: usize,
    /// Largest message accepted by `send`
    pub max_message_size: usize,
    pub rto_initial: Duration,
    pub rto_min: Duration,
    pub rto_max: Duration,
    pub t1_init_timeout: Duration,
    pub t1_cookie_timeout: Duration,
    pub t2_shutdown_timeout: Duration,
    /// INIT/COOKIE-ECHO retransmissions before giving up
    pub max_init_retransmits: u32,
    /// Consecutive unanswered retransmissions before the association fails
    pub max_retransmissions: u32,
    /// Retransmissions of a single DATA chunk before the association fails
    pub max_chunk_retransmissions: u32,
    /// Exponential backoff factor for timers
    pub backoff_multiplier: u32,
    /// Ceiling for a backed-off timer duration
    pub max_timer_backoff: Duration,
    /// Idle time between heartbeats, zero disables them
    pub heartbeat_interval: Duration,
    /// Lifetime of a state cookie
    pub valid_cookie_life: Duration,
    /// HMAC key for state cookies
    pub cookie_secret: Vec<u8>,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            local_port: 5000,
            remote_port: 5000,
            mtu: 1191,               // Fits a typical DTLS-over-UDP path
            max_fragment_size: 1024, // Per-fragment payload ceiling
            num_outbound_streams: 65535,
            num_inbound_streams: 65535,
            max_receiver_window: 131072,             // 128KB
            max_reassembly_buffer_size: 4 * 1024 * 1024, // 4MB
            max_send_buffer_size: 2 * 1024 * 1024,   // 2MB
            max_message_size: 256 * 1024,            // 256KB
            rto_initial: Duration::from_millis(500),
            rto_min: Duration::from_millis(400),
            rto_max: Duration::from_secs(60),
            t1_init_timeout: Duration::from_secs(1),
            t1_cookie_timeout: Duration::from_secs(1),
            t2_shutdown_timeout: Duration::from_secs(1),
            max_init_retransmits: 8,
            max_retransmissions: 10,
            max_chunk_retransmissions: 10,
            backoff_multiplier: 2,
            max_timer_backoff: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            valid_cookie_life: Duration::from_secs(60),
            cookie_secret: (0..32).map(|_| rand::random::<u8>()).collect(),
        }
    }
}

impl AssociationConfig {
    /// Rejects values the association cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let overhead = COMMON_HEADER_SIZE + DATA_CHUNK_HEADER_SIZE;
        if self.mtu <= overhead + 4 {
            return Err(invalid(format!(
                "mtu {} leaves no room for DATA (header overhead {})",
                self.mtu, overhead
            )));
        }
        if self.max_fragment_size < 4 {
            return Err(invalid("max_fragment_size must be at least 4".into()));
        }
        if self.num_outbound_streams == 0 || self.num_inbound_streams == 0 {
            return Err(invalid("stream counts must be non-zero".into()));
        }
        if self.max_receiver_window < 1500 {
            return Err(invalid(format!(
                "max_receiver_window {} below the 1500 byte minimum",
                self.max_receiver_window
            )));
        }
        if self.max_message_size == 0 || self.max_message_size > self.max_send_buffer_size {
            return Err(invalid(format!(
                "max_message_size {} must be between 1 and max_send_buffer_size {}",
                self.max_message_size, self.max_send_buffer_size
            )));
        }
        if self.max_reassembly_buffer_size == 0 {
            return Err(invalid("max_reassembly_buffer_size must be non-zero".into()));
        }
        if self.rto_min.is_zero() || self.rto_min > self.rto_max {
            return Err(invalid(format!(
                "rto_min {:?} must be non-zero and not above rto_max {:?}",
                self.rto_min, self.rto_max
            )));
        }
        if self.rto_initial < self.rto_min || self.rto_initial > self.rto_max {
            return Err(invalid(format!(
                "rto_initial {:?} outside [{:?}, {:?}]",
                self.rto_initial, self.rto_min, self.rto_max
            )));
        }
        if self.t1_init_timeout.is_zero()
            || self.t1_cookie_timeout.is_zero()
            || self.t2_shutdown_timeout.is_zero()
        {
            return Err(invalid("handshake and shutdown timeouts must be non-zero".into()));
        }
        if self.backoff_multiplier == 0 {
            return Err(invalid("backoff_multiplier must be non-zero".into()));
        }
        if self.max_timer_backoff.is_zero() {
            return Err(invalid("max_timer_backoff must be non-zero".into()));
        }
        if self.valid_cookie_life.is_zero() {
            return Err(invalid("valid_cookie_life must be non-zero".into()));
        }
        if self.cookie_secret.is_empty() {
            return Err(invalid("cookie_secret must not be empty".into()));
        }
        Ok(())
    }

    /// Payload bytes per DATA fragment: the configured ceiling, bounded by
    /// what fits in one datagram and rounded down to a 4-byte boundary.
    pub fn fragment_size(&self) -> usize {
        let room = self
            .mtu
            .saturating_sub(COMMON_HEADER_SIZE + DATA_CHUNK_HEADER_SIZE);
        self.max_fragment_size.min(room) & !3
    }
}

fn invalid(message: String) -> SctpError {
    SctpError::InvalidConfig(message)
}
