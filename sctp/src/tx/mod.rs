//! Transmit path: fragmentation, retransmission and pacing.

pub mod congestion;
pub mod retransmission_queue;
pub mod rto;
pub mod send_queue;

pub use congestion::{CongestionControl, SlowStartPolicy};
pub use retransmission_queue::{RetransmissionQueue, SackOutcome};
pub use rto::RtoEstimator;
pub use send_queue::{PendingFragment, SendOptions, SendQueue};
