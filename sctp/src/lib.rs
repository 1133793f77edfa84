//! SCTP Module - association endpoint over an unreliable datagram channel
//!
//! Implements the association lifecycle (four-way handshake, data transfer,
//! graceful shutdown and abort), reliable delivery with retransmission and
//! congestion control, and message fragmentation and reassembly. The
//! association is sans-IO: datagrams, timers, time and events all go through
//! the collaborators in [`env`].

pub mod association;
pub mod packet;
pub mod rx;
pub mod timer;
pub mod transport;
pub mod tx;

// Utility modules
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod types;

pub use association::{Association, AssociationState, SctpImplementation};
pub use config::AssociationConfig;
pub use env::{
    Clock, Collaborators, DatagramTransport, Observer, SystemClock, TimerHandle, TimerService,
};
pub use error::{ErrorKind, Result, SctpError};
pub use events::{AssociationEvent, CloseReason, Message};
pub use timer::TimerKind;
pub use transport::UdpDatagramTransport;
pub use tx::SendOptions;
pub use types::{LifecycleId, Ssn, StreamId, Timestamp, Tsn};
