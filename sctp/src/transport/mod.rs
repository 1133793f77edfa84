//! Transport module - datagram transports the association can run over

pub mod udp;

pub use udp::UdpDatagramTransport;
