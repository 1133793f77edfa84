//! UDP transport carrying SCTP packets

use crate::env::DatagramTransport;
use crate::error::Result;
use logging::Logger;
use std::net::{SocketAddr, UdpSocket};

/// Largest datagram read in one `receive` call
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// Non-blocking UDP socket bound to one remote peer.
pub struct UdpDatagramTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    logger: Logger,
    bytes_sent: u64,
    bytes_received: u64,
}

impl UdpDatagramTransport {
    /// Binds a non-blocking socket.
    ///
    /// # Arguments
    /// * `bind_addr` - Local address to bind
    /// * `remote_addr` - Peer every datagram is sent to
    /// * `logger` - Logger
    ///
    /// # Errors
    ///
    /// Returns `SctpError::Io` if the socket cannot be bound or configured.
    pub fn new(bind_addr: SocketAddr, remote_addr: SocketAddr, logger: Logger) -> Result<Self> {
        logger.info(&format!(
            "Creating UDP socket at {} for peer {}",
            bind_addr, remote_addr
        ));
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            remote_addr,
            logger,
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Changes the peer address.
    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.logger.info(&format!("Remote address set to {}", addr));
        self.remote_addr = addr;
    }

    /// Receive one datagram from the peer (non-blocking)
    ///
    /// Datagrams from any other address are dropped.
    ///
    /// # Returns
    /// * `Ok(Some(data))` - One datagram from the peer
    /// * `Ok(None)` - Nothing available
    /// * `Err` - Socket error
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((size, from)) if from == self.remote_addr => {
                    buf.truncate(size);
                    self.update_receive_stats(size);
                    return Ok(Some(buf));
                }
                Ok((size, from)) => {
                    self.logger
                        .debug(&format!("Dropping {} bytes from unknown sender {}", size, from));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn update_receive_stats(&mut self, size: usize) {
        self.bytes_received += size as u64;
        if self.bytes_received % 100_000 < size as u64 {
            self.logger
                .debug(&format!("Total bytes received: {}", self.bytes_received));
        }
    }

    /// Returns transport statistics (bytes_sent, bytes_received)
    pub fn stats(&self) -> (u64, u64) {
        (self.bytes_sent, self.bytes_received)
    }
}

impl DatagramTransport for UdpDatagramTransport {
    fn send_datagram(&mut self, datagram: &[u8]) -> Result<()> {
        let sent = self.socket.send_to(datagram, self.remote_addr)?;
        self.bytes_sent += sent as u64;
        if self.bytes_sent % 100_000 < sent as u64 {
            self.logger
                .debug(&format!("Total bytes sent: {}", self.bytes_sent));
        }
        Ok(())
    }
}
