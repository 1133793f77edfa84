//! State cookie for the passive side of the handshake.
//!
//! The passive side keeps no state between INIT and COOKIE-ECHO. Everything
//! needed to build the TCB travels in the cookie, authenticated with
//! HMAC-SHA1 under the configured secret.
//!
//! ```text
//! magic(8) | peer_tag(4) | local_tag(4) | peer_initial_tsn(4) |
//! local_initial_tsn(4) | peer_a_rwnd(4) | inbound_streams(2) |
//! outbound_streams(2) | created_at(8) | hmac(20)
//! ```

use crate::error::{Result, SctpError};
use crate::packet::{read_u16, read_u32, read_u64};
use crate::types::{Timestamp, Tsn};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;
use std::time::Duration;

type HmacSha1 = Hmac<Sha1>;

/// Prefix identifying cookies minted by this crate.
pub const COOKIE_MAGIC: &[u8; 8] = b"sctpRS00";
const BODY_LEN: usize = 8 + 4 * 5 + 2 * 2 + 8;
const MAC_LEN: usize = 20;
pub const COOKIE_LEN: usize = BODY_LEN + MAC_LEN;

/// SCTP stack that minted a peer's cookie, inferred from its magic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SctpImplementation {
    Native,
    DcsctpCc,
    DcsctpRs,
    UsrSctp,
    Unknown,
}

impl SctpImplementation {
    pub fn from_cookie(cookie: &[u8]) -> Self {
        if cookie.len() <= COOKIE_MAGIC.len() {
            return SctpImplementation::Unknown;
        }
        match &cookie[..8] {
            b"sctpRS00" => SctpImplementation::Native,
            b"dcSCTP00" => SctpImplementation::DcsctpCc,
            b"dcSCTPr0" => SctpImplementation::DcsctpRs,
            b"KAME-BSD" => SctpImplementation::UsrSctp,
            _ => SctpImplementation::Unknown,
        }
    }
}

impl fmt::Display for SctpImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SctpImplementation::Native => "sctp-rs",
            SctpImplementation::DcsctpCc => "dcSCTP (C++)",
            SctpImplementation::DcsctpRs => "dcSCTP (Rust)",
            SctpImplementation::UsrSctp => "usrsctp",
            SctpImplementation::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCookie {
    pub peer_tag: u32,
    pub local_tag: u32,
    pub peer_initial_tsn: Tsn,
    pub local_initial_tsn: Tsn,
    pub peer_a_rwnd: u32,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub created_at: Timestamp,
}

impl StateCookie {
    /// Serializes and signs the cookie.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidConfig` if `secret` is rejected as an HMAC key.
    pub fn seal(&self, secret: &[u8]) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(COOKIE_LEN);
        buf.extend_from_slice(COOKIE_MAGIC);
        buf.extend_from_slice(&self.peer_tag.to_be_bytes());
        buf.extend_from_slice(&self.local_tag.to_be_bytes());
        buf.extend_from_slice(&self.peer_initial_tsn.0.to_be_bytes());
        buf.extend_from_slice(&self.local_initial_tsn.0.to_be_bytes());
        buf.extend_from_slice(&self.peer_a_rwnd.to_be_bytes());
        buf.extend_from_slice(&self.inbound_streams.to_be_bytes());
        buf.extend_from_slice(&self.outbound_streams.to_be_bytes());
        buf.extend_from_slice(&self.created_at.as_millis().to_be_bytes());
        let tag = sign(secret, &buf)?;
        buf.extend_from_slice(&tag);
        Ok(buf)
    }

    /// Verifies and decodes a cookie echoed by the peer.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidPacket` if the cookie is malformed, was not
    /// signed with `secret`, or is older than `lifetime`.
    pub fn open(cookie: &[u8], secret: &[u8], now: Timestamp, lifetime: Duration) -> Result<Self> {
        if cookie.len() != COOKIE_LEN || &cookie[..8] != COOKIE_MAGIC {
            return Err(SctpError::InvalidPacket(
                "state cookie has unexpected format".to_string(),
            ));
        }
        let (body, tag) = cookie.split_at(BODY_LEN);
        let mut mac = HmacSha1::new_from_slice(secret)
            .map_err(|e| SctpError::InvalidConfig(format!("cookie secret: {}", e)))?;
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| SctpError::InvalidPacket("state cookie signature mismatch".to_string()))?;

        let state = Self {
            peer_tag: read_u32(body, 8)?,
            local_tag: read_u32(body, 12)?,
            peer_initial_tsn: Tsn(read_u32(body, 16)?),
            local_initial_tsn: Tsn(read_u32(body, 20)?),
            peer_a_rwnd: read_u32(body, 24)?,
            inbound_streams: read_u16(body, 28)?,
            outbound_streams: read_u16(body, 30)?,
            created_at: Timestamp::from_millis(read_u64(body, 32)?),
        };
        let age = now.saturating_since(state.created_at);
        if age > lifetime {
            return Err(SctpError::InvalidPacket(format!(
                "stale state cookie ({} ms old)",
                age.as_millis()
            )));
        }
        Ok(state)
    }
}

fn sign(secret: &[u8], data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| SctpError::InvalidConfig(format!("cookie secret: {}", e)))?;
    mac.update(data);
    let mut tag = [0u8; MAC_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}
