//! SCTP chunk types and structures
//!
//! Every chunk shares a 4-byte header (type, flags, length) followed by a
//! type-specific value padded to a 4-byte boundary. [`Chunk`] is the closed
//! set of kinds the association understands; anything else decodes to
//! [`Chunk::Unknown`] so the dispatcher can apply the type's high-bit policy.

use super::error_cause::ErrorCause;
use super::parameter::Parameter;
use super::sctp_packet::RawChunk;
use super::{CHUNK_HEADER_SIZE, DATA_CHUNK_HEADER_SIZE, pad, padded_len, read_u16, read_u32};
use crate::error::{Result, SctpError};
use crate::types::{Ssn, StreamId, Tsn};

/// SCTP chunk type identifiers (RFC 4960)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// Payload data
    Data = 0,
    /// Initiate association
    Init = 1,
    /// Initiate acknowledgment
    InitAck = 2,
    /// Selective acknowledgment
    Sack = 3,
    /// Heartbeat request
    Heartbeat = 4,
    /// Heartbeat acknowledgment
    HeartbeatAck = 5,
    /// Abort association
    Abort = 6,
    /// Shutdown association
    Shutdown = 7,
    /// Shutdown acknowledgment
    ShutdownAck = 8,
    /// Operation error
    Error = 9,
    /// State cookie
    CookieEcho = 10,
    /// Cookie acknowledgment
    CookieAck = 11,
    /// Shutdown complete
    ShutdownComplete = 14,
}

impl ChunkType {
    /// Parse chunk type from byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Init),
            2 => Some(Self::InitAck),
            3 => Some(Self::Sack),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::HeartbeatAck),
            6 => Some(Self::Abort),
            7 => Some(Self::Shutdown),
            8 => Some(Self::ShutdownAck),
            9 => Some(Self::Error),
            10 => Some(Self::CookieEcho),
            11 => Some(Self::CookieAck),
            14 => Some(Self::ShutdownComplete),
            _ => None,
        }
    }
}

const FLAG_UNORDERED: u8 = 0x04;
const FLAG_BEGINNING: u8 = 0x02;
const FLAG_ENDING: u8 = 0x01;
/// Verification tag is the receiver's own (ABORT, SHUTDOWN-COMPLETE)
const FLAG_TAG_REFLECTED: u8 = 0x01;

/// DATA chunk carrying one fragment of a user message
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 0    | Reserved|U|B|E|         Length                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              TSN                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Stream Identifier        |   Stream Sequence Number      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  Payload Protocol Identifier                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                           User Data                           /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub tsn: Tsn,
    pub stream_id: StreamId,
    pub ssn: Ssn,
    /// Payload protocol identifier
    pub ppid: u32,
    /// May be delivered out of order
    pub unordered: bool,
    /// First fragment of a message
    pub beginning: bool,
    /// Last fragment of a message
    pub ending: bool,
    pub payload: Vec<u8>,
}

impl DataChunk {
    /// Wire size of a DATA chunk carrying `payload_len` bytes, padding included.
    pub fn encoded_len(payload_len: usize) -> usize {
        padded_len(DATA_CHUNK_HEADER_SIZE + payload_len)
    }

    fn flags(&self) -> u8 {
        (if self.unordered { FLAG_UNORDERED } else { 0 })
            | (if self.beginning { FLAG_BEGINNING } else { 0 })
            | (if self.ending { FLAG_ENDING } else { 0 })
    }

    fn parse(flags: u8, value: &[u8]) -> Result<Self> {
        if value.len() < DATA_CHUNK_HEADER_SIZE - CHUNK_HEADER_SIZE {
            return Err(SctpError::InvalidPacket("DATA chunk too short".to_string()));
        }
        Ok(Self {
            tsn: Tsn(read_u32(value, 0)?),
            stream_id: StreamId(read_u16(value, 4)?),
            ssn: Ssn(read_u16(value, 6)?),
            ppid: read_u32(value, 8)?,
            unordered: flags & FLAG_UNORDERED != 0,
            beginning: flags & FLAG_BEGINNING != 0,
            ending: flags & FLAG_ENDING != 0,
            payload: value[12..].to_vec(),
        })
    }

    fn write_value(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.tsn.0.to_be_bytes());
        buf.extend_from_slice(&self.stream_id.0.to_be_bytes());
        buf.extend_from_slice(&self.ssn.0.to_be_bytes());
        buf.extend_from_slice(&self.ppid.to_be_bytes());
        buf.extend_from_slice(&self.payload);
    }
}

/// INIT and INIT-ACK share one layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitChunk {
    pub initiate_tag: u32,
    /// Advertised Receiver Window Credit
    pub a_rwnd: u32,
    pub num_outbound_streams: u16,
    pub num_inbound_streams: u16,
    pub initial_tsn: Tsn,
    pub parameters: Vec<Parameter>,
}

impl InitChunk {
    pub fn state_cookie(&self) -> Option<&[u8]> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::StateCookie(cookie) => Some(cookie.as_slice()),
            _ => None,
        })
    }

    fn parse(value: &[u8]) -> Result<Self> {
        if value.len() < 16 {
            return Err(SctpError::InvalidPacket("INIT chunk too short".to_string()));
        }
        Ok(Self {
            initiate_tag: read_u32(value, 0)?,
            a_rwnd: read_u32(value, 4)?,
            num_outbound_streams: read_u16(value, 8)?,
            num_inbound_streams: read_u16(value, 10)?,
            initial_tsn: Tsn(read_u32(value, 12)?),
            parameters: Parameter::parse_all(&value[16..])?,
        })
    }

    fn write_value(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.initiate_tag.to_be_bytes());
        buf.extend_from_slice(&self.a_rwnd.to_be_bytes());
        buf.extend_from_slice(&self.num_outbound_streams.to_be_bytes());
        buf.extend_from_slice(&self.num_inbound_streams.to_be_bytes());
        buf.extend_from_slice(&self.initial_tsn.0.to_be_bytes());
        Parameter::write_all(&self.parameters, buf);
    }
}

/// Inclusive TSN range, as offsets from the cumulative TSN ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SackChunk {
    pub cumulative_tsn_ack: Tsn,
    pub a_rwnd: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsns: Vec<Tsn>,
}

impl SackChunk {
    fn parse(value: &[u8]) -> Result<Self> {
        let cumulative_tsn_ack = Tsn(read_u32(value, 0)?);
        let a_rwnd = read_u32(value, 4)?;
        let num_gap_blocks = read_u16(value, 8)? as usize;
        let num_dup_tsns = read_u16(value, 10)? as usize;
        if value.len() < 12 + 4 * (num_gap_blocks + num_dup_tsns) {
            return Err(SctpError::InvalidPacket(format!(
                "SACK declares {} gap blocks and {} duplicates but is {} bytes",
                num_gap_blocks,
                num_dup_tsns,
                value.len() + CHUNK_HEADER_SIZE
            )));
        }

        let mut offset = 12;
        let mut gap_ack_blocks = Vec::with_capacity(num_gap_blocks);
        for _ in 0..num_gap_blocks {
            gap_ack_blocks.push(GapAckBlock {
                start: read_u16(value, offset)?,
                end: read_u16(value, offset + 2)?,
            });
            offset += 4;
        }
        let mut duplicate_tsns = Vec::with_capacity(num_dup_tsns);
        for _ in 0..num_dup_tsns {
            duplicate_tsns.push(Tsn(read_u32(value, offset)?));
            offset += 4;
        }

        Ok(Self {
            cumulative_tsn_ack,
            a_rwnd,
            gap_ack_blocks,
            duplicate_tsns,
        })
    }

    fn write_value(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.cumulative_tsn_ack.0.to_be_bytes());
        buf.extend_from_slice(&self.a_rwnd.to_be_bytes());
        buf.extend_from_slice(&(self.gap_ack_blocks.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.duplicate_tsns.len() as u16).to_be_bytes());
        for block in &self.gap_ack_blocks {
            buf.extend_from_slice(&block.start.to_be_bytes());
            buf.extend_from_slice(&block.end.to_be_bytes());
        }
        for tsn in &self.duplicate_tsns {
            buf.extend_from_slice(&tsn.0.to_be_bytes());
        }
    }
}

/// HEARTBEAT and HEARTBEAT-ACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatChunk {
    pub parameters: Vec<Parameter>,
}

impl HeartbeatChunk {
    pub fn with_info(info: Vec<u8>) -> Self {
        Self {
            parameters: vec![Parameter::HeartbeatInfo(info)],
        }
    }

    pub fn info(&self) -> Option<&[u8]> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::HeartbeatInfo(info) => Some(info.as_slice()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortChunk {
    /// T bit: the packet carries the receiver's own tag
    pub tag_reflected: bool,
    pub causes: Vec<ErrorCause>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorChunk {
    pub causes: Vec<ErrorCause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownChunk {
    pub cumulative_tsn_ack: Tsn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEchoChunk {
    pub cookie: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownCompleteChunk {
    pub tag_reflected: bool,
}

/// A chunk type this implementation does not understand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChunk {
    pub chunk_type: u8,
    pub flags: u8,
    pub value: Vec<u8>,
}

/// Every chunk kind the association handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(DataChunk),
    Init(InitChunk),
    InitAck(InitChunk),
    Sack(SackChunk),
    Heartbeat(HeartbeatChunk),
    HeartbeatAck(HeartbeatChunk),
    Abort(AbortChunk),
    Shutdown(ShutdownChunk),
    ShutdownAck,
    Error(ErrorChunk),
    CookieEcho(CookieEchoChunk),
    CookieAck,
    ShutdownComplete(ShutdownCompleteChunk),
    Unknown(UnknownChunk),
}

impl Chunk {
    pub fn chunk_type(&self) -> u8 {
        let known = match self {
            Chunk::Data(_) => ChunkType::Data,
            Chunk::Init(_) => ChunkType::Init,
            Chunk::InitAck(_) => ChunkType::InitAck,
            Chunk::Sack(_) => ChunkType::Sack,
            Chunk::Heartbeat(_) => ChunkType::Heartbeat,
            Chunk::HeartbeatAck(_) => ChunkType::HeartbeatAck,
            Chunk::Abort(_) => ChunkType::Abort,
            Chunk::Shutdown(_) => ChunkType::Shutdown,
            Chunk::ShutdownAck => ChunkType::ShutdownAck,
            Chunk::Error(_) => ChunkType::Error,
            Chunk::CookieEcho(_) => ChunkType::CookieEcho,
            Chunk::CookieAck => ChunkType::CookieAck,
            Chunk::ShutdownComplete(_) => ChunkType::ShutdownComplete,
            Chunk::Unknown(c) => return c.chunk_type,
        };
        known as u8
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Chunk::Data(_) => "DATA",
            Chunk::Init(_) => "INIT",
            Chunk::InitAck(_) => "INIT-ACK",
            Chunk::Sack(_) => "SACK",
            Chunk::Heartbeat(_) => "HEARTBEAT",
            Chunk::HeartbeatAck(_) => "HEARTBEAT-ACK",
            Chunk::Abort(_) => "ABORT",
            Chunk::Shutdown(_) => "SHUTDOWN",
            Chunk::ShutdownAck => "SHUTDOWN-ACK",
            Chunk::Error(_) => "ERROR",
            Chunk::CookieEcho(_) => "COOKIE-ECHO",
            Chunk::CookieAck => "COOKIE-ACK",
            Chunk::ShutdownComplete(_) => "SHUTDOWN-COMPLETE",
            Chunk::Unknown(_) => "UNKNOWN",
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Chunk::Data(data) => data.flags(),
            Chunk::Abort(AbortChunk { tag_reflected, .. })
            | Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected }) => {
                if *tag_reflected {
                    FLAG_TAG_REFLECTED
                } else {
                    0
                }
            }
            Chunk::Unknown(c) => c.flags,
            _ => 0,
        }
    }

    /// Decodes one framed chunk.
    ///
    /// # Errors
    ///
    /// Returns `SctpError::InvalidPacket` if the value is malformed for its type.
    pub fn parse(raw: &RawChunk<'_>) -> Result<Chunk> {
        let value = raw.value;
        let Some(chunk_type) = ChunkType::from_u8(raw.chunk_type) else {
            return Ok(Chunk::Unknown(UnknownChunk {
                chunk_type: raw.chunk_type,
                flags: raw.flags,
                value: value.to_vec(),
            }));
        };
        let tag_reflected = raw.flags & FLAG_TAG_REFLECTED != 0;

        Ok(match chunk_type {
            ChunkType::Data => Chunk::Data(DataChunk::parse(raw.flags, value)?),
            ChunkType::Init => Chunk::Init(InitChunk::parse(value)?),
            ChunkType::InitAck => Chunk::InitAck(InitChunk::parse(value)?),
            ChunkType::Sack => Chunk::Sack(SackChunk::parse(value)?),
            ChunkType::Heartbeat => Chunk::Heartbeat(HeartbeatChunk {
                parameters: Parameter::parse_all(value)?,
            }),
            ChunkType::HeartbeatAck => Chunk::HeartbeatAck(HeartbeatChunk {
                parameters: Parameter::parse_all(value)?,
            }),
            ChunkType::Abort => Chunk::Abort(AbortChunk {
                tag_reflected,
                causes: ErrorCause::parse_all(value)?,
            }),
            ChunkType::Shutdown => Chunk::Shutdown(ShutdownChunk {
                cumulative_tsn_ack: Tsn(read_u32(value, 0)?),
            }),
            ChunkType::ShutdownAck => Chunk::ShutdownAck,
            ChunkType::Error => Chunk::Error(ErrorChunk {
                causes: ErrorCause::parse_all(value)?,
            }),
            ChunkType::CookieEcho => Chunk::CookieEcho(CookieEchoChunk {
                cookie: value.to_vec(),
            }),
            ChunkType::CookieAck => Chunk::CookieAck,
            ChunkType::ShutdownComplete => {
                Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected })
            }
        })
    }

    /// Appends the chunk, header and trailing padding included.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.push(self.chunk_type());
        buf.push(self.flags());
        buf.extend_from_slice(&[0, 0]);

        match self {
            Chunk::Data(data) => data.write_value(buf),
            Chunk::Init(init) | Chunk::InitAck(init) => init.write_value(buf),
            Chunk::Sack(sack) => sack.write_value(buf),
            Chunk::Heartbeat(hb) | Chunk::HeartbeatAck(hb) => {
                Parameter::write_all(&hb.parameters, buf)
            }
            Chunk::Abort(AbortChunk { causes, .. }) | Chunk::Error(ErrorChunk { causes }) => {
                ErrorCause::write_all(causes, buf)
            }
            Chunk::Shutdown(shutdown) => {
                buf.extend_from_slice(&shutdown.cumulative_tsn_ack.0.to_be_bytes())
            }
            Chunk::CookieEcho(echo) => buf.extend_from_slice(&echo.cookie),
            Chunk::Unknown(unknown) => buf.extend_from_slice(&unknown.value),
            Chunk::ShutdownAck | Chunk::CookieAck | Chunk::ShutdownComplete(_) => {}
        }

        // Length excludes the final padding
        let length = (buf.len() - start) as u16;
        buf[start + 2..start + 4].copy_from_slice(&length.to_be_bytes());
        pad(buf);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::sctp_packet::split_chunks;

    fn reparse(chunk: &Chunk) -> Chunk {
        let bytes = chunk.to_bytes();
        let raws = split_chunks(&bytes).unwrap();
        assert_eq!(raws.len(), 1);
        Chunk::parse(&raws[0]).unwrap()
    }

    fn data_chunk(payload: Vec<u8>) -> DataChunk {
        DataChunk {
            tsn: Tsn(1),
            stream_id: StreamId(2),
            ssn: Ssn(3),
            ppid: 53,
            unordered: false,
            beginning: true,
            ending: false,
            payload,
        }
    }

    #[test]
    fn test_data_chunk_layout() {
        let chunk = Chunk::Data(DataChunk {
            unordered: true,
            ..data_chunk(vec![0xAA, 0xBB, 0xCC])
        });
        let bytes = chunk.to_bytes();

        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], FLAG_UNORDERED | FLAG_BEGINNING);
        // Declared length is 19, padded to 20 on the wire
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 19);
        assert_eq!(bytes.len(), 20);
        assert_eq!(DataChunk::encoded_len(3), 20);
        assert_eq!(reparse(&chunk), chunk);
    }

    #[test]
    fn test_data_chunk_too_short() {
        let raw = RawChunk {
            chunk_type: 0,
            flags: 3,
            value: &[0u8; 8],
            bytes: &[],
        };
        assert!(Chunk::parse(&raw).is_err());
    }

    #[test]
    fn test_init_with_cookie() {
        let chunk = Chunk::InitAck(InitChunk {
            initiate_tag: 0xDEADBEEF,
            a_rwnd: 131072,
            num_outbound_streams: 10,
            num_inbound_streams: 20,
            initial_tsn: Tsn(1000),
            parameters: vec![Parameter::StateCookie(vec![7; 13])],
        });
        let Chunk::InitAck(parsed) = reparse(&chunk) else {
            panic!("expected INIT-ACK");
        };
        assert_eq!(parsed.initiate_tag, 0xDEADBEEF);
        assert_eq!(parsed.state_cookie(), Some(&[7u8; 13][..]));
    }

    #[test]
    fn test_sack_with_gaps_and_duplicates() {
        let chunk = Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(100),
            a_rwnd: 65536,
            gap_ack_blocks: vec![GapAckBlock { start: 2, end: 3 }, GapAckBlock { start: 5, end: 5 }],
            duplicate_tsns: vec![Tsn(99)],
        });
        assert_eq!(reparse(&chunk), chunk);
    }

    #[test]
    fn test_sack_with_short_body_is_error() {
        // Declares one gap block but carries none
        let value = [0, 0, 0, 1, 0, 0, 0, 1, 0, 1, 0, 0];
        let raw = RawChunk {
            chunk_type: ChunkType::Sack as u8,
            flags: 0,
            value: &value,
            bytes: &[],
        };
        assert!(Chunk::parse(&raw).is_err());
    }

    #[test]
    fn test_abort_reflected_tag() {
        let chunk = Chunk::Abort(AbortChunk {
            tag_reflected: true,
            causes: vec![ErrorCause::UserInitiatedAbort("closing".into())],
        });
        let bytes = chunk.to_bytes();
        assert_eq!(bytes[1], FLAG_TAG_REFLECTED);
        assert_eq!(reparse(&chunk), chunk);
    }

    #[test]
    fn test_unknown_type_preserved() {
        let raw = RawChunk {
            chunk_type: 0xC1,
            flags: 0x5,
            value: &[1, 2, 3, 4],
            bytes: &[],
        };
        let chunk = Chunk::parse(&raw).unwrap();
        assert_eq!(chunk.chunk_type(), 0xC1);
        assert_eq!(chunk.name(), "UNKNOWN");
        assert_eq!(chunk.to_bytes(), vec![0xC1, 0x5, 0, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_heartbeat_info_accessor() {
        let chunk = HeartbeatChunk::with_info(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let Chunk::Heartbeat(parsed) = reparse(&Chunk::Heartbeat(chunk)) else {
            panic!("expected HEARTBEAT");
        };
        assert_eq!(parsed.info(), Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]));
    }
}
