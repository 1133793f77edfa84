//! SCTP packet structure
//!
//! An SCTP packet consists of a common header followed by one or more chunks.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Source Port Number        |     Destination Port Number   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Verification Tag                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! /                            Chunks                             /
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Inbound frames go through two steps: [`parse_frame`] validates framing
//! (header, checksum, chunk lengths against the buffer) and yields
//! [`RawChunk`] views; each view is then decoded on its own with
//! [`Chunk::parse`], so one malformed chunk does not hide the others.

use super::chunk::Chunk;
use super::{CHUNK_HEADER_SIZE, COMMON_HEADER_SIZE, padded_len, read_u16, read_u32};
use crate::error::{Result, SctpError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
}

impl CommonHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            source_port: read_u16(data, 0)?,
            destination_port: read_u16(data, 2)?,
            verification_tag: read_u32(data, 4)?,
        })
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.destination_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.verification_tag.to_be_bytes());
        buf[8..12].copy_from_slice(&[0u8; 4]);
    }
}

/// A framed but not yet decoded chunk, borrowed from the inbound buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawChunk<'a> {
    pub chunk_type: u8,
    pub flags: u8,
    /// Value bytes, without header or padding
    pub value: &'a [u8],
    /// The whole chunk as received, without padding
    pub bytes: &'a [u8],
}

/// Splits the chunk area of a packet into raw chunks.
pub(crate) fn split_chunks(mut data: &[u8]) -> Result<Vec<RawChunk<'_>>> {
    let mut chunks = Vec::new();
    while !data.is_empty() {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(SctpError::InvalidPacket(format!(
                "{} trailing bytes after last chunk",
                data.len()
            )));
        }
        let length = read_u16(data, 2)? as usize;
        if length < CHUNK_HEADER_SIZE {
            return Err(SctpError::InvalidPacket(format!(
                "chunk type {} has invalid length {}",
                data[0], length
            )));
        }
        if length > data.len() {
            return Err(SctpError::InvalidPacket(format!(
                "chunk type {} declares {} bytes but only {} remain",
                data[0],
                length,
                data.len()
            )));
        }
        chunks.push(RawChunk {
            chunk_type: data[0],
            flags: data[1],
            value: &data[CHUNK_HEADER_SIZE..length],
            bytes: &data[..length],
        });
        data = &data[padded_len(length).min(data.len())..];
    }
    Ok(chunks)
}

/// Validates framing and checksum of an inbound frame.
///
/// # Errors
///
/// Returns `SctpError::InvalidPacket` if the frame is shorter than the common
/// header, carries no chunk, fails the CRC32c check, or a chunk length runs
/// past the end of the buffer.
pub fn parse_frame(data: &[u8]) -> Result<(CommonHeader, Vec<RawChunk<'_>>)> {
    if data.len() < COMMON_HEADER_SIZE + CHUNK_HEADER_SIZE {
        return Err(SctpError::InvalidPacket(format!(
            "frame of {} bytes is too short",
            data.len()
        )));
    }
    if !verify_checksum(data) {
        return Err(SctpError::InvalidPacket("checksum mismatch".to_string()));
    }
    let header = CommonHeader::parse(data)?;
    let chunks = split_chunks(&data[COMMON_HEADER_SIZE..])?;
    Ok((header, chunks))
}

/// Fully decoded SCTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SctpPacket {
    pub header: CommonHeader,
    pub chunks: Vec<Chunk>,
}

impl SctpPacket {
    pub fn new(source_port: u16, destination_port: u16, verification_tag: u32) -> Self {
        Self {
            header: CommonHeader {
                source_port,
                destination_port,
                verification_tag,
            },
            chunks: Vec::new(),
        }
    }

    pub fn add_chunk(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    /// Serializes with a freshly computed checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COMMON_HEADER_SIZE];
        for chunk in &self.chunks {
            chunk.write_to(&mut buf);
        }
        finalize(&self.header, &mut buf);
        buf
    }

    /// Decodes a frame, failing on the first malformed chunk.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header, raws) = parse_frame(data)?;
        let chunks = raws.iter().map(Chunk::parse).collect::<Result<Vec<_>>>()?;
        Ok(Self { header, chunks })
    }
}

fn finalize(header: &CommonHeader, buf: &mut [u8]) {
    header.write_to(buf);
    let checksum = crc32c(buf);
    buf[8..12].copy_from_slice(&checksum.to_le_bytes());
}

/// Accumulates chunks for one outbound datagram bounded by the MTU.
#[derive(Debug)]
pub struct PacketBuilder {
    header: CommonHeader,
    mtu: usize,
    buf: Vec<u8>,
    chunk_count: usize,
}

impl PacketBuilder {
    pub fn new(header: CommonHeader, mtu: usize) -> Self {
        Self {
            header,
            mtu,
            buf: vec![0u8; COMMON_HEADER_SIZE],
            chunk_count: 0,
        }
    }

    pub fn verification_tag(&self) -> u32 {
        self.header.verification_tag
    }

    /// Appends a chunk. Callers check [`bytes_remaining`](Self::bytes_remaining)
    /// for size-sensitive chunks; control chunks are always accepted.
    pub fn add(&mut self, chunk: &Chunk) -> &mut Self {
        chunk.write_to(&mut self.buf);
        self.chunk_count += 1;
        self
    }

    pub fn bytes_remaining(&self) -> usize {
        self.mtu.saturating_sub(self.buf.len())
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }

    pub fn build(mut self) -> Vec<u8> {
        finalize(&self.header, &mut self.buf);
        self.buf
    }
}

/// True if the CRC32c in bytes 8..12 matches the rest of the frame.
pub fn verify_checksum(data: &[u8]) -> bool {
    if data.len() < COMMON_HEADER_SIZE {
        return false;
    }
    let received = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let mut verify_data = data.to_vec();
    verify_data[8..12].copy_from_slice(&[0u8; 4]);
    crc32c(&verify_data) == received
}

/// Calculate CRC32c checksum (RFC 3309)
pub fn crc32c(data: &[u8]) -> u32 {
    // CRC32c polynomial: 0x1EDC6F41 (Castagnoli)
    const CRC32C_TABLE: [u32; 256] = generate_crc32c_table();

    data.iter().fold(0xFFFFFFFF, |crc, byte| {
        CRC32C_TABLE[((crc ^ *byte as u32) & 0xFF) as usize] ^ (crc >> 8)
    }) ^ 0xFFFFFFFF
}

/// Lookup table built at compile time from the reflected polynomial
const fn generate_crc32c_table() -> [u32; 256] {
    const POLYNOMIAL: u32 = 0x82F63B78;
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::chunk::{DataChunk, ShutdownChunk};
    use crate::types::{Ssn, StreamId, Tsn};

    fn header(tag: u32) -> CommonHeader {
        CommonHeader {
            source_port: 5000,
            destination_port: 5001,
            verification_tag: tag,
        }
    }

    #[test]
    fn test_crc32c_known_vector() {
        // RFC 3720 test vector: 32 bytes of zeros
        assert_eq!(crc32c(&[0u8; 32]), 0x8A9136AA);
        assert_eq!(crc32c(b"123456789"), 0xE3069283);
    }

    #[test]
    fn test_packet_roundtrip() {
        let mut packet = SctpPacket::new(5000, 5001, 0x12345678);
        packet.add_chunk(Chunk::Data(DataChunk {
            tsn: Tsn(1),
            stream_id: StreamId(0),
            ssn: Ssn(0),
            ppid: 53,
            unordered: false,
            beginning: true,
            ending: true,
            payload: vec![1, 2, 3, 4, 5],
        }));
        packet.add_chunk(Chunk::CookieAck);

        let bytes = packet.to_bytes();
        assert!(verify_checksum(&bytes));
        assert_eq!(SctpPacket::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_corrupted_frame_fails_checksum() {
        let mut packet = SctpPacket::new(5000, 5000, 1);
        packet.add_chunk(Chunk::CookieAck);
        let mut bytes = packet.to_bytes();
        bytes[13] ^= 0xFF;

        assert!(!verify_checksum(&bytes));
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn test_chunk_length_past_buffer_rejected() {
        let mut buf = vec![0u8; COMMON_HEADER_SIZE];
        // COOKIE-ACK declaring 40 bytes
        buf.extend_from_slice(&[11, 0, 0, 40]);
        finalize(&header(7), &mut buf);

        assert!(matches!(
            parse_frame(&buf),
            Err(SctpError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(parse_frame(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_raw_chunks_expose_original_bytes() {
        let mut packet = SctpPacket::new(1, 2, 3);
        packet.add_chunk(Chunk::Shutdown(ShutdownChunk {
            cumulative_tsn_ack: Tsn(9),
        }));
        packet.add_chunk(Chunk::ShutdownAck);
        let bytes = packet.to_bytes();

        let (hdr, raws) = parse_frame(&bytes).unwrap();
        assert_eq!(hdr.verification_tag, 3);
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].bytes, &[7u8, 0, 0, 8, 0, 0, 0, 9][..]);
        assert_eq!(raws[1].chunk_type, 8);
        assert!(raws[1].value.is_empty());
    }

    #[test]
    fn test_builder_tracks_room() {
        let mut builder = PacketBuilder::new(header(42), 100);
        assert!(builder.is_empty());
        assert_eq!(builder.bytes_remaining(), 88);

        builder.add(&Chunk::CookieAck);
        assert_eq!(builder.bytes_remaining(), 84);

        let bytes = builder.build();
        let packet = SctpPacket::from_bytes(&bytes).unwrap();
        assert_eq!(packet.header, header(42));
        assert_eq!(packet.chunks, vec![Chunk::CookieAck]);
    }
}
