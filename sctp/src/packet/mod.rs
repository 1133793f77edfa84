//! SCTP wire format
//!
//! Encoding and decoding of the common header, chunks, parameters and error
//! causes. Decoders never panic on hostile input: every field read is bounds
//! checked and reported as [`SctpError::InvalidPacket`](crate::SctpError).

pub mod chunk;
pub mod error_cause;
pub mod parameter;
pub mod sctp_packet;

pub use chunk::{
    AbortChunk, Chunk, ChunkType, CookieEchoChunk, DataChunk, ErrorChunk, GapAckBlock,
    HeartbeatChunk, InitChunk, SackChunk, ShutdownChunk, ShutdownCompleteChunk, UnknownChunk,
};
pub use error_cause::ErrorCause;
pub use parameter::Parameter;
pub use sctp_packet::{
    CommonHeader, PacketBuilder, RawChunk, SctpPacket, crc32c, parse_frame, verify_checksum,
};

use crate::error::{Result, SctpError};

/// SCTP common header size in bytes
pub const COMMON_HEADER_SIZE: usize = 12;
/// Type, flags and length
pub const CHUNK_HEADER_SIZE: usize = 4;
/// Chunk header plus TSN, stream, SSN and PPID
pub const DATA_CHUNK_HEADER_SIZE: usize = 16;

/// Rounds `len` up to the 4-byte boundary chunks and parameters align to.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

pub(crate) fn pad(buf: &mut Vec<u8>) {
    let padding = padded_len(buf.len()) - buf.len();
    buf.extend(std::iter::repeat_n(0u8, padding));
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let high = read_u32(data, offset)? as u64;
    let low = read_u32(data, offset + 4)? as u64;
    Ok(high << 32 | low)
}

fn truncated(offset: usize) -> SctpError {
    SctpError::InvalidPacket(format!("truncated field at offset {}", offset))
}

/// Splits a sequence of 4-byte aligned TLVs (parameters and error causes
/// share this layout) into `(type, value)` pairs.
pub(crate) fn split_tlvs(mut data: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let tlv_type = read_u16(data, 0)?;
        let length = read_u16(data, 2)? as usize;
        if length < 4 || length > data.len() {
            return Err(SctpError::InvalidPacket(format!(
                "TLV type {} has invalid length {}",
                tlv_type, length
            )));
        }
        out.push((tlv_type, &data[4..length]));
        data = &data[padded_len(length).min(data.len())..];
    }
    Ok(out)
}

pub(crate) fn write_tlv(buf: &mut Vec<u8>, tlv_type: u16, value: &[u8]) {
    buf.extend_from_slice(&tlv_type.to_be_bytes());
    buf.extend_from_slice(&((4 + value.len()) as u16).to_be_bytes());
    buf.extend_from_slice(value);
    pad(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(17), 20);
    }

    #[test]
    fn test_read_out_of_bounds_is_error() {
        let data = [0u8, 1, 2];
        assert_eq!(read_u16(&data, 1).unwrap(), 0x0102);
        assert!(read_u16(&data, 2).is_err());
        assert!(read_u32(&data, 0).is_err());
    }

    #[test]
    fn test_split_tlvs_with_padding() {
        let mut buf = Vec::new();
        write_tlv(&mut buf, 7, &[1, 2, 3]);
        write_tlv(&mut buf, 1, &[9; 8]);
        assert_eq!(buf.len(), 8 + 12);

        let tlvs = split_tlvs(&buf).unwrap();
        assert_eq!(tlvs, vec![(7, &[1u8, 2, 3][..]), (1, &[9u8; 8][..])]);
    }

    #[test]
    fn test_split_tlvs_rejects_overlong() {
        let buf = [0u8, 7, 0, 40, 1, 2, 3, 4];
        assert!(split_tlvs(&buf).is_err());
    }
}
