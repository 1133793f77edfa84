//! Error causes carried in ABORT and ERROR chunks.

use super::{read_u16, read_u32, split_tlvs, write_tlv};
use crate::error::Result;
use crate::types::{StreamId, Tsn};
use std::fmt;

const INVALID_STREAM_IDENTIFIER: u16 = 1;
const OUT_OF_RESOURCE: u16 = 4;
const UNRECOGNIZED_CHUNK_TYPE: u16 = 6;
const NO_USER_DATA: u16 = 9;
const USER_INITIATED_ABORT: u16 = 12;
const PROTOCOL_VIOLATION: u16 = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCause {
    InvalidStreamIdentifier(StreamId),
    OutOfResource,
    /// Holds the offending chunk as received, header included
    UnrecognizedChunkType(Vec<u8>),
    NoUserData(Tsn),
    UserInitiatedAbort(String),
    ProtocolViolation(String),
    Other { code: u16, info: Vec<u8> },
}

impl ErrorCause {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCause::InvalidStreamIdentifier(_) => INVALID_STREAM_IDENTIFIER,
            ErrorCause::OutOfResource => OUT_OF_RESOURCE,
            ErrorCause::UnrecognizedChunkType(_) => UNRECOGNIZED_CHUNK_TYPE,
            ErrorCause::NoUserData(_) => NO_USER_DATA,
            ErrorCause::UserInitiatedAbort(_) => USER_INITIATED_ABORT,
            ErrorCause::ProtocolViolation(_) => PROTOCOL_VIOLATION,
            ErrorCause::Other { code, .. } => *code,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        let value = match self {
            ErrorCause::InvalidStreamIdentifier(id) => {
                let mut v = id.0.to_be_bytes().to_vec();
                v.extend_from_slice(&[0, 0]);
                v
            }
            ErrorCause::OutOfResource => Vec::new(),
            ErrorCause::UnrecognizedChunkType(chunk) => chunk.clone(),
            ErrorCause::NoUserData(tsn) => tsn.0.to_be_bytes().to_vec(),
            ErrorCause::UserInitiatedAbort(reason) | ErrorCause::ProtocolViolation(reason) => {
                reason.as_bytes().to_vec()
            }
            ErrorCause::Other { info, .. } => info.clone(),
        };
        write_tlv(buf, self.code(), &value);
    }

    fn parse(code: u16, value: &[u8]) -> Result<Self> {
        Ok(match code {
            INVALID_STREAM_IDENTIFIER => {
                ErrorCause::InvalidStreamIdentifier(StreamId(read_u16(value, 0)?))
            }
            OUT_OF_RESOURCE => ErrorCause::OutOfResource,
            UNRECOGNIZED_CHUNK_TYPE => ErrorCause::UnrecognizedChunkType(value.to_vec()),
            NO_USER_DATA => ErrorCause::NoUserData(Tsn(read_u32(value, 0)?)),
            USER_INITIATED_ABORT => {
                ErrorCause::UserInitiatedAbort(String::from_utf8_lossy(value).into_owned())
            }
            PROTOCOL_VIOLATION => {
                ErrorCause::ProtocolViolation(String::from_utf8_lossy(value).into_owned())
            }
            _ => ErrorCause::Other {
                code,
                info: value.to_vec(),
            },
        })
    }

    pub fn parse_all(data: &[u8]) -> Result<Vec<ErrorCause>> {
        split_tlvs(data)?
            .into_iter()
            .map(|(code, value)| Self::parse(code, value))
            .collect()
    }

    pub fn write_all(causes: &[ErrorCause], buf: &mut Vec<u8>) {
        for cause in causes {
            cause.write_to(buf);
        }
    }

    /// Human-readable summary of a cause list, used for events and logs.
    pub fn describe(causes: &[ErrorCause]) -> String {
        causes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::InvalidStreamIdentifier(id) => {
                write!(f, "Invalid Stream Identifier: {}", id)
            }
            ErrorCause::OutOfResource => write!(f, "Out Of Resource"),
            ErrorCause::UnrecognizedChunkType(chunk) => write!(
                f,
                "Unrecognized Chunk Type: {}",
                chunk.first().copied().unwrap_or_default()
            ),
            ErrorCause::NoUserData(tsn) => write!(f, "No User Data: tsn={}", tsn),
            ErrorCause::UserInitiatedAbort(reason) => {
                write!(f, "User-Initiated Abort: {}", reason)
            }
            ErrorCause::ProtocolViolation(reason) => write!(f, "Protocol Violation: {}", reason),
            ErrorCause::Other { code, .. } => write!(f, "Error cause {}", code),
        }
    }
}
