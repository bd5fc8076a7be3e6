//! Frame codec: the envelope for every request and response
// (c) 2025 Ross Younger
//!
//! # On-Wire Framing
//!
//! ```text
//! +---------------------+------------------------+-----------------+
//! | header_length (u32) | header (CBOR map)      | payload (bytes) |
//! +---------------------+------------------------+-----------------+
//! ```
//!
//! * `header_length` is big-endian and counts the 4 bytes of the length field itself,
//!   so it is always at least 4.
//! * The header is a CBOR map with string keys. Unknown keys are ignored when decoding.
//! * The payload is whatever remains of the message; it may be empty.
//!
//! A whole message may not exceed [`MAX_MESSAGE_SIZE`]. Anything that violates these
//! rules is a [`ProtocolError`] and is fatal to the connection.

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::status::{FileStatus, FileStatusList};
use crate::error::ProtocolError;

/// Default transfer block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Largest permissible block size (16 MiB)
pub const MAX_BLOCK_SIZE: usize = 16 << 20;

/// Largest permissible message: one maximal block plus generous header slack
pub const MAX_MESSAGE_SIZE: usize = MAX_BLOCK_SIZE + 65536 + 100;

/// Size of the header length prefix
const PREFIX_SIZE: usize = 4;

/// Operation codes.
///
/// `ACK` and `ERROR` only ever appear in responses; everything else is a request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Operation {
    Ack,
    Error,
    Read,
    Stat,
    List,
    Create,
    Write,
    Mkdirs,
}

impl Operation {
    /// Is this a response-only operation?
    #[must_use]
    pub fn is_response(self) -> bool {
        matches!(self, Operation::Ack | Operation::Error)
    }
}

/// Optional request parameters, flattened into the request header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Params {
    /// Byte offset (`READ`, `WRITE`)
    pub offset: Option<u64>,
    /// Byte count (`READ`) or declared file size (`CREATE`)
    pub size: Option<u64>,
    /// Create missing parents (`MKDIRS`)
    pub parents: Option<bool>,
    /// Tolerate an existing directory (`MKDIRS`)
    pub exist_ok: Option<bool>,
}

impl Params {
    /// Parameters for a `READ`
    #[must_use]
    pub fn read(offset: u64, size: u64) -> Self {
        Self {
            offset: Some(offset),
            size: Some(size),
            ..Self::default()
        }
    }
    /// Parameters for a `WRITE`
    #[must_use]
    pub fn write(offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..Self::default()
        }
    }
    /// Parameters for a `CREATE`
    #[must_use]
    pub fn create(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }
    /// Parameters for a `MKDIRS`
    #[must_use]
    pub fn mkdirs(parents: bool, exist_ok: bool) -> Self {
        Self {
            parents: Some(parents),
            exist_ok: Some(exist_ok),
            ..Self::default()
        }
    }
}

/// The decoded header map of a frame.
///
/// Requests carry `id`; responses carry `rid` and `rop`. Everything else depends on the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Operation code
    pub op: Operation,
    /// Request id (requests only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Id of the request being answered (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<u64>,
    /// Operation of the request being answered (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rop: Option<Operation>,
    /// Remote path, relative to the session root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exist_ok: Option<bool>,
    /// Error description (`ERROR` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Symbolic error name such as `ENOENT` (`ERROR` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
    /// Result of a `STAT`
    #[serde(
        rename = "FileStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub file_status: Option<FileStatus>,
    /// Result of a `LIST`
    #[serde(
        rename = "FileStatuses",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub file_statuses: Option<FileStatusList>,
}

impl Header {
    fn bare(op: Operation) -> Self {
        Self {
            op,
            id: None,
            rid: None,
            rop: None,
            path: None,
            offset: None,
            size: None,
            parents: None,
            exist_ok: None,
            error: None,
            errno: None,
            file_status: None,
            file_statuses: None,
        }
    }

    /// Builds a request header
    #[must_use]
    pub fn request(op: Operation, id: u64, path: &str, params: &Params) -> Self {
        Self {
            id: Some(id),
            path: Some(path.to_string()),
            offset: params.offset,
            size: params.size,
            parents: params.parents,
            exist_ok: params.exist_ok,
            ..Self::bare(op)
        }
    }

    /// Builds an `ACK` answering the given request
    #[must_use]
    pub fn ack(rid: u64, rop: Operation) -> Self {
        Self {
            rid: Some(rid),
            rop: Some(rop),
            ..Self::bare(Operation::Ack)
        }
    }

    /// Builds an `ERROR` answering the given request
    #[must_use]
    pub fn error(rid: u64, rop: Operation, errno: Option<&str>, message: &str) -> Self {
        Self {
            rid: Some(rid),
            rop: Some(rop),
            errno: errno.map(str::to_string),
            error: Some(message.to_string()),
            ..Self::bare(Operation::Error)
        }
    }

    /// The request parameters carried by this header
    #[must_use]
    pub fn params(&self) -> Params {
        Params {
            offset: self.offset,
            size: self.size,
            parents: self.parents,
            exist_ok: self.exist_ok,
        }
    }

    /// Path, or the empty string (which denotes the session root)
    #[must_use]
    pub fn path_or_root(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }
}

/// Encodes a frame.
///
/// This does not enforce [`MAX_MESSAGE_SIZE`]; the sender is expected to check the result.
pub fn encode(header: &Header, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut cbor = Vec::with_capacity(64);
    ciborium::into_writer(header, &mut cbor).map_err(|e| ProtocolError::Header(e.to_string()))?;
    let header_length =
        u32::try_from(cbor.len() + PREFIX_SIZE).map_err(|_| ProtocolError::TooLarge {
            size: cbor.len() + PREFIX_SIZE,
            limit: MAX_MESSAGE_SIZE,
        })?;
    let mut buf = BytesMut::with_capacity(PREFIX_SIZE + cbor.len() + payload.len());
    buf.put_u32(header_length);
    buf.put_slice(&cbor);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decodes a frame into its header and payload.
///
/// The payload shares the message's buffer.
pub fn decode(message: Bytes) -> Result<(Header, Bytes), ProtocolError> {
    let len = message.len();
    if len < PREFIX_SIZE {
        return Err(ProtocolError::TooShort(len));
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: len,
            limit: MAX_MESSAGE_SIZE,
        });
    }
    let header_length = (&message[..PREFIX_SIZE]).get_u32() as usize;
    if header_length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: header_length,
            limit: MAX_MESSAGE_SIZE,
        });
    }
    if header_length < PREFIX_SIZE || header_length > len {
        return Err(ProtocolError::BadHeaderLength {
            header_length,
            message_length: len,
        });
    }
    let header: Header = ciborium::from_reader(&message[PREFIX_SIZE..header_length])
        .map_err(|e| ProtocolError::Header(e.to_string()))?;
    Ok((header, message.slice(header_length..)))
}

/// Reasons for closing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[repr(u16)]
pub enum CloseCode {
    /// Orderly shutdown
    Normal = 1000,
    /// The peer broke the protocol
    ProtocolError = 1002,
    /// A message was too short to be a frame
    UnsupportedData = 1003,
    /// A message exceeded [`MAX_MESSAGE_SIZE`]
    MessageTooBig = 1009,
}

impl CloseCode {
    /// Numeric value of this code
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl ProtocolError {
    /// The close code to send when this error terminates a connection
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::TooShort(_) => CloseCode::UnsupportedData,
            ProtocolError::TooLarge { .. } => CloseCode::MessageTooBig,
            ProtocolError::ConnectionClosed => CloseCode::Normal,
            _ => CloseCode::ProtocolError,
        }
    }
}
