//! Error taxonomy for the transfer core
// (c) 2025 Ross Younger

use std::io::ErrorKind;
use std::path::PathBuf;

use crate::protocol::{Header, Operation};

/// Everything that can go wrong inside the transfer core.
///
/// The variants are deliberately distinct so callers can tell an expected outcome
/// (a remote "not found") from a fatal one (a broken protocol exchange) by type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer broke the protocol. Always fatal to the connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The peer reported a failure with an ERROR frame
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// A local filesystem operation failed
    #[error("{}: {source}", path.display())]
    LocalIo {
        /// The local path concerned
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The underlying message channel failed
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),
    /// A remote path expected to be a directory is something else
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    /// A remote path expected to be a regular file is a directory
    #[error("Is a directory: {0}")]
    IsADirectory(String),
    /// A wildcard pattern could not be compiled
    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern {
        /// The offending pattern segment
        pattern: String,
        /// What was wrong with it
        message: String,
    },
    /// A synchronous request was attempted while pipelined requests were still in flight
    #[error("session busy: {0} request(s) still pending")]
    Busy(usize),
}

impl Error {
    /// Convenience constructor for [`Error::LocalIo`]
    pub fn local<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Wraps a channel failure. Channel errors carrying a [`ProtocolError`] are reported as such.
    #[must_use]
    pub fn transport(e: std::io::Error) -> Self {
        match e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ProtocolError>())
        {
            Some(p) => Error::Protocol(p.clone()),
            None => Error::Transport(e),
        }
    }

    /// Is this a remote "no such file or directory"?
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Remote(r) if r.is_not_found())
    }
}

/// Ways in which the peer can violate the protocol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message cannot even hold the length prefix
    #[error("message too short ({0} bytes)")]
    TooShort(usize),
    /// The message (or its declared header length) exceeds the frame limit
    #[error("message too large ({size} bytes, limit {limit})")]
    TooLarge {
        /// Size seen
        size: usize,
        /// Size permitted
        limit: usize,
    },
    /// The declared header length is inconsistent with the message
    #[error("invalid header length {header_length} in message of {message_length} bytes")]
    BadHeaderLength {
        /// Header length from the prefix
        header_length: usize,
        /// Size of the whole message
        message_length: usize,
    },
    /// The header map could not be decoded
    #[error("undecodable frame header: {0}")]
    Header(String),
    /// A synchronous response carried the wrong request id
    #[error("unexpected response id {got} for operation {op}, expected {expected}")]
    IdMismatch {
        /// The request operation
        op: Operation,
        /// Id we sent
        expected: u64,
        /// Id we received
        got: u64,
    },
    /// A synchronous response echoed the wrong operation
    #[error("unexpected response op {got} for request #{id}, expected {expected}")]
    OpMismatch {
        /// The request id
        id: u64,
        /// Operation we sent
        expected: Operation,
        /// Operation echoed back
        got: Operation,
    },
    /// A message arrived with an operation not valid in its position
    #[error("unexpected {0} message")]
    UnexpectedOperation(Operation),
    /// A response referred to a request we do not know about
    #[error("response #{0} does not match any pending request")]
    UnknownResponse(u64),
    /// A header lacked a field required for its operation
    #[error("message is missing the {0} field")]
    MissingField(&'static str),
    /// A READ response carried a different amount of data than requested
    #[error("read at offset {offset} returned {got} bytes, expected {expected}")]
    ShortRead {
        /// Requested offset
        offset: u64,
        /// Requested length
        expected: u64,
        /// Length received
        got: u64,
    },
    /// The connection ended (or was closed after an earlier failure)
    #[error("connection closed")]
    ConnectionClosed,
}

/// An ERROR frame received from the peer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{message}", .errno.as_ref().map(|e| format!("[{e}] ")).unwrap_or_default())]
pub struct RemoteError {
    /// Symbolic OS error name, e.g. `ENOENT`, when the peer supplied one
    pub errno: Option<String>,
    /// Human-readable description
    pub message: String,
}

impl RemoteError {
    /// Extracts the error details from an ERROR frame header
    #[must_use]
    pub fn from_header(header: &Header) -> Self {
        Self {
            errno: header.errno.clone(),
            message: header
                .error
                .clone()
                .unwrap_or_else(|| "unspecified remote error".to_string()),
        }
    }

    /// Maps the errno name to the nearest [`ErrorKind`]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.errno.as_deref() {
            Some("ENOENT") => ErrorKind::NotFound,
            Some("EEXIST") => ErrorKind::AlreadyExists,
            Some("EACCES" | "EPERM") => ErrorKind::PermissionDenied,
            Some("ENOTDIR") => ErrorKind::NotADirectory,
            Some("EISDIR") => ErrorKind::IsADirectory,
            Some("EINVAL") => ErrorKind::InvalidInput,
            Some("ENOSPC") => ErrorKind::StorageFull,
            _ => ErrorKind::Other,
        }
    }

    /// Is this the remote equivalent of "no such file or directory"?
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Symbolic errno name for a local I/O error, as sent in ERROR frames
pub(crate) fn errno_name(e: &std::io::Error) -> &'static str {
    match e.kind() {
        ErrorKind::NotFound => "ENOENT",
        ErrorKind::AlreadyExists => "EEXIST",
        ErrorKind::PermissionDenied => "EACCES",
        ErrorKind::NotADirectory => "ENOTDIR",
        ErrorKind::IsADirectory => "EISDIR",
        ErrorKind::InvalidInput => "EINVAL",
        ErrorKind::StorageFull => "ENOSPC",
        _ => "EIO",
    }
}
