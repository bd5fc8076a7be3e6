//! Session greeting, exchanged once when a stream connection opens
// (c) 2025 Ross Younger
//!
//! * C ➡️ S : [`SessionRequest`]
//! * S ➡️ C : [`SessionResponse`]
//!
//! If the server refuses the session, it closes the connection after sending its response.

use serde::{Deserialize, Serialize};

use super::common::ProtocolMessage;

/// Access mode requested for a session
#[derive(
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
    Default,
    strum::Display,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
pub enum SessionMode {
    /// `STAT`, `LIST` and `READ` only
    #[default]
    Read,
    /// All operations
    Write,
}

/// The first message on a new connection
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SessionRequest {
    /// Remote root for this session. All frame paths are relative to it.
    pub path: String,
    /// Requested access
    pub mode: SessionMode,
}
impl ProtocolMessage for SessionRequest {
    const WIRE_ENCODING_LIMIT: u32 = 8192;
}

/// The server's answer to a [`SessionRequest`]
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum SessionResponse {
    /// The session is open; frames may follow
    Accepted,
    /// The session was refused, with a reason
    Refused(String),
}
impl ProtocolMessage for SessionResponse {}
