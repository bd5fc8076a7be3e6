//! Storage transfer protocol definitions
// (c) 2025 Ross Younger
//!
//! The protocol runs over a persistent, ordered, reliable message channel
//! (see [`crate::transport`]).
//!
//! * Client ➡️ Server: (opens connection)
//! * C ➡️ S : [`SessionRequest`](greeting::SessionRequest), naming the remote root and the access mode.
//!   This is the only message encoded with [BARE].
//! * S ➡️ C : [`SessionResponse`](greeting::SessionResponse)
//! * Then any number of request [frames](frame) from the client, each answered by exactly one
//!   `ACK` or `ERROR` frame from the server. The server never initiates.
//!
//! Requests may be pipelined: the client does not need to wait for a response before sending
//! its next request. Responses carry the id (`rid`) and operation (`rop`) of the request they answer.
//!
//! The following operations are defined:
//!
//! | Operation | Parameters           | Request payload | ACK contents                          |
//! |-----------|----------------------|-----------------|---------------------------------------|
//! | `STAT`    |                      |                 | `FileStatus`                          |
//! | `LIST`    |                      |                 | `FileStatuses: { FileStatus: [...] }` |
//! | `READ`    | `offset`, `size`     |                 | the data, as payload                  |
//! | `CREATE`  | `size`               |                 |                                       |
//! | `WRITE`   | `offset`             | the data        |                                       |
//! | `MKDIRS`  | `parents`, `exist_ok`|                 |                                       |
//!
//! An `ERROR` response carries a human-readable `error` and, usually, a symbolic `errno`.
//!
//! [BARE]: https://www.ietf.org/archive/id/draft-devault-bare-11.html

pub mod common;
pub mod frame;
pub mod greeting;
pub mod status;

pub use frame::{
    decode, encode, CloseCode, Header, Operation, Params, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE,
    MAX_MESSAGE_SIZE,
};
pub use status::{FileKind, FileStatus};
