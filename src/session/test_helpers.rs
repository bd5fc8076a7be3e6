//! Test helpers for driving the client side of the protocol
// (c) 2025 Ross Younger

use bytes::Bytes;

use crate::protocol::{decode, encode, CloseCode, FileStatus, Header};
use crate::transport::{MemoryChannel, MessageChannel as _};

/// A scripted stand-in for the server.
///
/// The test reads requests one at a time and decides how to answer each.
/// Sends are fire-and-forget; if the client has already gone away, they are quietly dropped.
pub(crate) struct FakePeer {
    channel: MemoryChannel,
}

impl FakePeer {
    pub(crate) fn new(channel: MemoryChannel) -> Self {
        Self { channel }
    }

    /// Waits for the next request frame. Returns `None` once the client closes.
    pub(crate) async fn next_request(&mut self) -> Option<(Header, Bytes)> {
        let message = self.channel.recv().await?.ok()?;
        Some(decode(message).expect("client sent a malformed frame"))
    }

    /// Collects exactly `n` requests
    pub(crate) async fn take_requests(&mut self, n: usize) -> Vec<(Header, Bytes)> {
        let mut result = Vec::with_capacity(n);
        for _ in 0..n {
            result.push(self.next_request().await.expect("client went away"));
        }
        result
    }

    pub(crate) async fn send(&mut self, header: &Header, payload: &[u8]) {
        let _ = self.channel.send(encode(header, payload).unwrap()).await;
    }

    /// Acknowledges a request
    pub(crate) async fn ack(&mut self, request: &Header, payload: Bytes) {
        let header = Header::ack(request.id.unwrap(), request.op);
        self.send(&header, &payload).await;
    }

    /// Acknowledges a `STAT` with the given status
    pub(crate) async fn ack_stat(&mut self, request: &Header, status: FileStatus) {
        let mut header = Header::ack(request.id.unwrap(), request.op);
        header.file_status = Some(status);
        self.send(&header, &[]).await;
    }

    /// Acknowledges a `LIST` with the given entries
    pub(crate) async fn ack_list(&mut self, request: &Header, entries: Vec<FileStatus>) {
        let mut header = Header::ack(request.id.unwrap(), request.op);
        header.file_statuses = Some(entries.into());
        self.send(&header, &[]).await;
    }

    /// Rejects a request
    pub(crate) async fn error(&mut self, request: &Header, errno: Option<&str>, message: &str) {
        let header = Header::error(request.id.unwrap(), request.op, errno, message);
        self.send(&header, &[]).await;
    }

    /// The code the client closed the connection with, once seen
    pub(crate) fn close_code(&self) -> Option<CloseCode> {
        self.channel.peer_close_code()
    }
}

/// Shorthand for building a [`FileStatus`]
pub(crate) fn status(path: &str, kind: crate::protocol::FileKind, size: u64) -> FileStatus {
    FileStatus {
        path: path.to_string(),
        kind,
        size,
        modification_time: 0,
        permission: "write".to_string(),
    }
}
