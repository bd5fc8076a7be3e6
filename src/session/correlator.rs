//! Request/response correlation over a shared channel
// (c) 2025 Ross Younger
//!
//! Every request carries an `id` unique within its connection. A response names the request it
//! answers (`rid`, `rop`), so requests may be pipelined freely: [`Correlator::async_request`]
//! registers a [`ResponseHandler`] continuation, and [`Correlator::run`] feeds each incoming
//! response to its handler. Handlers may issue further requests, so `run` keeps going until
//! nothing remains outstanding.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Error, ProtocolError, RemoteError};
use crate::protocol::{decode, encode, CloseCode, Header, Operation, Params, MAX_MESSAGE_SIZE};
use crate::transport::MessageChannel;

/// A continuation invoked when the response to an asynchronous request arrives.
///
/// Only `ACK` responses reach a handler. An `ERROR` response fails the whole [`Correlator::run`].
#[async_trait]
pub trait ResponseHandler<C: MessageChannel>: Send {
    /// Consumes the response. The handler may register further requests on `correlator`.
    async fn on_response(
        self: Box<Self>,
        correlator: &mut Correlator<C>,
        header: Header,
        payload: Bytes,
    ) -> Result<(), Error>;
}

struct PendingRequest<C: MessageChannel> {
    op: Operation,
    handler: Box<dyn ResponseHandler<C>>,
}

/// Owns a connection and the requests in flight on it
pub struct Correlator<C: MessageChannel> {
    channel: C,
    next_id: u64,
    pending: HashMap<u64, PendingRequest<C>>,
    closed: bool,
}

impl<C: MessageChannel> std::fmt::Debug for Correlator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: MessageChannel> Correlator<C> {
    /// Takes ownership of a connected channel
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            next_id: 1,
            pending: HashMap::new(),
            closed: false,
        }
    }

    /// Allocates the next request id. Ids are never reused within a connection.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Number of asynchronous requests awaiting a response
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Has the connection been closed, either deliberately or following a failure?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Access to the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Sends a request without registering any interest in its response.
    ///
    /// # Return
    /// The id allocated to the request
    pub async fn send(
        &mut self,
        op: Operation,
        path: &str,
        params: &Params,
        payload: &[u8],
    ) -> Result<u64, Error> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        let id = self.next_id();
        let header = Header::request(op, id, path, params);
        let message = encode(&header, payload)?;
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: message.len(),
                limit: MAX_MESSAGE_SIZE,
            }
            .into());
        }
        trace!("send {op} #{id} {path:?} {params:?} +{}", payload.len());
        if let Err(e) = self.channel.send(message).await {
            let err = Error::Transport(e);
            self.fail(&err).await;
            return Err(err);
        }
        Ok(id)
    }

    /// Sends a request and registers a handler for its response
    pub async fn async_request(
        &mut self,
        op: Operation,
        path: &str,
        params: &Params,
        payload: &[u8],
        handler: Box<dyn ResponseHandler<C>>,
    ) -> Result<u64, Error> {
        let id = self.send(op, path, params, payload).await?;
        let _ = self.pending.insert(id, PendingRequest { op, handler });
        Ok(id)
    }

    /// Sends a request and waits for its response, which must be the very next frame.
    ///
    /// Refused with [`Error::Busy`] while asynchronous requests are outstanding.
    /// An `ERROR` response is returned as [`Error::Remote`] and leaves the connection open;
    /// any other mismatch is a [`ProtocolError`] and closes it.
    pub async fn sync_request(
        &mut self,
        op: Operation,
        path: &str,
        params: &Params,
        payload: &[u8],
    ) -> Result<(Header, Bytes), Error> {
        if !self.pending.is_empty() {
            return Err(Error::Busy(self.pending.len()));
        }
        let id = self.send(op, path, params, payload).await?;
        let (header, data) = self.receive().await?;
        match check_sync_response(op, id, &header) {
            Ok(()) => Ok((header, data)),
            Err(e @ Error::Remote(_)) => Err(e),
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Dispatches responses to their handlers until no requests remain outstanding.
    ///
    /// Any failure (including an `ERROR` response) closes the connection and abandons
    /// every outstanding request.
    pub async fn run(&mut self) -> Result<(), Error> {
        while !self.pending.is_empty() {
            let (header, payload) = self.receive().await?;
            if let Err(e) = self.dispatch(header, payload).await {
                self.fail(&e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, header: Header, payload: Bytes) -> Result<(), Error> {
        let rid = header.rid.ok_or(ProtocolError::MissingField("rid"))?;
        let request = self
            .pending
            .remove(&rid)
            .ok_or(ProtocolError::UnknownResponse(rid))?;
        if header.op == Operation::Error {
            return Err(RemoteError::from_header(&header).into());
        }
        let rop = header.rop.ok_or(ProtocolError::MissingField("rop"))?;
        if rop != request.op {
            return Err(ProtocolError::OpMismatch {
                id: rid,
                expected: request.op,
                got: rop,
            }
            .into());
        }
        if header.op != Operation::Ack {
            return Err(ProtocolError::UnexpectedOperation(header.op).into());
        }
        request.handler.on_response(self, header, payload).await
    }

    /// Reads and decodes the next frame. Failures close the connection.
    async fn receive(&mut self) -> Result<(Header, Bytes), Error> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        let result = match self.channel.recv().await {
            None => Err(ProtocolError::ConnectionClosed.into()),
            Some(Err(e)) => Err(Error::transport(e)),
            Some(Ok(message)) => decode(message).map_err(Error::from),
        };
        match result {
            Ok((header, payload)) => {
                trace!(
                    "recv {} rid={:?} rop={:?} +{}",
                    header.op,
                    header.rid,
                    header.rop,
                    payload.len()
                );
                Ok((header, payload))
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Marks the connection closed and abandons everything outstanding
    async fn fail(&mut self, error: &Error) {
        if self.closed {
            return;
        }
        self.closed = true;
        let code = match error {
            Error::Protocol(p) => p.close_code(),
            _ => CloseCode::Normal,
        };
        debug!(
            "closing connection ({code}), abandoning {} request(s): {error}",
            self.pending.len()
        );
        self.pending.clear();
        self.channel.close(code).await;
    }

    /// Closes the connection in an orderly fashion
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            self.channel.close(CloseCode::Normal).await;
        }
    }
}

fn check_sync_response(op: Operation, id: u64, header: &Header) -> Result<(), Error> {
    let rid = header.rid.ok_or(ProtocolError::MissingField("rid"))?;
    if rid != id {
        return Err(ProtocolError::IdMismatch {
            op,
            expected: id,
            got: rid,
        }
        .into());
    }
    if header.op == Operation::Error {
        return Err(RemoteError::from_header(header).into());
    }
    let rop = header.rop.ok_or(ProtocolError::MissingField("rop"))?;
    if rop != op {
        return Err(ProtocolError::OpMismatch {
            id,
            expected: op,
            got: rop,
        }
        .into());
    }
    if header.op != Operation::Ack {
        return Err(ProtocolError::UnexpectedOperation(header.op).into());
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{Correlator, ResponseHandler};
    use crate::error::{Error, ProtocolError};
    use crate::protocol::{CloseCode, Header, Operation, Params, MAX_MESSAGE_SIZE};
    use crate::session::test_helpers::FakePeer;
    use crate::transport::{memory_pair, MemoryChannel, MessageChannel as _};

    /// Records the request id of every response it sees
    struct Recorder {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl ResponseHandler<MemoryChannel> for Recorder {
        async fn on_response(
            self: Box<Self>,
            _: &mut Correlator<MemoryChannel>,
            header: Header,
            _: Bytes,
        ) -> Result<(), Error> {
            self.seen.lock().unwrap().push(header.rid.unwrap());
            Ok(())
        }
    }

    /// Issues one follow-up request when called
    struct Chain {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl ResponseHandler<MemoryChannel> for Chain {
        async fn on_response(
            self: Box<Self>,
            correlator: &mut Correlator<MemoryChannel>,
            header: Header,
            _: Bytes,
        ) -> Result<(), Error> {
            self.seen.lock().unwrap().push(header.rid.unwrap());
            let _ = correlator
                .async_request(
                    Operation::Stat,
                    "next",
                    &Params::default(),
                    &[],
                    Box::new(Recorder {
                        seen: self.seen.clone(),
                    }),
                )
                .await?;
            Ok(())
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let (a, _b) = memory_pair();
        let mut c = Correlator::new(a);
        let ids: Vec<_> = (0..5).map(|_| c.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[rstest]
    #[case(vec![0, 1, 2, 3, 4])]
    #[case(vec![4, 3, 2, 1, 0])]
    #[case(vec![2, 0, 4, 1, 3])]
    #[tokio::test]
    async fn permuted_responses_each_dispatch_once(#[case] order: Vec<usize>) {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for i in 0..order.len() {
            ids.push(
                c.async_request(
                    Operation::Stat,
                    &format!("f{i}"),
                    &Params::default(),
                    &[],
                    Box::new(Recorder { seen: seen.clone() }),
                )
                .await
                .unwrap(),
            );
        }
        assert_eq!(c.pending(), order.len());
        let requests = peer.take_requests(order.len()).await;
        for &i in &order {
            peer.ack(&requests[i].0, Bytes::new()).await;
        }
        c.run().await.unwrap();
        assert_eq!(c.pending(), 0);
        let expected: Vec<u64> = order.iter().map(|&i| ids[i]).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn handlers_may_issue_more_requests() {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = c
            .async_request(
                Operation::Stat,
                "first",
                &Params::default(),
                &[],
                Box::new(Chain { seen: seen.clone() }),
            )
            .await
            .unwrap();
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack(&req, Bytes::new()).await;
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.path.as_deref(), Some("next"));
            peer.ack(&req, Bytes::new()).await;
        });
        c.run().await.unwrap();
        server.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![first, first + 1]);
    }

    #[rstest]
    #[case::wrong_op(0, Operation::List)]
    #[case::wrong_id(1, Operation::Stat)]
    #[tokio::test]
    async fn sync_mismatch_is_protocol_error(#[case] id_offset: u64, #[case] rop: Operation) {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.send(&Header::ack(req.id.unwrap() + id_offset, rop), &[]).await;
            peer
        });
        let err = c
            .sync_request(Operation::Stat, "a", &Params::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
        assert!(c.is_closed());
        let mut peer = server.await.unwrap();
        assert!(peer.next_request().await.is_none());
        assert_eq!(peer.close_code(), Some(CloseCode::ProtocolError));
    }

    #[tokio::test]
    async fn sync_remote_error_keeps_connection() {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.error(&req, Some("ENOENT"), "No such file or directory").await;
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack(&req, Bytes::new()).await;
        });
        let err = c
            .sync_request(Operation::Stat, "missing", &Params::default(), &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!c.is_closed());
        let _ = c
            .sync_request(Operation::Stat, "present", &Params::default(), &[])
            .await
            .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn sync_refused_while_busy() {
        let (a, _b) = memory_pair();
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _ = c
            .async_request(
                Operation::Stat,
                "x",
                &Params::default(),
                &[],
                Box::new(Recorder { seen }),
            )
            .await
            .unwrap();
        let err = c
            .sync_request(Operation::Stat, "y", &Params::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(1)));
    }

    #[tokio::test]
    async fn error_in_run_abandons_everything() {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let _ = c
                .async_request(
                    Operation::Stat,
                    name,
                    &Params::default(),
                    &[],
                    Box::new(Recorder { seen: seen.clone() }),
                )
                .await
                .unwrap();
        }
        let requests = peer.take_requests(3).await;
        peer.ack(&requests[0].0, Bytes::new()).await;
        peer.error(&requests[1].0, Some("EACCES"), "Permission denied").await;
        let err = c.run().await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)), "{err:?}");
        assert_eq!(c.pending(), 0);
        assert!(c.is_closed());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_response_is_fatal() {
        let (a, b) = memory_pair();
        let mut peer = FakePeer::new(b);
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _ = c
            .async_request(
                Operation::Stat,
                "a",
                &Params::default(),
                &[],
                Box::new(Recorder { seen }),
            )
            .await
            .unwrap();
        peer.send(&Header::ack(999, Operation::Stat), &[]).await;
        let err = c.run().await.unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::UnknownResponse(999))),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn oversize_incoming_closes_with_too_big() {
        let (a, mut b) = memory_pair();
        let mut c = Correlator::new(a);
        b.send(Bytes::from(vec![0u8; MAX_MESSAGE_SIZE + 1]))
            .await
            .unwrap();
        let err = c
            .sync_request(Operation::Stat, "a", &Params::default(), &[])
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::TooLarge { .. })),
            "{err:?}"
        );
        let _ = b.recv().await; // the STAT request
        assert!(b.recv().await.is_none());
        assert_eq!(b.peer_close_code(), Some(CloseCode::MessageTooBig));
    }

    #[tokio::test]
    async fn oversize_outgoing_is_refused() {
        let (a, _b) = memory_pair();
        let mut c = Correlator::new(a);
        let err = c
            .send(
                Operation::Write,
                "f",
                &Params::write(0),
                &vec![0u8; MAX_MESSAGE_SIZE],
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::TooLarge { .. })),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn peer_hangup_fails_run() {
        let (a, b) = memory_pair();
        let mut c = Correlator::new(a);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _ = c
            .async_request(
                Operation::Stat,
                "a",
                &Params::default(),
                &[],
                Box::new(Recorder { seen }),
            )
            .await
            .unwrap();
        drop(b);
        let err = c.run().await.unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::ConnectionClosed)),
            "{err:?}"
        );
    }
}
