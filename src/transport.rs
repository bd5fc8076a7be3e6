//! Message channels carrying frames between client and server
// (c) 2025 Ross Younger
//!
//! The core only needs an ordered, reliable channel of discrete binary messages,
//! expressed by [`MessageChannel`]. Two implementations are provided:
//!
//! * [`StreamChannel`] runs over any byte stream (in practice, TCP), with each message
//!   prefixed by its length as a big-endian u32.
//! * [`MemoryChannel`] is an in-process pair, used by tests and by anything embedding both
//!   ends in the same process.

use std::collections::VecDeque;
use std::io::{Error as IoError, ErrorKind};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::ProtocolError;
use crate::protocol::{CloseCode, MAX_MESSAGE_SIZE};

/// An ordered, reliable channel of binary messages
#[async_trait]
pub trait MessageChannel: Send + 'static {
    /// Sends one message
    async fn send(&mut self, message: Bytes) -> std::io::Result<()>;
    /// Receives the next message, or `None` once the channel has closed
    async fn recv(&mut self) -> Option<std::io::Result<Bytes>>;
    /// Closes the channel, advising the peer why (where the transport can express it)
    async fn close(&mut self, code: CloseCode);
}

/////////////////////////////////////////////////////////////////////////////////////////////
// IN-MEMORY

#[derive(Debug)]
enum Message {
    Data(Bytes),
    Close(CloseCode),
}

/// One end of an in-process channel pair. Create with [`memory_pair`].
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    closed: Option<CloseCode>,
    peer_closed: Option<CloseCode>,
}

/// Creates a connected pair of in-memory channels
#[must_use]
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (tx1, rx1) = mpsc::unbounded_channel();
    let (tx2, rx2) = mpsc::unbounded_channel();
    (MemoryChannel::new(tx1, rx2), MemoryChannel::new(tx2, rx1))
}

impl MemoryChannel {
    fn new(tx: mpsc::UnboundedSender<Message>, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            tx,
            rx,
            closed: None,
            peer_closed: None,
        }
    }

    /// The code with which this end was closed, if it has been
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.closed
    }

    /// The code with which the other end closed, once this end has seen it
    #[must_use]
    pub fn peer_close_code(&self) -> Option<CloseCode> {
        self.peer_closed
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&mut self, message: Bytes) -> std::io::Result<()> {
        if self.closed.is_some() || self.peer_closed.is_some() {
            return Err(ErrorKind::BrokenPipe.into());
        }
        self.tx
            .send(Message::Data(message))
            .map_err(|_| IoError::from(ErrorKind::BrokenPipe))
    }

    async fn recv(&mut self) -> Option<std::io::Result<Bytes>> {
        if self.closed.is_some() {
            return None;
        }
        match self.rx.recv().await? {
            Message::Data(data) => Some(Ok(data)),
            Message::Close(code) => {
                self.peer_closed = Some(code);
                None
            }
        }
    }

    async fn close(&mut self, code: CloseCode) {
        if self.closed.is_none() {
            self.closed = Some(code);
            let _ = self.tx.send(Message::Close(code));
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// BYTE STREAM

/// Number of received messages a [`StreamChannel`] holds before it stops reading the stream
pub const INCOMING_QUEUE_DEPTH: usize = 16;

/// A message channel over a byte stream.
///
/// A background task reads the stream into a queue of at most [`INCOMING_QUEUE_DEPTH`]
/// messages. Once that is full the task stops reading, and the transport pushes back on
/// the peer.
///
/// A peer that is itself blocked writing to us cannot read what we send, so while a `send`
/// is stalled the queue is moved aside into a backlog, which `recv` returns first.
#[derive(Debug)]
pub struct StreamChannel<W> {
    writer: W,
    incoming: mpsc::Receiver<std::io::Result<Bytes>>,
    backlog: VecDeque<std::io::Result<Bytes>>,
    reader_task: JoinHandle<()>,
    closed: bool,
}

impl<W> StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps a pair of stream halves. Must be called within a tokio runtime.
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, incoming) = mpsc::channel(INCOMING_QUEUE_DEPTH);
        let reader_task = tokio::spawn(read_messages(reader, tx));
        Self {
            writer,
            incoming,
            backlog: VecDeque::new(),
            reader_task,
            closed: false,
        }
    }
}

async fn read_messages<R>(mut reader: R, tx: mpsc::Sender<std::io::Result<Bytes>>)
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                trace!("stream reached EOF");
                return;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        if len > MAX_MESSAGE_SIZE {
            let _ = tx.send(Err(IoError::new(
                ErrorKind::InvalidData,
                ProtocolError::TooLarge {
                    size: len,
                    limit: MAX_MESSAGE_SIZE,
                },
            )))
            .await;
            return;
        }
        let mut buf = BytesMut::zeroed(len);
        if let Err(e) = reader.read_exact(&mut buf).await {
            let _ = tx.send(Err(e)).await;
            return;
        }
        // waits here while the queue is full
        if tx.send(Ok(buf.freeze())).await.is_err() {
            // receiver has gone away
            return;
        }
    }
}

#[async_trait]
impl<W> MessageChannel for StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: Bytes) -> std::io::Result<()> {
        if self.closed {
            return Err(ErrorKind::BrokenPipe.into());
        }
        let len = u32::try_from(message.len())
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, e))?;
        let Self {
            writer,
            incoming,
            backlog,
            ..
        } = self;
        let write = async move {
            writer.write_u32(len).await?;
            writer.write_all(&message).await?;
            writer.flush().await
        };
        tokio::pin!(write);
        loop {
            tokio::select! {
                biased;
                result = &mut write => return result,
                Some(received) = incoming.recv() => {
                    trace!("send stalled, {} message(s) set aside", backlog.len() + 1);
                    backlog.push_back(received);
                }
            }
        }
    }

    async fn recv(&mut self) -> Option<std::io::Result<Bytes>> {
        if self.closed {
            return None;
        }
        if let Some(received) = self.backlog.pop_front() {
            return Some(received);
        }
        self.incoming.recv().await
    }

    async fn close(&mut self, code: CloseCode) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("closing stream ({code})");
        let _ = self.writer.shutdown().await;
        self.reader_task.abort();
    }
}

impl<W> Drop for StreamChannel<W> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
