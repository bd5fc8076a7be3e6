//! Connecting to a storage server
// (c) 2025 Ross Younger

use anyhow::Context as _;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Error;
use crate::protocol::common::ProtocolMessage as _;
use crate::protocol::greeting::{SessionMode, SessionRequest, SessionResponse};
use crate::session::TransferSession;
use crate::transport::StreamChannel;

/// A transfer session running over TCP
pub type TcpSession = TransferSession<StreamChannel<OwnedWriteHalf>>;

/// Opens a session on the server at `addr`, rooted at the remote path `root`.
///
/// The server may refuse the session, for example if `root` is not a directory.
pub async fn connect(addr: &str, root: &str, mode: SessionMode) -> anyhow::Result<TcpSession> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(Error::Transport)
        .with_context(|| format!("connecting to {addr}"))?;
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    SessionRequest {
        path: root.to_string(),
        mode,
    }
    .to_writer_async_framed(&mut writer)
    .await
    .context("sending session request")?;
    match SessionResponse::from_reader_async_framed(&mut reader)
        .await
        .context("reading session response")?
    {
        SessionResponse::Accepted => (),
        SessionResponse::Refused(reason) => anyhow::bail!("server refused the session: {reason}"),
    }
    debug!("opened {mode} session on {addr} at {root:?}");
    Ok(TransferSession::new(StreamChannel::new(reader, writer), root))
}
