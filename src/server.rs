//! Reference storage server
// (c) 2025 Ross Younger
//!
//! Serves a local directory over a [`MessageChannel`]. Every request receives exactly one
//! response, `ACK` or `ERROR`, in arrival order. Failed operations are reported to the client
//! with the symbolic errno name of the underlying local error; only protocol violations end
//! the session.
//!
//! Request paths are confined to the session root: absolute paths and `..` are refused with
//! `EINVAL`.

use std::io::{Error as IoError, ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Context as _;
use bytes::Bytes;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, trace_span, warn, Instrument as _};

use crate::error::{errno_name, Error, ProtocolError};
use crate::protocol::common::ProtocolMessage as _;
use crate::protocol::greeting::{SessionMode, SessionRequest, SessionResponse};
use crate::protocol::{
    decode, encode, FileKind, FileStatus, Header, Operation, Params, MAX_BLOCK_SIZE,
};
use crate::transport::{MessageChannel, StreamChannel};

/// Serves one session over `channel` until the client closes it.
///
/// `root` is the local directory corresponding to the session root.
/// Returns an error if the client breaks the protocol (after closing the channel with the
/// appropriate code) or if the channel fails.
pub async fn serve<C: MessageChannel>(
    mut channel: C,
    root: PathBuf,
    mode: SessionMode,
) -> Result<(), Error> {
    let storage = Storage { root, mode };
    debug!("serving {} ({mode})", storage.root.display());
    loop {
        let message = match channel.recv().await {
            None => {
                debug!("client closed the session");
                return Ok(());
            }
            Some(Err(e)) => {
                let e = Error::transport(e);
                if let Error::Protocol(p) = &e {
                    channel.close(p.close_code()).await;
                }
                return Err(e);
            }
            Some(Ok(message)) => message,
        };
        let reply = match storage.handle_message(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("closing session: {e}");
                channel.close(e.close_code()).await;
                return Err(e.into());
            }
        };
        channel.send(reply).await.map_err(Error::transport)?;
    }
}

/// Accepts TCP connections on `addr` and serves each from a subdirectory of `base`,
/// as requested in its session greeting. Runs until the listener fails.
pub async fn listen(addr: &str, base: PathBuf) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        "serving {} on {}",
        base.display(),
        listener.local_addr()?
    );
    accept_loop(listener, base).await
}

/// Serves connections arriving on an already bound listener
pub async fn accept_loop(listener: TcpListener, base: PathBuf) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let base = base.clone();
        let span = trace_span!("conn", %peer);
        let _ = tokio::spawn(
            async move {
                debug!("connection from {peer}");
                if let Err(e) = handle_connection(stream, &base).await {
                    warn!("session from {peer} failed: {e:#}");
                }
            }
            .instrument(span),
        );
    }
}

async fn handle_connection(stream: TcpStream, base: &Path) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let request = SessionRequest::from_reader_async_framed(&mut reader)
        .await
        .context("reading session request")?;
    debug!("session request {request:?}");
    let root = match session_root(base, &request.path).await {
        Ok(root) => root,
        Err(e) => {
            let reason = format!("{}: {e}", request.path);
            info!("refusing session: {reason}");
            SessionResponse::Refused(reason)
                .to_writer_async_framed(&mut writer)
                .await?;
            return Ok(());
        }
    };
    SessionResponse::Accepted
        .to_writer_async_framed(&mut writer)
        .await?;
    serve(StreamChannel::new(reader, writer), root, request.mode).await?;
    Ok(())
}

/// Resolves and checks the local directory for a requested session root
async fn session_root(base: &Path, path: &str) -> std::io::Result<PathBuf> {
    let root = confine(base, path)?;
    if tokio::fs::metadata(&root).await?.is_dir() {
        Ok(root)
    } else {
        Err(ErrorKind::NotADirectory.into())
    }
}

/// Maps a request path onto the local tree, refusing anything that would escape it
fn confine(root: &Path, path: &str) -> std::io::Result<PathBuf> {
    let mut result = root.to_path_buf();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => (),
            _ => {
                return Err(IoError::new(
                    ErrorKind::InvalidInput,
                    "path escapes the storage root",
                ))
            }
        }
    }
    Ok(result)
}

/// Prefixes an I/O error message with the request path it concerns
fn annotate(path: &str) -> impl FnOnce(IoError) -> IoError + '_ {
    move |e| IoError::new(e.kind(), format!("{path}: {e}"))
}

fn invalid(message: &str) -> IoError {
    IoError::new(ErrorKind::InvalidInput, message.to_string())
}

#[derive(Debug)]
struct Storage {
    root: PathBuf,
    mode: SessionMode,
}

impl Storage {
    /// Decodes a request and produces the encoded response.
    /// Only protocol violations are returned as errors.
    async fn handle_message(&self, message: Bytes) -> Result<Bytes, ProtocolError> {
        let (header, payload) = decode(message)?;
        if header.op.is_response() {
            return Err(ProtocolError::UnexpectedOperation(header.op));
        }
        let id = header.id.ok_or(ProtocolError::MissingField("id"))?;
        trace!(
            "recv {} #{id} {:?} +{}",
            header.op,
            header.path_or_root(),
            payload.len()
        );
        match self.handle(id, &header, payload).await {
            Ok((ack, data)) => encode(&ack, &data),
            Err(e) => {
                debug!("{} #{id} failed: {e}", header.op);
                encode(
                    &Header::error(id, header.op, Some(errno_name(&e)), &e.to_string()),
                    &[],
                )
            }
        }
    }

    async fn handle(
        &self,
        id: u64,
        header: &Header,
        payload: Bytes,
    ) -> std::io::Result<(Header, Bytes)> {
        let path = header.path_or_root();
        let params = header.params();
        let mut ack = Header::ack(id, header.op);
        let mut data = Bytes::new();
        match header.op {
            Operation::Stat => ack.file_status = Some(self.stat(path).await?),
            Operation::List => ack.file_statuses = Some(self.list(path).await?.into()),
            Operation::Read => data = self.read(path, &params).await?,
            Operation::Create => self.create(path, &params).await?,
            Operation::Write => self.write(path, &params, &payload).await?,
            Operation::Mkdirs => self.mkdirs(path, &params).await?,
            Operation::Ack | Operation::Error => return Err(invalid("not a request")),
        }
        Ok((ack, data))
    }

    fn resolve(&self, path: &str) -> std::io::Result<PathBuf> {
        confine(&self.root, path).map_err(annotate(path))
    }

    fn check_writable(&self, path: &str) -> std::io::Result<()> {
        match self.mode {
            SessionMode::Write => Ok(()),
            SessionMode::Read => Err(IoError::new(
                ErrorKind::PermissionDenied,
                format!("{path}: session is read-only"),
            )),
        }
    }

    fn status(&self, path: &str, meta: Option<&std::fs::Metadata>) -> FileStatus {
        let kind = match meta {
            Some(m) if m.is_file() => FileKind::File,
            Some(m) if m.is_dir() => FileKind::Directory,
            _ => FileKind::Other,
        };
        let modification_time = meta
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        FileStatus {
            path: path.to_string(),
            kind,
            size: meta.map_or(0, std::fs::Metadata::len),
            modification_time,
            permission: self.mode.to_string(),
        }
    }

    async fn stat(&self, path: &str) -> std::io::Result<FileStatus> {
        let local = self.resolve(path)?;
        let meta = tokio::fs::metadata(&local).await.map_err(annotate(path))?;
        Ok(self.status(path, Some(&meta)))
    }

    async fn list(&self, path: &str) -> std::io::Result<Vec<FileStatus>> {
        let local = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&local).await.map_err(annotate(path))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(annotate(path))? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!("skipping non-UTF-8 name in {}", local.display());
                continue;
            };
            // follows symlinks; a dangling one is reported as neither file nor directory
            let meta = tokio::fs::metadata(entry.path()).await.ok();
            entries.push(self.status(&name, meta.as_ref()));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read(&self, path: &str, params: &Params) -> std::io::Result<Bytes> {
        let offset = params.offset.ok_or_else(|| invalid("READ requires an offset"))?;
        let size = params.size.ok_or_else(|| invalid("READ requires a size"))?;
        if size > MAX_BLOCK_SIZE as u64 {
            return Err(invalid(&format!(
                "READ of {size} bytes exceeds the limit of {MAX_BLOCK_SIZE}"
            )));
        }
        let local = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&local)
            .await
            .map_err(annotate(path))?;
        let _ = file.seek(SeekFrom::Start(offset)).await?;
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_BLOCK_SIZE
        let mut buf = Vec::with_capacity(size as usize);
        let _ = file.take(size).read_to_end(&mut buf).await?;
        Ok(buf.into())
    }

    async fn create(&self, path: &str, params: &Params) -> std::io::Result<()> {
        self.check_writable(path)?;
        let local = self.resolve(path)?;
        let file = tokio::fs::File::create(&local)
            .await
            .map_err(annotate(path))?;
        file.set_len(params.size.unwrap_or_default()).await?;
        Ok(())
    }

    async fn write(&self, path: &str, params: &Params, data: &[u8]) -> std::io::Result<()> {
        self.check_writable(path)?;
        let offset = params
            .offset
            .ok_or_else(|| invalid("WRITE requires an offset"))?;
        let local = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(annotate(path))?;
        let _ = file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }

    async fn mkdirs(&self, path: &str, params: &Params) -> std::io::Result<()> {
        self.check_writable(path)?;
        let local = self.resolve(path)?;
        if let Ok(meta) = tokio::fs::metadata(&local).await {
            return if params.exist_ok.unwrap_or_default() && meta.is_dir() {
                Ok(())
            } else {
                Err(IoError::new(
                    ErrorKind::AlreadyExists,
                    format!("{path}: already exists"),
                ))
            };
        }
        let result = if params.parents.unwrap_or_default() {
            tokio::fs::create_dir_all(&local).await
        } else {
            tokio::fs::create_dir(&local).await
        };
        result.map_err(annotate(path))
    }
}
