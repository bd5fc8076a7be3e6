//! Pipelined file and tree transfers
// (c) 2025 Ross Younger
//!
//! Each `send_*` function issues one request and registers a handler to carry on when it
//! is acknowledged:
//!
//! | Transfer        | First request        | On ACK                                             |
//! |-----------------|----------------------|----------------------------------------------------|
//! | upload file     | `CREATE {size}`      | read the file in blocks, one `WRITE` per block     |
//! | upload tree     | `MKDIRS {parents}`   | list the local directory, recurse into each child |
//! | download file   | `STAT`               | `READ` each block (see [`send_reads`])             |
//! | download tree   | `LIST`               | create the local directory, recurse               |
//!
//! None of these wait for anything; [`Correlator::run`] drives the whole lot to completion.
//! Per-file progress steps are reported as each `WRITE` or `READ` is acknowledged.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tracing::{debug, trace, warn};

use super::{Correlator, DirectoryOrder, ProgressSink, ResponseHandler};
use crate::error::{Error, ProtocolError};
use crate::protocol::{FileKind, FileStatus, Header, Operation, Params};
use crate::transport::MessageChannel;
use crate::util::path::{is_simple_name, join_remote};

/// Settings shared by every handler in one transfer
pub(crate) struct WalkContext {
    pub(crate) block_size: usize,
    pub(crate) order: DirectoryOrder,
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) remote_root: String,
}

impl WalkContext {
    /// Display name for a remote path
    pub(crate) fn remote_name(&self, path: &str) -> String {
        format!("storage:{}", join_remote(&self.remote_root, path))
    }
}

/// Display name for a local path
fn local_name(path: &Path) -> String {
    path.display().to_string()
}

/// Something that can be sorted into a [`DirectoryOrder`]
trait WalkEntry {
    fn is_dir(&self) -> bool;
    fn name(&self) -> &str;
}

fn sort_entries<T: WalkEntry>(entries: &mut [T], order: DirectoryOrder) {
    entries.sort_by(|a, b| {
        order
            .rank(a.is_dir())
            .cmp(&order.rank(b.is_dir()))
            .then_with(|| a.name().cmp(b.name()))
    });
}

impl WalkEntry for FileStatus {
    fn is_dir(&self) -> bool {
        FileStatus::is_dir(self)
    }
    fn name(&self) -> &str {
        FileStatus::name(self)
    }
}

/// Byte count for one file, shared by the handlers of its blocks
struct FileTally {
    src: String,
    dst: String,
    size: u64,
    done: AtomicU64,
}

impl FileTally {
    fn new(src: String, dst: String, size: u64) -> Self {
        Self {
            src,
            dst,
            size,
            done: AtomicU64::new(0),
        }
    }

    /// Records `n` more bytes. Returns true when the file is complete.
    fn advance(&self, progress: &dyn ProgressSink, n: u64) -> bool {
        let current = self.done.fetch_add(n, Ordering::Relaxed) + n;
        progress.step(&self.src, &self.dst, current, self.size);
        if current >= self.size {
            progress.complete(&self.src, &self.dst, self.size);
            true
        } else {
            false
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// UPLOAD

/// Issues a `CREATE`; on acknowledgement, sends the contents of `local` in blocks.
pub(crate) async fn send_create<C: MessageChannel>(
    correlator: &mut Correlator<C>,
    ctx: &Arc<WalkContext>,
    local: PathBuf,
    remote: String,
    size: u64,
) -> Result<(), Error> {
    debug!("upload {} -> {remote:?} ({size} bytes)", local.display());
    let params = Params::create(size);
    let handler = Box::new(CreateAck {
        ctx: ctx.clone(),
        local,
        remote: remote.clone(),
        size,
    });
    let _ = correlator
        .async_request(Operation::Create, &remote, &params, &[], handler)
        .await?;
    Ok(())
}

struct CreateAck {
    ctx: Arc<WalkContext>,
    local: PathBuf,
    remote: String,
    size: u64,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for CreateAck {
    async fn on_response(
        self: Box<Self>,
        correlator: &mut Correlator<C>,
        _: Header,
        _: Bytes,
    ) -> Result<(), Error> {
        let src = local_name(&self.local);
        let dst = self.ctx.remote_name(&self.remote);
        self.ctx.progress.start(&src, &dst, self.size);
        if self.size == 0 {
            self.ctx.progress.complete(&src, &dst, 0);
            return Ok(());
        }

        let mut file = File::open(&self.local)
            .await
            .map_err(|e| Error::local(&self.local, e))?;
        let tally = Arc::new(FileTally::new(src, dst, self.size));
        let block = self.ctx.block_size as u64;
        let mut buf = Vec::with_capacity(self.ctx.block_size);
        let mut offset = 0u64;
        loop {
            buf.clear();
            let n = (&mut file)
                .take(block)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| Error::local(&self.local, e))? as u64;
            if n == 0 {
                break;
            }
            let handler = Box::new(WriteAck {
                ctx: self.ctx.clone(),
                tally: tally.clone(),
                len: n,
            });
            let _ = correlator
                .async_request(
                    Operation::Write,
                    &self.remote,
                    &Params::write(offset),
                    &buf,
                    handler,
                )
                .await?;
            offset += n;
        }
        if offset != self.size {
            return Err(Error::local(
                &self.local,
                std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "file size changed during upload (expected {}, read {offset})",
                        self.size
                    ),
                ),
            ));
        }
        Ok(())
    }
}

struct WriteAck {
    ctx: Arc<WalkContext>,
    tally: Arc<FileTally>,
    len: u64,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for WriteAck {
    async fn on_response(
        self: Box<Self>,
        _: &mut Correlator<C>,
        _: Header,
        _: Bytes,
    ) -> Result<(), Error> {
        let _ = self.tally.advance(self.ctx.progress.as_ref(), self.len);
        Ok(())
    }
}

/// Issues a `MKDIRS`; on acknowledgement, uploads every child of `local`.
pub(crate) async fn send_mkdir<C: MessageChannel>(
    correlator: &mut Correlator<C>,
    ctx: &Arc<WalkContext>,
    local: PathBuf,
    remote: String,
) -> Result<(), Error> {
    debug!("upload tree {} -> {remote:?}", local.display());
    let handler = Box::new(MkdirAck {
        ctx: ctx.clone(),
        local,
        remote: remote.clone(),
    });
    let _ = correlator
        .async_request(
            Operation::Mkdirs,
            &remote,
            &Params::mkdirs(true, true),
            &[],
            handler,
        )
        .await?;
    Ok(())
}

enum LocalKind {
    File(u64),
    Directory,
    Other(String),
}

struct LocalEntry {
    name: String,
    path: PathBuf,
    kind: LocalKind,
}

impl WalkEntry for LocalEntry {
    fn is_dir(&self) -> bool {
        matches!(self.kind, LocalKind::Directory)
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// Lists a local directory. Symlinks are followed; anything that is neither a file nor a
/// directory (or cannot be examined) is reported as [`LocalKind::Other`].
async fn read_local_dir(dir: &Path) -> Result<Vec<LocalEntry>, Error> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::local(dir, e))?;
    let mut result = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| Error::local(dir, e))?
    {
        let path = entry.path();
        let (name, kind) = match entry.file_name().into_string() {
            Ok(name) => {
                let kind = match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => LocalKind::File(meta.len()),
                    Ok(meta) if meta.is_dir() => LocalKind::Directory,
                    Ok(_) => LocalKind::Other("not regular file/directory".into()),
                    Err(e) => LocalKind::Other(e.to_string()),
                };
                (name, kind)
            }
            Err(raw) => (
                raw.to_string_lossy().into_owned(),
                LocalKind::Other("name is not valid UTF-8".into()),
            ),
        };
        result.push(LocalEntry { name, path, kind });
    }
    Ok(result)
}

struct MkdirAck {
    ctx: Arc<WalkContext>,
    local: PathBuf,
    remote: String,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for MkdirAck {
    async fn on_response(
        self: Box<Self>,
        correlator: &mut Correlator<C>,
        _: Header,
        _: Bytes,
    ) -> Result<(), Error> {
        let src = local_name(&self.local);
        let dst = self.ctx.remote_name(&self.remote);
        self.ctx.progress.enter(&src, &dst);
        let mut entries = read_local_dir(&self.local).await?;
        sort_entries(&mut entries, self.ctx.order);
        for entry in entries {
            let child = join_remote(&self.remote, &entry.name);
            match entry.kind {
                LocalKind::File(size) => {
                    send_create(correlator, &self.ctx, entry.path, child, size).await?;
                }
                LocalKind::Directory => {
                    send_mkdir(correlator, &self.ctx, entry.path, child).await?;
                }
                LocalKind::Other(why) => {
                    let message = format!("Cannot upload {}, {why}", entry.path.display());
                    warn!("{message}");
                    self.ctx.progress.fail(
                        &local_name(&entry.path),
                        &self.ctx.remote_name(&child),
                        &message,
                    );
                }
            }
        }
        self.ctx.progress.leave(&src, &dst);
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// DOWNLOAD

/// Issues a `STAT`; on acknowledgement, downloads the file.
///
/// Fails with [`Error::IsADirectory`] if the remote path is not a regular file.
pub(crate) async fn send_download<C: MessageChannel>(
    correlator: &mut Correlator<C>,
    ctx: &Arc<WalkContext>,
    remote: String,
    local: PathBuf,
) -> Result<(), Error> {
    debug!("download {remote:?} -> {}", local.display());
    let handler = Box::new(StatAck {
        ctx: ctx.clone(),
        remote: remote.clone(),
        local,
    });
    let _ = correlator
        .async_request(Operation::Stat, &remote, &Params::default(), &[], handler)
        .await?;
    Ok(())
}

struct StatAck {
    ctx: Arc<WalkContext>,
    remote: String,
    local: PathBuf,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for StatAck {
    async fn on_response(
        self: Box<Self>,
        correlator: &mut Correlator<C>,
        header: Header,
        _: Bytes,
    ) -> Result<(), Error> {
        let status = header
            .file_status
            .ok_or(ProtocolError::MissingField("FileStatus"))?;
        if !status.is_file() {
            return Err(Error::IsADirectory(self.ctx.remote_name(&self.remote)));
        }
        send_reads(correlator, &self.ctx, self.remote, self.local, status.size).await
    }
}

/// A local file being filled in by `READ` responses
struct DownloadTarget {
    local: PathBuf,
    file: tokio::sync::Mutex<File>,
    tally: FileTally,
}

/// Creates `local` at its final size, then issues a `READ` for every block of `remote`
pub(crate) async fn send_reads<C: MessageChannel>(
    correlator: &mut Correlator<C>,
    ctx: &Arc<WalkContext>,
    remote: String,
    local: PathBuf,
    size: u64,
) -> Result<(), Error> {
    let file = File::create(&local)
        .await
        .map_err(|e| Error::local(&local, e))?;
    file.set_len(size)
        .await
        .map_err(|e| Error::local(&local, e))?;
    let src = ctx.remote_name(&remote);
    let dst = local_name(&local);
    ctx.progress.start(&src, &dst, size);
    if size == 0 {
        ctx.progress.complete(&src, &dst, 0);
        return Ok(());
    }

    let target = Arc::new(DownloadTarget {
        local,
        file: tokio::sync::Mutex::new(file),
        tally: FileTally::new(src, dst, size),
    });
    let block = ctx.block_size as u64;
    let mut offset = 0u64;
    while offset < size {
        let len = block.min(size - offset);
        let handler = Box::new(ReadAck {
            ctx: ctx.clone(),
            target: target.clone(),
            offset,
            len,
        });
        let _ = correlator
            .async_request(
                Operation::Read,
                &remote,
                &Params::read(offset, len),
                &[],
                handler,
            )
            .await?;
        offset += len;
    }
    Ok(())
}

struct ReadAck {
    ctx: Arc<WalkContext>,
    target: Arc<DownloadTarget>,
    offset: u64,
    len: u64,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for ReadAck {
    async fn on_response(
        self: Box<Self>,
        _: &mut Correlator<C>,
        _: Header,
        payload: Bytes,
    ) -> Result<(), Error> {
        let got = payload.len() as u64;
        if got != self.len {
            return Err(ProtocolError::ShortRead {
                offset: self.offset,
                expected: self.len,
                got,
            }
            .into());
        }
        let target = &self.target;
        let mut file = target.file.lock().await;
        let _ = file
            .seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| Error::local(&target.local, e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| Error::local(&target.local, e))?;
        trace!("wrote {got} bytes at {} to {}", self.offset, target.local.display());
        if target.tally.advance(self.ctx.progress.as_ref(), got) {
            file.flush()
                .await
                .map_err(|e| Error::local(&target.local, e))?;
        }
        Ok(())
    }
}

/// Issues a `LIST`; on acknowledgement, creates `local` and downloads every child.
pub(crate) async fn send_list<C: MessageChannel>(
    correlator: &mut Correlator<C>,
    ctx: &Arc<WalkContext>,
    remote: String,
    local: PathBuf,
) -> Result<(), Error> {
    debug!("download tree {remote:?} -> {}", local.display());
    let handler = Box::new(ListAck {
        ctx: ctx.clone(),
        remote: remote.clone(),
        local,
    });
    let _ = correlator
        .async_request(Operation::List, &remote, &Params::default(), &[], handler)
        .await?;
    Ok(())
}

struct ListAck {
    ctx: Arc<WalkContext>,
    remote: String,
    local: PathBuf,
}

#[async_trait]
impl<C: MessageChannel> ResponseHandler<C> for ListAck {
    async fn on_response(
        self: Box<Self>,
        correlator: &mut Correlator<C>,
        header: Header,
        _: Bytes,
    ) -> Result<(), Error> {
        let mut entries = header
            .file_statuses
            .ok_or(ProtocolError::MissingField("FileStatuses"))?
            .file_status;
        let src = self.ctx.remote_name(&self.remote);
        let dst = local_name(&self.local);
        self.ctx.progress.enter(&src, &dst);
        tokio::fs::create_dir_all(&self.local)
            .await
            .map_err(|e| Error::local(&self.local, e))?;
        sort_entries(&mut entries, self.ctx.order);
        for entry in entries {
            let name = entry.name();
            let child_remote = join_remote(&self.remote, name);
            let child_local = self.local.join(name);
            let why = if is_simple_name(name) {
                match entry.kind {
                    FileKind::File => {
                        send_reads(correlator, &self.ctx, child_remote, child_local, entry.size)
                            .await?;
                        continue;
                    }
                    FileKind::Directory => {
                        send_list(correlator, &self.ctx, child_remote, child_local).await?;
                        continue;
                    }
                    FileKind::Other => "not regular file/directory",
                }
            } else {
                "invalid entry name"
            };
            let message = format!("Cannot download {child_remote:?}, {why}");
            warn!("{message}");
            self.ctx.progress.fail(
                &self.ctx.remote_name(&child_remote),
                &local_name(&child_local),
                &message,
            );
        }
        self.ctx.progress.leave(&src, &dst);
        Ok(())
    }
}
