//! The transfer session
// (c) 2025 Ross Younger

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::walker::{self, WalkContext};
use super::{Correlator, DirectoryOrder, NoProgress, ProgressSink};
use crate::error::{Error, ProtocolError};
use crate::protocol::{FileStatus, Operation, Params, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::transport::MessageChannel;

/// Tuning for file and tree transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Size of each `READ` or `WRITE`. Clamped to 1 byte ..= 16 MiB.
    pub block_size: usize,
    /// Order in which directory children are transferred
    pub order: DirectoryOrder,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            order: DirectoryOrder::default(),
        }
    }
}

/// One connection to the storage service, scoped to one remote root.
///
/// All paths given to a session are relative to its root, with `""` meaning the root itself.
pub struct TransferSession<C: MessageChannel> {
    correlator: Correlator<C>,
    root: String,
    options: TransferOptions,
    progress: Arc<dyn ProgressSink>,
}

impl<C: MessageChannel> std::fmt::Debug for TransferSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

impl<C: MessageChannel> TransferSession<C> {
    /// Wraps a connected channel.
    ///
    /// `root` is only used to name remote paths in progress reports; the server already
    /// knows which root the connection belongs to.
    pub fn new(channel: C, root: &str) -> Self {
        Self {
            correlator: Correlator::new(channel),
            root: root.to_string(),
            options: TransferOptions::default(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Sets the transfer options
    #[must_use]
    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = TransferOptions {
            block_size: options.block_size.clamp(1, MAX_BLOCK_SIZE),
            ..options
        };
        self
    }

    /// Sets the progress sink
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// The remote root of this session
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The active transfer options
    #[must_use]
    pub fn options(&self) -> TransferOptions {
        self.options
    }

    /// Direct access to the request machinery
    pub fn correlator(&mut self) -> &mut Correlator<C> {
        &mut self.correlator
    }

    fn context(&self) -> Arc<WalkContext> {
        Arc::new(WalkContext {
            block_size: self.options.block_size,
            order: self.options.order,
            progress: self.progress.clone(),
            remote_root: self.root.clone(),
        })
    }

    /// Retrieves the status of a remote path
    pub async fn stat(&mut self, path: &str) -> Result<FileStatus, Error> {
        let (header, _) = self
            .correlator
            .sync_request(Operation::Stat, path, &Params::default(), &[])
            .await?;
        Ok(header
            .file_status
            .ok_or(ProtocolError::MissingField("FileStatus"))?)
    }

    /// Lists a remote directory. Entry paths are bare names.
    pub async fn list(&mut self, path: &str) -> Result<Vec<FileStatus>, Error> {
        let (header, _) = self
            .correlator
            .sync_request(Operation::List, path, &Params::default(), &[])
            .await?;
        Ok(header
            .file_statuses
            .ok_or(ProtocolError::MissingField("FileStatuses"))?
            .file_status)
    }

    /// Creates a remote directory.
    ///
    /// * `parents`: also create any missing parents
    /// * `exist_ok`: an existing directory is not an error
    pub async fn mkdirs(&mut self, path: &str, parents: bool, exist_ok: bool) -> Result<(), Error> {
        let _ = self
            .correlator
            .sync_request(
                Operation::Mkdirs,
                path,
                &Params::mkdirs(parents, exist_ok),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Uploads a single local file to `remote`, which is created or overwritten.
    ///
    /// The local file must exist and must not be a directory; this is checked before
    /// anything is sent.
    pub async fn upload_file(&mut self, local: &Path, remote: &str) -> Result<(), Error> {
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| Error::local(local, e))?;
        if meta.is_dir() {
            return Err(Error::local(
                local,
                std::io::Error::new(ErrorKind::IsADirectory, "Is a directory, use recursive copy"),
            ));
        }
        let ctx = self.context();
        walker::send_create(
            &mut self.correlator,
            &ctx,
            local.to_path_buf(),
            remote.to_string(),
            meta.len(),
        )
        .await?;
        self.run().await
    }

    /// Recursively uploads a local directory to `remote`, creating it if need be.
    pub async fn upload_dir(&mut self, local: &Path, remote: &str) -> Result<(), Error> {
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| Error::local(local, e))?;
        if !meta.is_dir() {
            return Err(Error::local(
                local,
                std::io::Error::new(ErrorKind::NotADirectory, "Not a directory"),
            ));
        }
        let ctx = self.context();
        walker::send_mkdir(
            &mut self.correlator,
            &ctx,
            local.to_path_buf(),
            remote.to_string(),
        )
        .await?;
        self.run().await
    }

    /// Downloads a single remote file to `local`, which is created or overwritten.
    ///
    /// Fails with [`Error::IsADirectory`] if `remote` is not a regular file.
    pub async fn download_file(&mut self, remote: &str, local: &Path) -> Result<(), Error> {
        let ctx = self.context();
        walker::send_download(
            &mut self.correlator,
            &ctx,
            remote.to_string(),
            local.to_path_buf(),
        )
        .await?;
        self.run().await
    }

    /// Recursively downloads a remote directory to `local`, creating it if need be.
    pub async fn download_dir(&mut self, remote: &str, local: &Path) -> Result<(), Error> {
        let ctx = self.context();
        walker::send_list(
            &mut self.correlator,
            &ctx,
            remote.to_string(),
            PathBuf::from(local),
        )
        .await?;
        self.run().await
    }

    async fn run(&mut self) -> Result<(), Error> {
        let result = self.correlator.run().await;
        debug!("transfer finished: {result:?}");
        result
    }

    /// Closes the connection in an orderly fashion
    pub async fn close(mut self) {
        self.correlator.close().await;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::sync::Arc;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::{TransferOptions, TransferSession};
    use crate::error::Error;
    use crate::protocol::{FileKind, Operation, MAX_BLOCK_SIZE};
    use crate::session::test_helpers::{status, FakePeer};
    use crate::session::{DirectoryOrder, ProgressEvent, ProgressLog};
    use crate::transport::{memory_pair, MemoryChannel};

    fn session(block_size: usize) -> (TransferSession<MemoryChannel>, FakePeer, Arc<ProgressLog>) {
        let (a, b) = memory_pair();
        let log = Arc::new(ProgressLog::default());
        let session = TransferSession::new(a, "root")
            .with_options(TransferOptions {
                block_size,
                order: DirectoryOrder::FilesFirst,
            })
            .with_progress(log.clone());
        (session, FakePeer::new(b), log)
    }

    #[test]
    fn block_size_is_clamped() {
        let (s, _, _) = session(0);
        assert_eq!(s.options().block_size, 1);
        let (s, _, _) = session(usize::MAX);
        assert_eq!(s.options().block_size, MAX_BLOCK_SIZE);
    }

    #[tokio::test]
    async fn stat_and_list() {
        let (mut s, mut peer, _) = session(1024);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::Stat);
            peer.ack_stat(&req, status("a", FileKind::Directory, 0)).await;
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::List);
            peer.ack_list(
                &req,
                vec![
                    status("x.txt", FileKind::File, 3),
                    status("b", FileKind::Directory, 0),
                ],
            )
            .await;
        });
        assert!(s.stat("a").await.unwrap().is_dir());
        let entries = s.list("a").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "x.txt");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn mkdirs_sends_flags() {
        let (mut s, mut peer, _) = session(1024);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::Mkdirs);
            assert_eq!(req.parents, Some(false));
            assert_eq!(req.exist_ok, Some(true));
            peer.ack(&req, Bytes::new()).await;
        });
        s.mkdirs("new", false, true).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn upload_chunks_into_blocks() {
        const SIZE: usize = 10_000;
        const BLOCK: usize = 4096;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f.bin");
        let data: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
        std::fs::write(&local, &data).unwrap();

        let (mut s, mut peer, _) = session(BLOCK);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::Create);
            assert_eq!(req.size, Some(SIZE as u64));
            peer.ack(&req, Bytes::new()).await;
            let writes = peer.take_requests(SIZE.div_ceil(BLOCK)).await;
            let mut received = Vec::new();
            for (i, (req, payload)) in writes.iter().enumerate() {
                assert_eq!(req.op, Operation::Write);
                assert_eq!(req.offset, Some((i * BLOCK) as u64));
                received.extend_from_slice(payload);
            }
            for (req, _) in &writes {
                peer.ack(req, Bytes::new()).await;
            }
            received
        });
        s.upload_file(&local, "dst/f.bin").await.unwrap();
        assert_eq!(server.await.unwrap(), data);
    }

    #[tokio::test]
    async fn upload_reports_progress_per_acknowledged_block() {
        const SIZE: u64 = 3_000_000;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f.bin");
        std::fs::write(&local, vec![0x5a; 3_000_000]).unwrap();

        let (mut s, mut peer, log) = session(crate::protocol::DEFAULT_BLOCK_SIZE);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::Create);
            assert_eq!(req.path.as_deref(), Some("dst/f.bin"));
            assert_eq!(req.size, Some(SIZE));
            peer.ack(&req, Bytes::new()).await;
            let writes = peer.take_requests(3).await;
            let ranges: Vec<_> = writes
                .iter()
                .map(|(h, p)| {
                    let start = h.offset.unwrap();
                    (start, start + p.len() as u64)
                })
                .collect();
            assert_eq!(
                ranges,
                vec![(0, 1_048_576), (1_048_576, 2_097_152), (2_097_152, 3_000_000)]
            );
            for (req, _) in &writes {
                peer.ack(req, Bytes::new()).await;
            }
        });
        s.upload_file(&local, "dst/f.bin").await.unwrap();
        server.await.unwrap();

        let events = log.events();
        assert_eq!(events.len(), 5, "{events:?}");
        assert!(matches!(events[0], ProgressEvent::Start { size: SIZE, .. }));
        let steps: Vec<u64> = events[1..4]
            .iter()
            .map(|e| match e {
                ProgressEvent::Step { current, size, .. } => {
                    assert_eq!(*size, SIZE);
                    *current
                }
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(steps, vec![1_048_576, 2_097_152, 3_000_000]);
        assert!(matches!(events[4], ProgressEvent::Complete { size: SIZE, .. }));
    }

    #[tokio::test]
    async fn upload_of_directory_is_refused_locally() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, mut peer, _) = session(1024);
        let err = s.upload_file(dir.path(), "x").await.unwrap_err();
        assert!(matches!(err, Error::LocalIo { .. }), "{err:?}");
        let err = s
            .upload_dir(&dir.path().join("missing"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocalIo { .. }), "{err:?}");
        s.close().await;
        // nothing reached the wire
        assert!(peer.next_request().await.is_none());
    }

    #[tokio::test]
    async fn empty_file_completes_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("empty");
        std::fs::write(&local, b"").unwrap();
        let (mut s, mut peer, log) = session(1024);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack(&req, Bytes::new()).await;
        });
        s.upload_file(&local, "empty").await.unwrap();
        server.await.unwrap();
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProgressEvent::Complete { size: 0, .. }));
    }

    #[tokio::test]
    async fn download_writes_blocks_in_any_order() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("out.bin");
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 253) as u8).collect();
        let remote_data = Bytes::from(data.clone());

        let (mut s, mut peer, log) = session(1000);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::Stat);
            peer.ack_stat(&req, status("src.bin", FileKind::File, 2500))
                .await;
            let mut reads = peer.take_requests(3).await;
            reads.reverse();
            for (req, _) in reads {
                assert_eq!(req.op, Operation::Read);
                let offset = usize::try_from(req.offset.unwrap()).unwrap();
                let size = usize::try_from(req.size.unwrap()).unwrap();
                peer.ack(&req, remote_data.slice(offset..offset + size))
                    .await;
            }
        });
        s.download_file("src.bin", &local).await.unwrap();
        server.await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), data);
        let events = log.events();
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { size: 2500, .. })));
    }

    #[tokio::test]
    async fn download_of_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, mut peer, _) = session(1000);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack_stat(&req, status("d", FileKind::Directory, 0)).await;
        });
        let err = s
            .download_file("d", &dir.path().join("d"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IsADirectory(_)), "{err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn short_read_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, mut peer, _) = session(1000);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack_stat(&req, status("f", FileKind::File, 10)).await;
            let (req, _) = peer.next_request().await.unwrap();
            peer.ack(&req, Bytes::from_static(b"short")).await;
        });
        let err = s
            .download_file("f", &dir.path().join("f"))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::Protocol(crate::error::ProtocolError::ShortRead { .. })
            ),
            "{err:?}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_entry_is_skipped_with_one_fail() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("tree");
        let (mut s, mut peer, log) = session(1000);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.op, Operation::List);
            peer.ack_list(
                &req,
                vec![
                    status("a.txt", FileKind::File, 1),
                    status("fifo", FileKind::Other, 0),
                    status("z.txt", FileKind::File, 1),
                ],
            )
            .await;
            for (req, _) in peer.take_requests(2).await {
                assert_eq!(req.op, Operation::Read);
                peer.ack(&req, Bytes::from_static(b"x")).await;
            }
        });
        s.download_dir("", &local).await.unwrap();
        server.await.unwrap();
        let events = log.events();
        let fails: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Fail { .. }))
            .collect();
        assert_eq!(fails.len(), 1);
        assert!(local.join("a.txt").exists());
        assert!(local.join("z.txt").exists());
        assert!(!local.join("fifo").exists());
    }

    #[tokio::test]
    async fn directories_first_upload_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("up");
        std::fs::create_dir_all(root.join("c")).unwrap();
        std::fs::write(root.join("b.txt"), b"b").unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();

        let (a, b) = memory_pair();
        let mut s = TransferSession::new(a, "").with_options(TransferOptions {
            order: DirectoryOrder::DirectoriesFirst,
            ..TransferOptions::default()
        });
        let mut peer = FakePeer::new(b);
        let server = tokio::spawn(async move {
            let (req, _) = peer.next_request().await.unwrap();
            assert_eq!(req.path.as_deref(), Some("dst"));
            peer.ack(&req, Bytes::new()).await;
            let children = peer.take_requests(3).await;
            let paths: Vec<_> = children
                .iter()
                .map(|(h, _)| h.path.clone().unwrap())
                .collect();
            assert_eq!(paths, vec!["dst/c", "dst/a.txt", "dst/b.txt"]);
            // c is empty; each file gets one write
            for (req, _) in &children {
                peer.ack(req, Bytes::new()).await;
            }
            for (req, _) in peer.take_requests(2).await {
                assert_eq!(req.op, Operation::Write);
                peer.ack(&req, Bytes::new()).await;
            }
        });
        s.upload_dir(&root, "dst").await.unwrap();
        server.await.unwrap();
    }
}
