//! Copy orchestration: pre-flight checks and file/directory dispatch
// (c) 2025 Ross Younger
//!
//! These functions sit above [`TransferSession`] and apply the rules a user expects of a
//! copy command:
//!
//! * local sources are checked before anything is sent;
//! * a file is only uploaded into an existing remote directory;
//! * a remote directory is only downloaded when asked for recursively;
//! * copying onto an existing directory places the source inside it, unless told otherwise;
//! * wildcards in remote sources are expanded against the server.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Error;
use crate::glob::has_magic;
use crate::session::TransferSession;
use crate::transport::MessageChannel;
use crate::util::path::{join_remote, normalize_remote, split_remote};

/// Checks that a local source exists and is of the right type for the copy mode
pub async fn check_local_source(local: &Path, recursive: bool) -> Result<(), Error> {
    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| Error::local(local, e))?;
    match (meta.is_dir(), recursive) {
        (true, false) => Err(Error::local(
            local,
            std::io::Error::new(ErrorKind::IsADirectory, "Is a directory, use recursive copy"),
        )),
        (false, true) => Err(Error::local(
            local,
            std::io::Error::new(ErrorKind::NotADirectory, "Not a directory"),
        )),
        _ => Ok(()),
    }
}

/// Expands wildcards in remote sources, in order.
///
/// Sources without wildcards are kept as they are, without asking the server.
/// A pattern that matches nothing contributes nothing.
pub async fn expand_remote_sources<C: MessageChannel>(
    session: &mut TransferSession<C>,
    sources: &[String],
) -> Result<Vec<String>, Error> {
    let mut expanded = Vec::with_capacity(sources.len());
    for source in sources {
        if !has_magic(source) {
            expanded.push(source.clone());
            continue;
        }
        let matches = session.glob(source)?.collect().await?;
        if matches.is_empty() {
            warn!("no remote paths match {source:?}");
        }
        debug!("{source:?} matched {} path(s)", matches.len());
        expanded.extend(matches);
    }
    Ok(expanded)
}

/// Checks that `remote` is an existing remote directory
pub async fn require_remote_directory<C: MessageChannel>(
    session: &mut TransferSession<C>,
    remote: &str,
) -> Result<(), Error> {
    let remote = normalize_remote(remote);
    match session.stat(&remote).await {
        Ok(st) if st.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(remote)),
        Err(e) if e.is_not_found() => Err(Error::NotADirectory(remote)),
        Err(e) => Err(e),
    }
}

/// Checks that `local` is an existing local directory
pub async fn require_local_directory(local: &Path) -> Result<(), Error> {
    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| Error::local(local, e))?;
    if meta.is_dir() {
        Ok(())
    } else {
        Err(Error::local(
            local,
            std::io::Error::new(ErrorKind::NotADirectory, "Not a directory"),
        ))
    }
}

/// Works out the remote destination for an upload.
///
/// If `remote` is an existing directory (and `into_directory` is set), the source's
/// name is appended to it.
pub async fn remote_target<C: MessageChannel>(
    session: &mut TransferSession<C>,
    local: &Path,
    remote: &str,
    into_directory: bool,
) -> Result<String, Error> {
    let remote = normalize_remote(remote);
    if !into_directory {
        return Ok(remote);
    }
    let Some(name) = local.file_name().and_then(|n| n.to_str()) else {
        return Ok(remote);
    };
    match session.stat(&remote).await {
        Ok(st) if st.is_dir() => Ok(join_remote(&remote, name)),
        Ok(_) => Ok(remote),
        Err(e) if e.is_not_found() => Ok(remote),
        Err(e) => Err(e),
    }
}

/// Works out the local destination for a download, in the same way as [`remote_target`]
pub async fn local_target(remote: &str, local: &Path, into_directory: bool) -> PathBuf {
    let (_, name) = split_remote(remote);
    if into_directory
        && !name.is_empty()
        && tokio::fs::metadata(local)
            .await
            .is_ok_and(|m| m.is_dir())
    {
        local.join(name)
    } else {
        local.to_path_buf()
    }
}

/// Uploads `local` to `remote`.
///
/// Without `recursive`, `local` must be a file and the parent of `remote` must be an existing
/// remote directory ([`Error::NotADirectory`] otherwise). With `recursive`, `local` must be a
/// directory; `remote` and any missing parents are created.
pub async fn upload<C: MessageChannel>(
    session: &mut TransferSession<C>,
    local: &Path,
    remote: &str,
    recursive: bool,
) -> Result<(), Error> {
    check_local_source(local, recursive).await?;
    let remote = normalize_remote(remote);
    if recursive {
        debug!("upload dir {} -> {remote:?}", local.display());
        return session.upload_dir(local, &remote).await;
    }
    let (parent, _) = split_remote(&remote);
    require_remote_directory(session, parent).await?;
    debug!("upload file {} -> {remote:?}", local.display());
    session.upload_file(local, &remote).await
}

/// Downloads `remote` to `local`.
///
/// Without `recursive`, `remote` must be a regular file ([`Error::IsADirectory`] otherwise).
pub async fn download<C: MessageChannel>(
    session: &mut TransferSession<C>,
    remote: &str,
    local: &Path,
    recursive: bool,
) -> Result<(), Error> {
    let remote = normalize_remote(remote);
    if recursive {
        debug!("download dir {remote:?} -> {}", local.display());
        session.download_dir(&remote, local).await
    } else {
        debug!("download file {remote:?} -> {}", local.display());
        session.download_file(&remote, local).await
    }
}
