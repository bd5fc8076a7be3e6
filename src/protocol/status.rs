//! Remote file metadata
// (c) 2025 Ross Younger

use serde::{Deserialize, Serialize};

/// What sort of thing a remote path is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Anything else the server cares to report (symlinks, devices...)
    #[serde(other)]
    Other,
}

/// Metadata for one remote path, as returned by `STAT` and `LIST`.
///
/// In a `LIST` response `path` is the bare entry name; in a `STAT` response it is
/// whatever path the server chooses to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    /// Path or entry name
    pub path: String,
    /// File type
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// Size in bytes (meaningless for directories)
    #[serde(rename = "length")]
    pub size: u64,
    /// Last modification, seconds since the Unix epoch
    #[serde(rename = "modificationTime")]
    pub modification_time: u64,
    /// Access level granted to the caller, e.g. `read` or `write`
    pub permission: String,
}

impl FileStatus {
    /// Is this a regular file?
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
    /// Is this a directory?
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
    /// The final component of the path
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Wrapper for the body of a `LIST` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusList {
    /// Directory entries
    #[serde(rename = "FileStatus", default)]
    pub file_status: Vec<FileStatus>,
}

impl From<Vec<FileStatus>> for FileStatusList {
    fn from(file_status: Vec<FileStatus>) -> Self {
        Self { file_status }
    }
}
