//! Transfer sessions: everything that happens on one connection
// (c) 2025 Ross Younger
//!
//! A [`TransferSession`] owns one connection, scoped to one remote root. Simple queries
//! (`stat`, `list`, `mkdirs`) are synchronous request/response pairs. File and tree transfers
//! are pipelined: the walker issues requests whose [handlers](ResponseHandler) issue further
//! requests, and the [`Correlator`] runs until the whole tree has been dealt with.

mod correlator;
pub use correlator::{Correlator, ResponseHandler};

mod progress;
pub use progress::{NoProgress, ProgressEvent, ProgressLog, ProgressSink};

mod transfer;
pub use transfer::{TransferOptions, TransferSession};

mod walker;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod test_helpers;

use serde::{Deserialize, Serialize};

/// The order in which the children of a directory are transferred.
///
/// Within each group, entries are ordered by name (bytewise).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DirectoryOrder {
    /// Files, then subdirectories
    #[default]
    FilesFirst,
    /// Subdirectories, then files
    DirectoriesFirst,
}

impl DirectoryOrder {
    /// Sort rank of an entry; lower goes first
    fn rank(self, is_dir: bool) -> u8 {
        match (self, is_dir) {
            (DirectoryOrder::FilesFirst, false) | (DirectoryOrder::DirectoriesFirst, true) => 0,
            _ => 1,
        }
    }
}
