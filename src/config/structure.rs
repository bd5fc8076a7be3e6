//! Configuration structure
// (c) 2025 Ross Younger

use std::sync::LazyLock;

use anyhow::Result;
use human_repr::HumanCount as _;
use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::session::{DirectoryOrder, TransferOptions};
use crate::util::TimeFormat;

/// Default server address, for both connecting and listening
const DEFAULT_ADDRESS: &str = "127.0.0.1:7470";

/// The set of configurable options supported by stcp.
///
/// In configuration files and the environment, field names are snake_case
/// (`block_size`, `STCP_BLOCK_SIZE`). On the command line they are kebab-case
/// (`--block-size`).
///
/// There is no `default()`; the hard-wired defaults are [`Configuration::system_default()`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// Address of the storage server to connect to, as `host:port`
    pub remote: String,
    /// Address the reference server listens on, as `host:port`
    pub listen: String,
    /// Size of each block read or written, in bytes (1 to 16 MiB)
    pub block_size: u64,
    /// Whether files or subdirectories go first when transferring a tree
    pub directory_order: DirectoryOrder,
    /// Time format for log messages
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: LazyLock<Configuration> = LazyLock::new(|| Configuration {
    remote: DEFAULT_ADDRESS.to_string(),
    listen: DEFAULT_ADDRESS.to_string(),
    block_size: DEFAULT_BLOCK_SIZE as u64,
    directory_order: DirectoryOrder::default(),
    time_format: TimeFormat::default(),
});

impl Configuration {
    /// Hard-wired configuration defaults
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Names of all fields, as used in configuration files
    pub const FIELD_NAMES: &'static [&'static str] = &[
        "remote",
        "listen",
        "block_size",
        "directory_order",
        "time_format",
    ];

    /// Checks the values for consistency
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=MAX_BLOCK_SIZE as u64).contains(&self.block_size),
            "block_size {} is out of range (1 to {})",
            self.block_size,
            MAX_BLOCK_SIZE.human_count_bytes()
        );
        anyhow::ensure!(!self.remote.is_empty(), "remote address must not be empty");
        anyhow::ensure!(!self.listen.is_empty(), "listen address must not be empty");
        Ok(())
    }

    /// The transfer tuning implied by this configuration
    #[must_use]
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            block_size: usize::try_from(self.block_size).unwrap_or(MAX_BLOCK_SIZE),
            order: self.directory_order,
        }
    }

    /// Renders a field's value for display
    pub(super) fn render(&self, field: &str) -> Option<String> {
        Some(match field {
            "remote" => self.remote.clone(),
            "listen" => self.listen.clone(),
            "block_size" => format!(
                "{} ({})",
                self.block_size,
                self.block_size.human_count_bytes()
            ),
            "directory_order" => self.directory_order.to_string(),
            "time_format" => self.time_format.to_string(),
            _ => return None,
        })
    }
}

/// Configuration given on the command line.
///
/// Every member is optional; anything not given defers to lower-priority sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, clap::Args)]
pub struct ConfigurationOverrides {
    /// Storage server to connect to [default: 127.0.0.1:7470]
    #[arg(
        long,
        short = 'R',
        global = true,
        value_name = "host:port",
        help_heading("Configuration")
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Address to listen on in server mode [default: 127.0.0.1:7470]
    #[arg(long, global = true, value_name = "host:port", help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Transfer block size in bytes, 1 to 16777216 [default: 1048576]
    #[arg(long, short = 'b', global = true, value_name = "bytes", help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u64>,

    /// Order in which directory children are transferred [default: files-first]
    #[arg(long, global = true, value_name = "order", help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_order: Option<DirectoryOrder>,

    /// Time format for log messages [default: local]
    #[arg(long, global = true, value_name = "format", help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}
