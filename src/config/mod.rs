// (c) 2025 Ross Younger
//! # 📖 Configuration management
//!
//! stcp obtains run-time configuration from the following sources, in decreasing order of
//! priority:
//! 1. Command-line options
//! 2. Environment variables prefixed `STCP_`, e.g. `STCP_BLOCK_SIZE=65536`
//! 3. A file named with `--config-file`
//! 4. The user's configuration file, `stcp/stcp.toml` in the platform configuration directory
//!    (on Linux, `~/.config/stcp/stcp.toml`)
//! 5. The system-wide configuration file, `/etc/stcp.toml`
//! 6. Hard-wired defaults
//!
//! Run `stcp show-config` to see the resulting values and where each came from.
//!
//! ## File format
//!
//! Configuration files are [TOML](https://toml.io). Keys are the field names of
//! [`Configuration`]:
//!
//! ```toml
//! remote = "storage.example.com:7470"
//! block_size = 4194304
//! directory_order = "directories-first"
//! time_format = "utc"
//! ```

mod manager;
pub use manager::{DisplayAdapter, Manager};

mod structure;
pub use structure::{Configuration, ConfigurationOverrides};

/// The base name of our configuration files
pub(crate) const BASE_CONFIG_FILENAME: &str = "stcp";

/// Location of the system-wide configuration file
pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/stcp.toml";

/// Prefix of configuration environment variables
pub(crate) const ENV_PREFIX: &str = "STCP_";
