// (c) 2025 Ross Younger

//! # 🕵️ Troubleshooting
//!
//! ## General
//!
//! `--debug` turns on debug output from this crate. For finer control set `RUST_LOG`:
//! * `stcp=debug` is the same as `--debug`
//! * `stcp=trace` also logs every frame sent and received
//! * `stcp::server=trace` restricts that to the reference server
//!
//! `--log-file` writes the same output to a file, without colour codes, which is handy
//! when progress bars are in the way.
//!
//! ## Common issues
//!
//! ### Connection refused
//! * Is the server running, and listening where you think it is? The default address
//!   for both ends is `127.0.0.1:7470`; see `--remote` and `--listen`.
//! * The exit status is 6 for any failure to connect.
//!
//! ### The server refused the session
//! The session root (`--root`) must be an existing directory below the directory the server
//! is serving. Absolute paths and `..` are not accepted.
//!
//! ### Uploading a file fails with "Not a directory"
//! A single file is only uploaded into an existing remote directory. Create it first with
//! `stcp mkdir -p`, or upload a whole directory with `-r`, which creates missing parents.
//!
//! ### Errors with `EACCES`
//! Commands that only read (`ls`, `stat`, `glob`, `download`) open the session read-only.
//! The reference server refuses to modify anything in such a session.
//!
//! ### stcp isn't using the settings you expected it to
//! * Options given on the command line always override configuration files and the environment.
//! * The environment (`STCP_BLOCK_SIZE` and so on) overrides configuration files.
//! * A file named with `--config-file` overrides the user file, which overrides the system file.
//!
//! `stcp show-config` reports the settings that would be used and where each came from:
//! ```text
//! $ STCP_BLOCK_SIZE=65536 stcp show-config
//! ┌─────────────────┬──────────────────────┬───────────────────────────────────┐
//! │ field           │ value                │ source                            │
//! ├─────────────────┼──────────────────────┼───────────────────────────────────┤
//! │ remote          │ 127.0.0.1:7470       │ default                           │
//! │ listen          │ 127.0.0.1:7470       │ default                           │
//! │ block_size      │ 65536 (65.5kB)       │ `STCP_` environment variable(s)   │
//! │ directory_order │ files-first          │ default                           │
//! │ time_format     │ local                │ /home/xyz/.config/stcp/stcp.toml  │
//! └─────────────────┴──────────────────────┴───────────────────────────────────┘
//! ```
