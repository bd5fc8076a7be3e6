// (c) 2025 Ross Younger

#![allow(clippy::doc_markdown)]
//! `stcp` is a bulk file transfer client for a remote storage service, with a reference server.
//!
//! ## Overview
//!
//! - 📦 Uploads and downloads single files or whole directory trees
//! - 🚀 Requests are pipelined; many blocks may be in flight on one connection
//! - 🔎 Wildcard expansion (`*`, `?`, `[...]`, `**`) against the remote tree
//! - 🧪 A reference server that serves a local directory, for testing and experiments
//!
//! ## 📖 How it works
//!
//! 1. The client opens a connection and sends a [greeting](protocol::greeting) naming a
//!    session root and whether it intends to write.
//! 1. Every subsequent message is a [frame](protocol::frame): a small CBOR header plus an
//!    optional binary payload.
//! 1. Requests carry an id; the server echoes it in the response. The [`session::Correlator`]
//!    matches the two up and runs the continuation registered for each request.
//! 1. Transfers are split into blocks (see [`Configuration::block_size`](config::Configuration)).
//!    Each block is a separate request.
//!
//! ## Configuration
//!
//! On the command line, stcp has a comprehensive `--help` message.
//! Most options can also be set in a config file or the environment; see [config].
//!
//! If things go wrong, see [troubleshooting](doc::troubleshooting).
//!
//! ## Miscellanea
//!
//! #### MSRV policy
//!
//! As this is an application crate, the MSRV is not guaranteed to remain stable.
//! The MSRV may be upgraded from time to time to take advantage of new language features.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod cli;
pub use cli::{cli, exit_code};
pub use cli::styles;

pub mod client;
pub mod config;
pub use config::Configuration;
pub mod copy;
pub mod doc;

mod error;
pub use error::{Error, ProtocolError, RemoteError};

pub mod glob;
pub mod protocol;
pub mod server;
pub mod session;
pub use session::TransferSession;
pub mod transport;
pub mod util;
