//! Command Line Interface for stcp
// (c) 2025 Ross Younger
mod args;
mod cli_main;
mod progress;
pub mod styles;
pub use cli_main::{cli, exit_code, EXIT_LOCAL, EXIT_PROTOCOL, EXIT_REMOTE, EXIT_TRANSPORT};
