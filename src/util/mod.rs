//! General utility code that didn't fit anywhere else
// (c) 2025 Ross Younger

pub mod path;

mod tracing;
pub use tracing::{
    is_initialized as tracing_is_initialised, setup as setup_tracing, trace_level,
    ConsoleTraceType, TimeFormat, TracingOptions,
};
