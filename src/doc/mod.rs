//! 📖 Additional documentation
// (c) 2025 Ross Younger

pub mod troubleshooting;
