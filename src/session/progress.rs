//! Progress reporting for file and tree transfers
// (c) 2025 Ross Younger

use std::sync::Mutex;

/// Receives progress events as a transfer proceeds.
///
/// Calls are made synchronously from the transfer's control flow, so implementations
/// should be quick. Every method has a no-op default.
///
/// `src` and `dst` are display names: local paths, or remote paths qualified with `storage:`.
#[allow(unused_variables)]
pub trait ProgressSink: Send + Sync {
    /// A file transfer has begun
    fn start(&self, src: &str, dst: &str, size: u64) {}
    /// `current` bytes of the file have been transferred
    fn step(&self, src: &str, dst: &str, current: u64, size: u64) {}
    /// A file transfer has finished
    fn complete(&self, src: &str, dst: &str, size: u64) {}
    /// A directory is about to be processed
    fn enter(&self, src: &str, dst: &str) {}
    /// All children of a directory have been scheduled
    fn leave(&self, src: &str, dst: &str) {}
    /// An entry was skipped
    fn fail(&self, src: &str, dst: &str, message: &str) {}
}

/// Ignores all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// A recorded progress event
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ProgressEvent {
    Start {
        src: String,
        dst: String,
        size: u64,
    },
    Step {
        src: String,
        dst: String,
        current: u64,
        size: u64,
    },
    Complete {
        src: String,
        dst: String,
        size: u64,
    },
    EnterDir {
        src: String,
        dst: String,
    },
    LeaveDir {
        src: String,
        dst: String,
    },
    Fail {
        src: String,
        dst: String,
        message: String,
    },
}

/// Records every event it is given, in order
#[derive(Debug, Default)]
pub struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressLog {
    /// A snapshot of the events so far
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProgressEvent>> {
        // a panic elsewhere does not invalidate the log
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, event: ProgressEvent) {
        self.lock().push(event);
    }
}

impl ProgressSink for ProgressLog {
    fn start(&self, src: &str, dst: &str, size: u64) {
        self.push(ProgressEvent::Start {
            src: src.into(),
            dst: dst.into(),
            size,
        });
    }
    fn step(&self, src: &str, dst: &str, current: u64, size: u64) {
        self.push(ProgressEvent::Step {
            src: src.into(),
            dst: dst.into(),
            current,
            size,
        });
    }
    fn complete(&self, src: &str, dst: &str, size: u64) {
        self.push(ProgressEvent::Complete {
            src: src.into(),
            dst: dst.into(),
            size,
        });
    }
    fn enter(&self, src: &str, dst: &str) {
        self.push(ProgressEvent::EnterDir {
            src: src.into(),
            dst: dst.into(),
        });
    }
    fn leave(&self, src: &str, dst: &str) {
        self.push(ProgressEvent::LeaveDir {
            src: src.into(),
            dst: dst.into(),
        });
    }
    fn fail(&self, src: &str, dst: &str, message: &str) {
        self.push(ProgressEvent::Fail {
            src: src.into(),
            dst: dst.into(),
            message: message.into(),
        });
    }
}
