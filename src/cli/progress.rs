//! Progress bars for file transfers
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::session::ProgressSink;

/// Maximum update frequency we will use for the progress display
pub(crate) const MAX_UPDATE_FPS: u8 = 20;

/// A single-line style format for Indicatif which should cover most situations.
///
/// ```text
/// 11111111111111111111111111111111111111111111111111111111111111111111111111111111
/// filename [==========================            ] 2m30s @ 123.4MB/s [70%/1.24GB]
/// fairly-long-filename [====================      ] 2m30s @ 123.4MB/s [70%/1.24GB]
/// 11111111111111111111111111111111111111111111111111111111111111111111111111111111
/// ```
const PROGRESS_STYLE_COMPACT: &str =
    "{msg:.dim} {wide_bar:.cyan} {eta} @ {decimal_bytes_per_sec} [{decimal_total_bytes:.dim}]";

/// Space to allow for the data readout and a useful bar
const DATA_AND_PROGRESS: usize = 55;

/// A double-line style format for Indicatif for use when the filename is too long.
///
/// ```text
/// 11111111111111111111111111111111111111111111111111111111111111111111111111111111
/// extremely-long-filename-no-really-very-long                         [70%/1.24GB]
/// [==========================                                  ] 2m30s @ 123.4MB/s
/// 11111111111111111111111111111111111111111111111111111111111111111111111111111111
/// ```
const PROGRESS_STYLE_OVERLONG: &str = "{wide_msg:.dim} [{decimal_total_bytes:.dim}]\n{wide_bar:.cyan} {eta} @ {decimal_bytes_per_sec}";

/// Determine and retrieve the appropriate progress style to use
pub(crate) fn style_for(msg_size: usize) -> &'static str {
    let term_width = console::Term::stderr().size().1 as usize; // this returns a reasonable default if it can't detect
    if msg_size + DATA_AND_PROGRESS > term_width {
        PROGRESS_STYLE_OVERLONG
    } else {
        PROGRESS_STYLE_COMPACT
    }
}

/// Shows one progress bar per file in flight, keyed by destination
#[derive(Debug)]
pub(crate) struct BarProgress {
    display: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub(crate) fn new(display: MultiProgress) -> Self {
        Self {
            display,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.bars().len()
    }
}

/// The last component of a display name
fn short_name(name: &str) -> &str {
    name.rsplit(['/', std::path::MAIN_SEPARATOR])
        .find(|s| !s.is_empty())
        .unwrap_or(name)
}

impl ProgressSink for BarProgress {
    fn start(&self, src: &str, dst: &str, size: u64) {
        let msg = short_name(src).to_string();
        let style = ProgressStyle::with_template(style_for(msg.len()))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = self
            .display
            .add(ProgressBar::new(size).with_style(style).with_message(msg));
        let _ = self.bars().insert(dst.to_string(), bar);
    }

    fn step(&self, _src: &str, dst: &str, current: u64, _size: u64) {
        if let Some(bar) = self.bars().get(dst) {
            bar.set_position(current);
        }
    }

    fn complete(&self, src: &str, dst: &str, size: u64) {
        if let Some(bar) = self.bars().remove(dst) {
            bar.finish_and_clear();
            self.display.remove(&bar);
        }
        info!("{src} -> {dst} ({size} bytes)");
    }

    fn enter(&self, src: &str, dst: &str) {
        debug!("directory {src} -> {dst}");
    }

    fn fail(&self, src: &str, _dst: &str, message: &str) {
        warn!("{src}: {message}");
    }
}
