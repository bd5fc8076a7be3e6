//! Log output setup
// (c) 2025 Ross Younger

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use indicatif::MultiProgress;
use serde::{de, Deserialize, Serialize};
use strum::VariantNames as _;
use tracing_subscriber::{
    fmt::{
        time::{ChronoLocal, ChronoUtc},
        MakeWriter,
    },
    prelude::*,
    EnvFilter,
};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const FORMAT_LOCAL: &str = "%Y-%m-%d %H:%M:%SL";
const FORMAT_UTC: &str = "%Y-%m-%d %H:%M:%SZ";

/// Environment variable that overrides our log filter
const FILTER_ENV_VAR: &str = "RUST_LOG";

/// Filter level implied by the verbosity flags. `debug` wins over `quiet`.
#[must_use]
pub fn trace_level(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Selects the format of time stamps in log messages
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "kebab-case")]
pub enum TimeFormat {
    /// Local time, as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC, as "year-month-day HH:MM:SS"
    Utc,
    /// Local time in [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339) format
    Rfc3339,
}

impl<'de> Deserialize<'de> for TimeFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s.to_ascii_lowercase())
            .map_err(|_| de::Error::unknown_variant(&s, TimeFormat::VARIANTS))
    }
}

/// Where console log output goes
#[derive(Debug)]
pub enum ConsoleTraceType {
    /// Straight to stderr
    Standard,
    /// Through a [`MultiProgress`], so log lines do not tear through progress bars
    Indicatif(MultiProgress),
    /// Nowhere
    None,
}

/// Everything [`setup`] needs to know
#[derive(Debug)]
pub struct TracingOptions {
    /// Filter level for our own events, e.g. `info`
    pub level: &'static str,
    /// Console destination
    pub console: ConsoleTraceType,
    /// Optional file to log to (without colour codes)
    pub log_file: Option<PathBuf>,
    /// Time stamp style
    pub time_format: TimeFormat,
}

/// Uses `RUST_LOG` if set, otherwise logs only our own events at the given level.
///
/// Returns the filter, and whether it came from the environment (in which case
/// event targets are worth showing, as they may come from anywhere).
fn make_filter(level: &str) -> anyhow::Result<(EnvFilter, bool)> {
    match EnvFilter::try_from_env(FILTER_ENV_VAR) {
        Ok(filter) => Ok((filter, true)),
        Err(e) => {
            if std::env::var(FILTER_ENV_VAR).is_ok() {
                anyhow::bail!("{FILTER_ENV_VAR} (set in environment) was not understood: {e}");
            }
            Ok((EnvFilter::try_new(format!("stcp={level}"))?, false))
        }
    }
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>;

fn make_layer<W>(
    writer: W,
    filter: EnvFilter,
    time_format: TimeFormat,
    show_target: bool,
    ansi: bool,
) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + 'static + Sync + Send,
{
    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(show_target)
        .with_ansi(ansi);
    // the timer changes the layer type, so each arm finishes the job
    match time_format {
        TimeFormat::Local => layer
            .with_timer(ChronoLocal::new(FORMAT_LOCAL.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Utc => layer
            .with_timer(ChronoUtc::new(FORMAT_UTC.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Rfc3339 => layer
            .with_timer(ChronoLocal::rfc_3339())
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

fn make_layers(options: TracingOptions) -> anyhow::Result<Vec<BoxedLayer>> {
    let mut layers = Vec::new();
    let ansi = console::colors_enabled_stderr();

    let (filter, from_env) = make_filter(options.level)?;
    match options.console {
        ConsoleTraceType::None => (),
        ConsoleTraceType::Standard => layers.push(make_layer(
            std::io::stderr,
            filter,
            options.time_format,
            from_env,
            ansi,
        )),
        ConsoleTraceType::Indicatif(mp) => layers.push(make_layer(
            ProgressWriter::wrap(mp),
            filter,
            options.time_format,
            from_env,
            ansi,
        )),
    }

    if let Some(path) = options.log_file {
        let file = File::create(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let (filter, from_env) = make_filter(options.level)?;
        layers.push(make_layer(
            Arc::new(file),
            filter,
            options.time_format,
            from_env,
            false,
        ));
    }
    Ok(layers)
}

/// Sets up log output to the console and optionally to a file.
///
/// Only the first call in a process has any effect; later calls log a warning and succeed.
///
/// **CAUTION:** If this fails, nothing is logged; callers must report the error themselves.
pub fn setup(options: TracingOptions) -> anyhow::Result<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::Relaxed) {
        tracing::warn!("tracing setup called a second time (ignoring)");
        return Ok(());
    }
    let layers = make_layers(options)?;
    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

/// Has [`setup`] been called?
#[must_use]
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::Relaxed)
}

/// Routes log lines through a [`MultiProgress`] so they appear above the bars
struct ProgressWriter(MultiProgress);

impl ProgressWriter {
    fn wrap(display: MultiProgress) -> Mutex<Self> {
        Mutex::new(Self(display))
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = std::str::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let msg = msg.trim_end_matches('\n');
        if self.0.is_hidden() {
            eprintln!("{msg}");
        } else {
            self.0.println(msg)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use indicatif::{MultiProgress, ProgressDrawTarget};
    use pretty_assertions::assert_eq;
    use rusty_fork::rusty_fork_test;

    use super::{make_layers, setup, trace_level, ConsoleTraceType, TimeFormat, TracingOptions};

    fn options(console: ConsoleTraceType) -> TracingOptions {
        TracingOptions {
            level: "info",
            console,
            log_file: None,
            time_format: TimeFormat::Utc,
        }
    }

    #[test]
    fn levels() {
        assert_eq!(trace_level(true, true), "debug");
        assert_eq!(trace_level(false, true), "error");
        assert_eq!(trace_level(false, false), "info");
    }

    #[test]
    fn time_format_is_case_insensitive() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            tf: TimeFormat,
        }
        use figment::providers::Format as _;
        let w: Wrapper = figment::Figment::new()
            .merge(figment::providers::Toml::string("tf = \"RFC3339\""))
            .extract()
            .unwrap();
        assert_eq!(w.tf, TimeFormat::Rfc3339);
    }

    #[test]
    fn console_only() {
        let layers =
            make_layers(options(ConsoleTraceType::Indicatif(MultiProgress::new()))).unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn console_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(ConsoleTraceType::Standard);
        opts.log_file = Some(dir.path().join("test.log"));
        let layers = make_layers(opts).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(dir.path().join("test.log").exists());
    }

    #[test]
    fn invalid_level() {
        let mut opts = options(ConsoleTraceType::None);
        opts.level = "not a level!";
        assert!(make_layers(opts).is_err());
    }

    #[test]
    fn progress_writer_hidden() {
        use std::io::Write as _;
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let mux = super::ProgressWriter::wrap(mp);
        let mut writer = mux.lock().unwrap();
        let msg = "Test message\n";
        assert_eq!(writer.write(msg.as_bytes()).unwrap(), msg.len());
        writer.flush().unwrap();
    }

    // these affect global state, so run in forks
    rusty_fork_test! {
        #[test]
        fn second_setup_is_ignored() {
            assert!(!super::is_initialized());
            setup(options(ConsoleTraceType::None)).unwrap();
            assert!(super::is_initialized());
            setup(options(ConsoleTraceType::None)).unwrap();
        }
    }
}
