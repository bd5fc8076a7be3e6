//! Main CLI for stcp
// (c) 2025 Ross Younger

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as _;
use figment::providers::Serialized;
use futures_util::StreamExt as _;
use human_repr::HumanCount as _;
use indicatif::{MultiProgress, ProgressDrawTarget};
use tracing::{debug, error_span};

use super::args::{CliArgs, Command, CopyArgs, GlobalArgs};
use super::progress::{BarProgress, MAX_UPDATE_FPS};
use super::styles::{use_colours, ERROR, RESET};
use crate::client::{connect, TcpSession};
use crate::config::{Configuration, Manager};
use crate::copy;
use crate::error::Error;
use crate::protocol::greeting::SessionMode;
use crate::protocol::FileStatus;
use crate::server;
use crate::util::{setup_tracing, trace_level, ConsoleTraceType, TracingOptions};

/// Exit status for a protocol violation by the peer
pub const EXIT_PROTOCOL: u8 = 3;
/// Exit status for an operation refused by the server
pub const EXIT_REMOTE: u8 = 4;
/// Exit status for a local filesystem problem
pub const EXIT_LOCAL: u8 = 5;
/// Exit status for a failed connection
pub const EXIT_TRANSPORT: u8 = 6;

fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<Error>() {
        Some(Error::Protocol(_)) => EXIT_PROTOCOL,
        Some(Error::Remote(_) | Error::NotADirectory(_) | Error::IsADirectory(_)) => EXIT_REMOTE,
        Some(Error::LocalIo { .. }) => EXIT_LOCAL,
        Some(Error::Transport(_)) => EXIT_TRANSPORT,
        _ => 1,
    }
}

/// Maps a failure to the process exit status
#[must_use]
pub fn exit_code(error: &anyhow::Error) -> ExitCode {
    ExitCode::from(exit_status(error))
}

fn manager_for(global: &GlobalArgs) -> anyhow::Result<Manager> {
    let mut manager = Manager::standard(global.config_file.as_deref())?;
    manager.merge_provider(Serialized::defaults(&global.overrides));
    Ok(manager)
}

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
/// Failures are reported to the console; the exit status reflects what went wrong
/// (see [`EXIT_PROTOCOL`] and friends).
///
/// # Note
/// - This function starts a tokio runtime and performs work in it.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match cli_inner(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else if use_colours() {
                eprintln!("{ERROR}Error:{RESET} {e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
            exit_code(&e)
        }
    }
}

fn cli_inner<I, T>(args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args(args)? else {
        return Ok(()); // help/version shown; exit
    };
    run(args)
}

fn parse_args<I, T>(args: I) -> anyhow::Result<Option<CliArgs>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match CliArgs::try_parse_from(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let message = e.render();
            if use_colours() {
                print!("{}", message.ansi());
            } else {
                print!("{message}");
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run(args: CliArgs) -> anyhow::Result<()> {
    let display = if args.command.shows_progress() && !args.global.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(MAX_UPDATE_FPS))
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };

    let manager = manager_for(&args.global)?;
    let config = manager.configuration()?;

    setup_tracing(TracingOptions {
        level: trace_level(args.global.debug, args.global.quiet),
        console: ConsoleTraceType::Indicatif(display.clone()),
        log_file: args.global.log_file.clone(),
        time_format: config.time_format,
    })?; // to provoke error: set RUST_LOG=.

    let root = args.global.root.as_str();
    match args.command {
        Command::ShowConfig => {
            println!("{}", manager.to_display_adapter());
            println!("Configuration files read, if present:");
            for f in Manager::config_files() {
                println!("  {}", f.display());
            }
        }
        Command::Serve { directory } => {
            let _span = error_span!("SERVER").entered();
            server::listen(&config.listen, directory).await?;
        }
        Command::Upload { copy: opts, paths } => {
            let (sources, destination) = opts.operands(paths)?;
            let into_directory = opts.check_sources(&sources)?;
            let sources: Vec<PathBuf> = sources.into_iter().map(PathBuf::from).collect();
            for source in &sources {
                copy::check_local_source(source, opts.recursive).await?;
            }
            let mut session = open(&config, root, SessionMode::Write, &display).await?;
            let result = upload(&mut session, &opts, &sources, &destination, into_directory).await;
            session.close().await;
            result?;
        }
        Command::Download { copy: opts, paths } => {
            let (sources, destination) = opts.operands(paths)?;
            let mut session = open(&config, root, SessionMode::Read, &display).await?;
            let result = download(&mut session, &opts, &sources, Path::new(&destination)).await;
            session.close().await;
            result?;
        }
        Command::Ls { path, long } => {
            let mut session = open(&config, root, SessionMode::Read, &display).await?;
            let entries = session.list(&path).await;
            session.close().await;
            for entry in entries? {
                if long {
                    println!("{}", long_listing(&entry));
                } else {
                    println!("{}", entry.path);
                }
            }
        }
        Command::Stat { path } => {
            let mut session = open(&config, root, SessionMode::Read, &display).await?;
            let status = session.stat(&path).await;
            session.close().await;
            let status = status?;
            println!("{}", long_listing(&status));
            println!("modified: {}", status.modification_time);
            println!("permission: {}", status.permission);
        }
        Command::Glob { pattern } => {
            let mut session = open(&config, root, SessionMode::Read, &display).await?;
            let result = print_matches(&mut session, &pattern).await;
            session.close().await;
            result?;
        }
        Command::Mkdir { path, parents } => {
            let mut session = open(&config, root, SessionMode::Write, &display).await?;
            let result = session.mkdirs(&path, parents, parents).await;
            session.close().await;
            result?;
        }
    }
    Ok(())
}

async fn open(
    config: &Configuration,
    root: &str,
    mode: SessionMode,
    display: &MultiProgress,
) -> anyhow::Result<TcpSession> {
    let session = connect(&config.remote, root, mode).await?;
    debug!("connected to {}", config.remote);
    Ok(session
        .with_options(config.transfer_options())
        .with_progress(Arc::new(BarProgress::new(display.clone()))))
}

async fn upload(
    session: &mut TcpSession,
    args: &CopyArgs,
    sources: &[PathBuf],
    destination: &str,
    into_directory: bool,
) -> anyhow::Result<()> {
    if into_directory {
        copy::require_remote_directory(session, destination).await?;
    }
    for source in sources {
        let dst =
            copy::remote_target(session, source, destination, !args.no_target_directory).await?;
        copy::upload(session, source, &dst, args.recursive).await?;
    }
    Ok(())
}

async fn download(
    session: &mut TcpSession,
    args: &CopyArgs,
    sources: &[String],
    destination: &Path,
) -> anyhow::Result<()> {
    let sources = if args.expand_wildcards() {
        copy::expand_remote_sources(session, sources).await?
    } else {
        sources.to_vec()
    };
    if args.check_sources(&sources)? {
        copy::require_local_directory(destination).await?;
    }
    for source in &sources {
        let dst = copy::local_target(source, destination, !args.no_target_directory).await;
        copy::download(session, source, &dst, args.recursive).await?;
    }
    Ok(())
}

async fn print_matches(session: &mut TcpSession, pattern: &str) -> Result<(), Error> {
    let mut matches = Box::pin(session.glob(pattern)?.into_stream());
    while let Some(path) = matches.next().await {
        println!("{}", path?);
    }
    Ok(())
}

fn long_listing(status: &FileStatus) -> String {
    format!(
        "{:<9} {:>10} {}",
        status.kind,
        status.size.human_count_bytes().to_string(),
        status.path
    )
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;

    use super::{exit_status, long_listing, EXIT_LOCAL, EXIT_PROTOCOL, EXIT_REMOTE, EXIT_TRANSPORT};
    use crate::error::{Error, ProtocolError, RemoteError};
    use crate::protocol::FileKind;
    use crate::session::test_helpers::status;

    #[test]
    fn exit_codes() {
        let cases: Vec<(anyhow::Error, u8)> = vec![
            (Error::from(ProtocolError::ConnectionClosed).into(), EXIT_PROTOCOL),
            (
                Error::from(RemoteError {
                    errno: None,
                    message: "no".into(),
                })
                .into(),
                EXIT_REMOTE,
            ),
            (Error::NotADirectory("x".into()).into(), EXIT_REMOTE),
            (
                Error::local("x", std::io::ErrorKind::NotFound.into()).into(),
                EXIT_LOCAL,
            ),
            (
                Error::Transport(std::io::ErrorKind::BrokenPipe.into()).into(),
                EXIT_TRANSPORT,
            ),
            (anyhow::anyhow!("something else"), 1),
        ];
        for (err, code) in cases {
            assert_eq!(exit_status(&err), code, "{err}");
        }
        // context does not hide the underlying error
        let err = anyhow::Error::from(Error::local("y", std::io::ErrorKind::NotFound.into()))
            .context("while copying");
        assert_eq!(exit_status(&err), EXIT_LOCAL);
    }

    #[test]
    fn listing_format() {
        let line = long_listing(&status("data.bin", FileKind::File, 2048));
        assert!(line.starts_with("FILE"), "{line}");
        assert!(line.ends_with("data.bin"), "{line}");
    }
}
