// (c) 2025 Ross Younger
//! Command-line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigurationOverrides;

/// Bulk file transfer client (and reference server) for a remote storage service.
///
/// Remote paths are relative to the session root (`--root`) on the server.
#[derive(Debug, Parser, Clone)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = super::styles::CLAP_STYLES,
    infer_subcommands = true,
)]
pub(crate) struct CliArgs {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,

    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Options which apply to every subcommand
#[derive(Debug, Args, Clone, Default)]
pub(crate) struct GlobalArgs {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=stcp=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, global = true, help_heading("Debug"))]
    pub(crate) debug: bool,

    /// Quiet mode: no progress bars, errors only
    #[arg(short, long, global = true, conflicts_with("debug"))]
    pub(crate) quiet: bool,

    /// Log to a file as well as the console (without colour codes)
    #[arg(short('l'), long, global = true, value_name("FILE"), help_heading("Debug"))]
    pub(crate) log_file: Option<PathBuf>,

    /// Read configuration from this file, in addition to the standard files
    #[arg(long, global = true, value_name("FILE"), help_heading("Configuration"))]
    pub(crate) config_file: Option<PathBuf>,

    /// Remote directory to open the session at. Remote paths are relative to this.
    #[arg(long, global = true, default_value = "", hide_default_value = true)]
    pub(crate) root: String,

    #[command(flatten)]
    pub(crate) overrides: ConfigurationOverrides,
}

/// Options shared by the copy commands
#[derive(Debug, Args, Clone, Default)]
pub(crate) struct CopyArgs {
    /// Copy directories recursively
    #[arg(short, long)]
    pub(crate) recursive: bool,

    /// Copy every source into this directory, which must exist.
    /// All the positional paths are then sources.
    #[arg(short('t'), long, value_name("DIRECTORY"))]
    pub(crate) target_directory: Option<String>,

    /// Treat the destination as a plain path, even if it is an existing directory.
    /// Only one source is allowed.
    #[arg(short('T'), long, conflicts_with("target_directory"))]
    pub(crate) no_target_directory: bool,

    /// Expand wildcards in remote sources (the default)
    #[arg(long, overrides_with("no_glob"))]
    pub(crate) glob: bool,

    /// Take remote sources literally
    #[arg(long, overrides_with("glob"))]
    pub(crate) no_glob: bool,
}

impl CopyArgs {
    /// Should wildcards in remote sources be expanded?
    pub(crate) fn expand_wildcards(&self) -> bool {
        self.glob || !self.no_glob
    }

    /// Splits the positional paths into sources and a destination
    pub(crate) fn operands(
        &self,
        mut paths: Vec<String>,
    ) -> anyhow::Result<(Vec<String>, String)> {
        if let Some(directory) = &self.target_directory {
            return Ok((paths, directory.clone()));
        }
        let Some(destination) = paths.pop() else {
            anyhow::bail!("missing source and destination");
        };
        if paths.is_empty() {
            anyhow::bail!("missing destination after {destination:?}");
        }
        Ok((paths, destination))
    }

    /// Checks the (expanded) sources against the destination options.
    ///
    /// # Return
    /// Whether the destination must be an existing directory
    pub(crate) fn check_sources(&self, sources: &[String]) -> anyhow::Result<bool> {
        if sources.is_empty() {
            anyhow::bail!("nothing to copy");
        }
        if self.no_target_directory && sources.len() > 1 {
            anyhow::bail!(
                "extra source {:?}: --no-target-directory takes a single source",
                sources[1]
            );
        }
        Ok(self.target_directory.is_some() || sources.len() > 1)
    }
}

#[derive(Debug, Subcommand, Clone)]
pub(crate) enum Command {
    /// Run the reference storage server, serving a local directory
    Serve {
        /// Directory to serve
        directory: PathBuf,
    },
    /// Copy local files or directories to the server
    ///
    /// With more than one source, the destination must be an existing remote directory.
    Upload {
        #[command(flatten)]
        copy: CopyArgs,
        /// Local sources, then the remote destination (unless `-t` is given)
        #[arg(required = true, num_args = 1.., value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Copy remote files or directories to the local machine
    ///
    /// Remote sources may contain wildcards, which are expanded against the server.
    /// With more than one source, the destination must be an existing local directory.
    Download {
        #[command(flatten)]
        copy: CopyArgs,
        /// Remote sources, then the local destination (unless `-t` is given)
        #[arg(required = true, num_args = 1.., value_name = "PATH")]
        paths: Vec<String>,
    },
    /// List a remote directory
    Ls {
        /// Remote directory [default: the session root]
        #[arg(default_value = "")]
        path: String,
        /// Show type and size
        #[arg(short('L'), long)]
        long: bool,
    },
    /// Show the status of a remote path
    Stat {
        /// Remote path
        path: String,
    },
    /// Expand a wildcard pattern against the remote tree
    ///
    /// Supports `*`, `?`, `[...]` within a path segment and `**` as a whole segment.
    Glob {
        /// Pattern to expand
        pattern: String,
    },
    /// Create a remote directory
    Mkdir {
        /// Remote path
        path: String,
        /// Create missing parents; an existing directory is not an error
        #[arg(short, long)]
        parents: bool,
    },
    /// Show the active configuration and where each value came from
    ShowConfig,
}

impl Command {
    /// Does this command show transfer progress?
    pub(crate) fn shows_progress(&self) -> bool {
        matches!(self, Command::Upload { .. } | Command::Download { .. })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use clap::Parser as _;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{CliArgs, Command, CopyArgs};
    use crate::session::DirectoryOrder;

    #[test]
    fn upload_args() {
        let args = CliArgs::try_parse_from([
            "stcp",
            "upload",
            "-r",
            "--block-size",
            "4096",
            "--directory-order",
            "directories-first",
            "local",
            "remote/dir",
        ])
        .unwrap();
        let Command::Upload { copy, paths } = args.command else {
            panic!("wrong command");
        };
        assert!(copy.recursive);
        assert!(!copy.no_target_directory);
        assert!(copy.expand_wildcards());
        let (sources, destination) = copy.operands(paths.clone()).unwrap();
        assert_eq!(sources, ["local"]);
        assert_eq!(destination, "remote/dir");
        assert_eq!(args.global.overrides.block_size, Some(4096));
        assert_eq!(
            args.global.overrides.directory_order,
            Some(DirectoryOrder::DirectoriesFirst)
        );
        assert_eq!(args.global.overrides.remote, None);
        assert!(Command::Upload { copy, paths }.shows_progress());
    }

    fn copy_args(args: &[&str]) -> (CopyArgs, Vec<String>) {
        let args = CliArgs::try_parse_from(["stcp", "download"].iter().chain(args)).unwrap();
        match args.command {
            Command::Download { copy, paths } => (copy, paths),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn several_sources() {
        let (copy, paths) = copy_args(&["a", "b/*.txt", "out"]);
        let (sources, destination) = copy.operands(paths).unwrap();
        assert_eq!(sources, ["a", "b/*.txt"]);
        assert_eq!(destination, "out");
        assert!(copy.check_sources(&sources).unwrap());
        assert!(!copy.check_sources(&sources[..1]).unwrap());
        assert!(copy.check_sources(&[]).is_err());
    }

    #[test]
    fn target_directory_takes_every_path() {
        let (copy, paths) = copy_args(&["-t", "out", "a"]);
        let (sources, destination) = copy.operands(paths).unwrap();
        assert_eq!(sources, ["a"]);
        assert_eq!(destination, "out");
        // even a single source must go into the directory
        assert!(copy.check_sources(&sources).unwrap());
    }

    #[test]
    fn missing_destination() {
        let (copy, paths) = copy_args(&["a"]);
        assert!(copy.operands(paths).is_err());
    }

    #[test]
    fn no_target_directory_takes_one_source() {
        let (copy, paths) = copy_args(&["-T", "a", "out"]);
        let (sources, _) = copy.operands(paths).unwrap();
        assert!(!copy.check_sources(&sources).unwrap());
        let two = ["a".to_string(), "b".to_string()];
        assert!(copy.check_sources(&two).is_err());
        assert!(CliArgs::try_parse_from(["stcp", "download", "-T", "-t", "d", "a"]).is_err());
    }

    #[rstest]
    #[case(&[], true)]
    #[case(&["--no-glob"], false)]
    #[case(&["--no-glob", "--glob"], true)]
    #[case(&["--glob", "--no-glob"], false)]
    fn wildcard_expansion_switch(#[case] flags: &[&str], #[case] expected: bool) {
        let mut args = flags.to_vec();
        args.extend(["a", "b"]);
        let (copy, _) = copy_args(&args);
        assert_eq!(copy.expand_wildcards(), expected);
    }

    #[test]
    fn global_options_anywhere() {
        let args =
            CliArgs::try_parse_from(["stcp", "ls", "-d", "--root", "home/me", "data"]).unwrap();
        assert!(args.global.debug);
        assert_eq!(args.global.root, "home/me");
        assert!(matches!(args.command, Command::Ls { ref path, long: false } if path == "data"));
        assert!(!args.command.shows_progress());
    }

    #[test]
    fn quiet_conflicts_with_debug() {
        assert!(CliArgs::try_parse_from(["stcp", "-d", "-q", "show-config"]).is_err());
    }

    #[test]
    fn ls_defaults_to_root() {
        let args = CliArgs::try_parse_from(["stcp", "ls"]).unwrap();
        assert!(matches!(args.command, Command::Ls { ref path, .. } if path.is_empty()));
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory as _;
        CliArgs::command().debug_assert();
    }
}
