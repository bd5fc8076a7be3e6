//! Configuration file wrangling
// (c) 2025 Ross Younger

use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::providers::{Env, Format as _, Serialized, Toml};
use figment::{Figment, Metadata, Provider};
use serde::Deserialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{debug, warn};

use super::{Configuration, BASE_CONFIG_FILENAME, ENV_PREFIX, SYSTEM_CONFIG_PATH};

/// A [`Provider`] holding the hard-wired defaults
struct SystemDefault {}

impl SystemDefault {
    const META_NAME: &str = "default";
}

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        Metadata::named(Self::META_NAME)
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(Configuration::system_default()).data()
    }
}

/// Processes and merges all possible configuration sources.
///
/// In increasing order of priority: hard-wired defaults, the system configuration file,
/// the user configuration file, any file named on the command line, `STCP_*` environment
/// variables, and finally command-line options (merged by the caller with
/// [`merge_provider`](Self::merge_provider)).
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    data: Figment,
}

impl Manager {
    fn new(apply_files: bool, extra_file: Option<&Path>, apply_env: bool) -> Result<Self> {
        let mut new1 = Self {
            data: Figment::new().join(SystemDefault {}),
        };
        if apply_files {
            new1.add_config("system", Some(Path::new(SYSTEM_CONFIG_PATH)));
            new1.add_config("user", Self::user_config_path().as_deref());
        }
        if let Some(file) = extra_file {
            anyhow::ensure!(
                file.exists(),
                "configuration file {} not found",
                file.display()
            );
            new1.merge_provider(Toml::file(file));
        }
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX));
        }
        Ok(new1)
    }

    /// General constructor for production use.
    ///
    /// Reads the standard configuration files and the environment, plus `extra_file` if given.
    pub fn standard(extra_file: Option<&Path>) -> Result<Self> {
        Self::new(true, extra_file, true)
    }

    /// Testing constructor: defaults only
    #[cfg(test)]
    #[must_use]
    pub(crate) fn without_files() -> Self {
        Self {
            data: Figment::new().join(SystemDefault {}),
        }
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| {
            d.join(BASE_CONFIG_FILENAME)
                .join(format!("{BASE_CONFIG_FILENAME}.toml"))
        })
    }

    /// The standard configuration files, in the order they are read.
    /// They need not exist.
    #[must_use]
    pub fn config_files() -> Vec<PathBuf> {
        let mut result = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        result.extend(Self::user_config_path());
        result
    }

    fn add_config(&mut self, what: &str, path: Option<&Path>) {
        let Some(path) = path else {
            warn!("could not determine {what} configuration file path");
            return;
        };
        if !path.exists() {
            debug!("{what} configuration file {path:?} not present");
            return;
        }
        debug!("reading {what} configuration file {path:?}");
        self.merge_provider(Toml::file(path));
    }

    /// Merges in a data set, which is some sort of [`Provider`].
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider);
    }

    /// Attempts to extract a particular struct from the data
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract::<T>()
    }

    /// Extracts and validates the complete [`Configuration`]
    pub fn configuration(&self) -> Result<Configuration> {
        let config = self.get::<Configuration>()?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a displayable table of the current configuration and where each value came from
    #[must_use]
    pub fn to_display_adapter(&self) -> DisplayAdapter<'_> {
        DisplayAdapter { source: self }
    }
}

/// Data type used when rendering the config table
#[derive(Tabled)]
struct PrettyConfig {
    field: String,
    value: String,
    source: String,
}

/// Pretty-printing wrapper for a [`Manager`]
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    source: &'a Manager,
}

impl Display for DisplayAdapter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = &self.source.data;
        let config = match self.source.get::<Configuration>() {
            Ok(c) => c,
            Err(e) => return write!(f, "invalid configuration: {e}"),
        };
        let output = Configuration::FIELD_NAMES
            .iter()
            .map(|field| {
                let source = data
                    .find_metadata(field)
                    .map(|m| {
                        m.source
                            .as_ref()
                            .map_or_else(|| m.name.to_string(), figment::Source::to_string)
                    })
                    .unwrap_or_default();
                PrettyConfig {
                    field: (*field).to_string(),
                    value: config.render(field).unwrap_or_default(),
                    source,
                }
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(output);
        let _ = table.with(Style::sharp());
        write!(f, "{table}")
    }
}
