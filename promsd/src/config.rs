//! This module controls configuration parsing from the end user. A
//! [`SourceConfig`] describes one scrape target and is all the library needs;
//! [`Config`] wraps a list of them with the settings the runner binary reads.
use std::{
    fmt, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::transform::Transforms;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Two sources scrape for the same component
    #[error("Duplicate source component found: {0}")]
    DuplicateComponent(String),
    /// A source with an empty component name
    #[error("Source component name must not be empty")]
    EmptyComponent,
}

fn default_sample_period() -> u64 {
    60_000
}

fn default_path() -> String {
    String::from("/metrics")
}

fn default_timeout() -> u64 {
    1_000
}

#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// URI scheme of a scrape endpoint
pub enum Scheme {
    /// Plain HTTP
    #[default]
    Http,
    /// HTTP over TLS
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// One scrape target and how its metrics are exported
pub struct SourceConfig {
    /// URI scheme, http unless set
    #[serde(default)]
    pub scheme: Scheme,
    /// Host to scrape
    pub host: String,
    /// Port to scrape
    pub port: u16,
    /// Path of the exposition endpoint
    #[serde(default = "default_path")]
    pub path: String,
    /// Name of the scraped component, used to label the availability gauge
    pub component: String,
    /// Export namespace prefix, selects descriptor reconciliation mode
    pub metrics_prefix: String,
    /// Metric names eligible for descriptor reconciliation. Empty allows all.
    #[serde(default)]
    pub whitelisted: FxHashSet<String>,
    /// Bound on one scrape, connect through body
    #[serde(default = "default_timeout")]
    pub timeout_milliseconds: u64,
}

impl SourceConfig {
    /// A plain HTTP source on `/metrics` with the default timeout and no
    /// whitelist.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        component: impl Into<String>,
        metrics_prefix: impl Into<String>,
    ) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
            path: default_path(),
            component: component.into(),
            metrics_prefix: metrics_prefix.into(),
            whitelisted: FxHashSet::default(),
            timeout_milliseconds: default_timeout(),
        }
    }

    /// The endpoint to scrape, `scheme://host:port/path`.
    #[must_use]
    pub fn uri(&self) -> String {
        let Self {
            scheme,
            host,
            port,
            path,
            ..
        } = self;
        if path.starts_with('/') {
            format!("{scheme}://{host}:{port}{path}")
        } else {
            format!("{scheme}://{host}:{port}/{path}")
        }
    }

    /// The request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Where the runner exposes its own telemetry for scraping
pub struct Telemetry {
    /// Address and port for prometheus exporter
    pub addr: SocketAddr,
    /// Additional labels to include in every metric
    #[serde(default)]
    pub global_labels: FxHashMap<String, String>,
}

/// Main configuration struct for the runner
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The period on which every source is scraped
    #[serde(default = "default_sample_period")]
    pub sample_period_milliseconds: u64,
    /// Optional transforms applied to every scrape
    #[serde(default)]
    pub transforms: Transforms,
    /// PEM files trusted in addition to the system roots
    #[serde(default)]
    pub ca_certs: Vec<PathBuf>,
    /// Prometheus listener for the runner's own telemetry, off if unset
    pub telemetry: Option<Telemetry>,
    /// The scrape targets
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Parse and check a YAML configuration.
    ///
    /// # Errors
    ///
    /// Function will error if the YAML does not describe a [`Config`] or two
    /// sources share a component name.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or does not parse, see
    /// [`Config::from_yaml`].
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }

    /// The period on which every source is scraped.
    #[must_use]
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_milliseconds)
    }

    fn check(&self) -> Result<(), Error> {
        let mut seen = FxHashSet::default();
        for source in &self.sources {
            if source.component.is_empty() {
                return Err(Error::EmptyComponent);
            }
            if !seen.insert(source.component.as_str()) {
                return Err(Error::DuplicateComponent(source.component.clone()));
            }
        }
        Ok(())
    }
}
