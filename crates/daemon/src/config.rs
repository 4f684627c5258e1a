//! Configuration management for nfsnotifyd.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. Command-line arguments

use crate::source::Backend;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nfsnotify_protocol::MarkerStyle;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and logging
    #[serde(default)]
    pub server: ServerConfig,

    /// Watch backend settings shared by all roots
    #[serde(default)]
    pub watch: WatchConfig,

    /// Watched roots, fixed at startup
    #[serde(default, rename = "root")]
    pub roots: Vec<RootConfig>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Maximum number of concurrent clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Seconds a new connection gets to send its request line
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Watch backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Polling interval in seconds (poll backend only)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Marker file naming shared with the touch clients
    #[serde(default)]
    pub marker: MarkerStyle,
}

/// A watched root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Absolute path of the root on this host; also the name clients
    /// subscribe with
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("no watched roots configured")]
    NoRoots,

    #[error("root path is not valid UTF-8: {0:?}")]
    NonUtf8Root(PathBuf),

    #[error("root configured twice: {0}")]
    DuplicateRoot(String),

    #[error("poll interval must be at least one second")]
    ZeroPollInterval,

    #[error("request timeout must be at least one second")]
    ZeroRequestTimeout,
}

fn default_listen() -> String {
    nfsnotify_protocol::get_listen_addr()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_clients() -> usize {
    100
}

fn default_request_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            log_file: None,
            max_clients: default_max_clients(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            poll_interval: default_poll_interval(),
            marker: MarkerStyle::default(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Add config file if provided
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("/etc/nfsnotify/config.toml"),
                dirs::config_dir()
                    .unwrap_or_default()
                    .join("nfsnotify/config.toml"),
            ];

            for path in &default_paths {
                if path.exists() {
                    figment = figment.merge(Toml::file(path));
                    break;
                }
            }
        }

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        // Environment variables (NFSNOTIFYD_ prefix, e.g. NFSNOTIFYD_SERVER__LISTEN)
        figment
            .merge(Env::prefixed("NFSNOTIFYD_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Figment(Box::new(e)))
    }

    /// Check the merged configuration before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        if self.watch.poll_interval == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.server.request_timeout == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }

        let mut seen = HashSet::new();
        for root in &self.roots {
            let name = root
                .path
                .to_str()
                .ok_or_else(|| ConfigError::NonUtf8Root(root.path.clone()))?;
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateRoot(name.to_string()));
            }
        }
        Ok(())
    }

    /// Root names as clients subscribe to them.
    pub fn root_names(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|root| root.path.to_string_lossy().into_owned())
            .collect()
    }

    /// Append roots given on the command line
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots
            .extend(roots.into_iter().map(|path| RootConfig { path }));
        self
    }

    /// Override listen address from CLI
    pub fn with_listen(mut self, listen: Option<String>) -> Self {
        if let Some(addr) = listen {
            self.server.listen = addr;
        }
        self
    }

    /// Override log level from CLI
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        if let Some(level) = log_level {
            self.server.log_level = level;
        }
        self
    }

    /// Override log file from CLI
    pub fn with_log_file(mut self, log_file: Option<PathBuf>) -> Self {
        if log_file.is_some() {
            self.server.log_file = log_file;
        }
        self
    }

    /// Override watch backend from CLI
    pub fn with_backend(mut self, backend: Option<Backend>) -> Self {
        if let Some(backend) = backend {
            self.watch.backend = backend;
        }
        self
    }

    /// Override marker convention from CLI
    pub fn with_marker(mut self, marker: Option<MarkerStyle>) -> Self {
        if let Some(marker) = marker {
            self.watch.marker = marker;
        }
        self
    }
}
