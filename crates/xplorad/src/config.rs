//! Configuration file parsing and structures.
//!
//! xplorad is configured with a single TOML file that is loaded once at
//! startup. Changing watches or the home location requires a restart or an
//! explicit reconfiguration of the coordinator.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use crate::coordinator::Backoff;
use crate::coordinator::CoordinatorSettings;
use crate::entity::object_id;
use crate::entity::EntityKind;
use crate::watch::Position;
use crate::watch::WatchId;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub home: HomeConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub account: AccountConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"xplorad::coordinator" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build a filter from the global level plus per-target overrides.
    ///
    /// Overrides that do not parse are rejected by [`Config::validate`]; any
    /// that slip through here are skipped.
    pub fn env_filter(&self) -> EnvFilter {
        self.overrides
            .iter()
            .filter_map(|(target, level)| override_directive(target, *level).ok())
            .fold(
                EnvFilter::default().add_directive(LevelFilter::from(self.level).into()),
                EnvFilter::add_directive,
            )
    }
}

fn override_directive(target: &str, level: LogLevel) -> Result<Directive, ParseError> {
    format!("{}={}", target, level.as_str()).parse()
}

fn default_radius_m() -> f64 {
    100.0
}

/// The reference point used to decide whether a watch is at home
#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    /// Latitude in decimal degrees
    pub latitude: f64,

    /// Longitude in decimal degrees
    pub longitude: f64,

    /// Distance in meters within which a watch counts as home (inclusive)
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for every remote call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive transient failures before an alert is raised
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_backoff_initial_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_secs")]
    pub initial_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub max_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial_secs(),
            max_secs: default_backoff_max_secs(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// Account credentials and the watches it owns
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Base URL of the watch gateway
    pub base_url: String,

    pub username: String,

    pub password: String,

    pub watches: Vec<WatchId>,

    /// Optional display names keyed by watch id
    #[serde(default)]
    pub names: HashMap<String, String>,

    /// Entity kinds to create for each watch (default: all)
    #[serde(default = "EntityKind::all")]
    pub entities: Vec<EntityKind>,
}

impl AccountConfig {
    /// Display name for a watch, falling back to its id.
    pub fn display_name(&self, watch: &WatchId) -> String {
        self.names
            .get(watch.as_str())
            .cloned()
            .unwrap_or_else(|| watch.to_string())
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8566
}

/// HTTP API exposing entity state to the platform
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let mut targets: Vec<_> = self.logging.overrides.iter().collect();
        targets.sort();
        for (target, level) in targets {
            if let Err(e) = override_directive(target, *level) {
                errors.push(format!(
                    "logging.overrides: '{}' is not a valid log target: {}",
                    target, e
                ));
            }
        }

        if !(-90.0..=90.0).contains(&self.home.latitude) {
            errors.push(format!(
                "home.latitude: {} is outside [-90, 90]",
                self.home.latitude
            ));
        }
        if !(-180.0..=180.0).contains(&self.home.longitude) {
            errors.push(format!(
                "home.longitude: {} is outside [-180, 180]",
                self.home.longitude
            ));
        }
        if !(self.home.radius_m > 0.0 && self.home.radius_m.is_finite()) {
            errors.push(format!(
                "home.radius_m: must be a positive number, got {}",
                self.home.radius_m
            ));
        }

        if self.poll.interval_secs == 0 {
            errors.push("poll.interval_secs: must be greater than 0".to_string());
        }
        if self.poll.request_timeout_secs == 0 {
            errors.push("poll.request_timeout_secs: must be greater than 0".to_string());
        }
        if self.poll.backoff.initial_secs == 0 {
            errors.push("poll.backoff.initial_secs: must be greater than 0".to_string());
        }
        if self.poll.backoff.max_secs < self.poll.backoff.initial_secs {
            errors.push("poll.backoff.max_secs: must be >= poll.backoff.initial_secs".to_string());
        }
        if !(self.poll.backoff.multiplier >= 1.0 && self.poll.backoff.multiplier.is_finite()) {
            errors.push(format!(
                "poll.backoff.multiplier: must be >= 1.0, got {}",
                self.poll.backoff.multiplier
            ));
        }

        if self.account.watches.is_empty() {
            errors.push("account.watches: at least one watch must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        // Entity ids are derived from the sanitized watch id, so distinct ids
        // like "w-1" and "w_1" would claim the same entities.
        let mut prefixes: HashMap<String, &WatchId> = HashMap::new();
        for watch in &self.account.watches {
            if watch.as_str().trim().is_empty() {
                errors.push("account.watches: watch ids must not be empty".to_string());
            } else if !seen.insert(watch) {
                errors.push(format!("account.watches: duplicate watch id '{}'", watch));
            } else if let Some(first) = prefixes.insert(object_id(watch), watch) {
                errors.push(format!(
                    "account.watches: '{}' and '{}' produce the same entity id prefix '{}'",
                    first,
                    watch,
                    object_id(watch)
                ));
            }
        }
        for name in self.account.names.keys() {
            if !self.account.watches.iter().any(|w| w.as_str() == name) {
                errors.push(format!(
                    "account.names: '{}' is not a configured watch",
                    name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            home: Position::new(self.home.latitude, self.home.longitude),
            home_radius_m: self.home.radius_m,
            poll_interval: Duration::from_secs(self.poll.interval_secs),
            request_timeout: Duration::from_secs(self.poll.request_timeout_secs),
            failure_threshold: self.poll.failure_threshold,
            backoff: Backoff {
                initial_delay: Duration::from_secs(self.poll.backoff.initial_secs),
                max_delay: Duration::from_secs(self.poll.backoff.max_secs),
                multiplier: self.poll.backoff.multiplier,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}
