//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Path segment for GET requests
pub const GET_PROTOCOL_PATH: &str = "i";
/// Vendor segment of the POST path
pub const POST_PROTOCOL_VENDOR: &str = "com.snowplowanalytics.snowplow";
/// Version segment of the POST path
pub const POST_PROTOCOL_VERSION: &str = "tp2";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Collector endpoint
    #[serde(default)]
    pub network: NetworkConfig,

    /// Batching and retry behaviour
    #[serde(default)]
    pub emitter: EmitterConfig,

    /// Client session tracking
    #[serde(default)]
    pub session: SessionConfig,

    /// Fields stamped on every tracked event
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP method used to deliver events
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    #[default]
    Post,
}

/// Collector URL scheme
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Collector endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Collector host with optional port, without a scheme (e.g., `collector.example.com:8080`)
    pub collector: Option<String>,

    /// HTTP method
    #[serde(default)]
    pub method: Method,

    /// URL scheme
    #[serde(default)]
    pub protocol: Protocol,

    /// HTTP request timeout in seconds
    #[serde(default = "default_network_timeout")]
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            collector: None,
            method: Method::default(),
            protocol: Protocol::default(),
            timeout_secs: default_network_timeout(),
        }
    }
}

fn default_network_timeout() -> u64 {
    30
}

impl NetworkConfig {
    /// Configuration for a collector host using the default method and protocol
    pub fn new(collector: impl Into<String>) -> Self {
        Self {
            collector: Some(collector.into()),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build and validate the collector URL for the configured method.
    ///
    /// The host must be non-empty and must not carry its own scheme.
    pub fn collector_url(&self) -> Result<String> {
        let uri = self.collector.as_deref().unwrap_or("").trim();
        if uri.is_empty() {
            return Err(Error::InvalidCollectorUrl(
                "collector URI cannot be empty".to_string(),
            ));
        }

        let lower = uri.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Err(Error::InvalidCollectorUrl(format!(
                "collector URI ({}) must not start with http:// or https://",
                uri
            )));
        }

        let path = match self.method {
            Method::Get => GET_PROTOCOL_PATH.to_string(),
            Method::Post => format!("{}/{}", POST_PROTOCOL_VENDOR, POST_PROTOCOL_VERSION),
        };
        let url = format!(
            "{}://{}/{}",
            self.protocol.scheme(),
            uri.trim_end_matches('/'),
            path
        );

        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| Error::InvalidCollectorUrl(format!("{}: {}", url, e)))?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(Error::InvalidCollectorUrl(format!("{}: missing host", url)));
        }

        Ok(url)
    }
}

/// A custom retry decision for one status code
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    pub status: u16,
    pub retry: bool,
}

/// Emitter batching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmitterConfig {
    /// Rows fetched from the queue per dispatch cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum query string length of a GET request
    #[serde(default = "default_byte_limit")]
    pub byte_limit_get: usize,

    /// Maximum body size of a POST request
    #[serde(default = "default_byte_limit")]
    pub byte_limit_post: usize,

    /// Status-specific overrides of the default retry policy
    #[serde(default)]
    pub retry_rules: Vec<RetryRule>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            byte_limit_get: default_byte_limit(),
            byte_limit_post: default_byte_limit(),
            retry_rules: vec![],
        }
    }
}

impl EmitterConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(
                "emitter.batch_size must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.retry_rules.iter().find(|r| r.status < 300) {
            return Err(Error::InvalidRetryRule(rule.status));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_byte_limit() -> usize {
    52_000
}

/// Client session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Attach a client session context to tracked events
    #[serde(default = "default_session_enabled")]
    pub enabled: bool,

    /// Inactivity that ends a session while in the foreground
    #[serde(default = "default_session_timeout")]
    pub foreground_timeout_secs: u64,

    /// Inactivity that ends a session while in the background
    #[serde(default = "default_session_timeout")]
    pub background_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: default_session_enabled(),
            foreground_timeout_secs: default_session_timeout(),
            background_timeout_secs: default_session_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn foreground_timeout(&self) -> Duration {
        Duration::from_secs(self.foreground_timeout_secs)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }
}

fn default_session_enabled() -> bool {
    true
}

fn default_session_timeout() -> u64 {
    1800
}

/// Tracker identity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Tracker namespace (`tna`)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Application id (`aid`)
    #[serde(default)]
    pub app_id: String,

    /// Platform (`p`)
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            app_id: String::new(),
            platform: default_platform(),
        }
    }
}

fn default_namespace() -> String {
    "beacon".to_string()
}

fn default_platform() -> String {
    "srv".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.emitter.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite event queue)
    ///
    /// `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/beacon/events.db` (~/.local/share/beacon/events.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/beacon/beacon.log` (~/.local/state/beacon/beacon.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("beacon.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
