//! Configuration management for vulnmirror
//!
//! This module handles loading, parsing, and validating application
//! configuration from YAML files and environment variables. The resolved
//! [`Config`] is immutable and handed to the engine once at startup; the
//! engine itself never reads the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Remote authority configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Watch-mode scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Enrichment cache TTLs
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // Expand environment variables before deserializing
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix VULNMIRROR_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("VULNMIRROR_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(key) = std::env::var("VULNMIRROR_API_KEY") {
            if !key.is_empty() {
                config.source.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("VULNMIRROR_BASE_URL") {
            config.source.base_url = url;
        }
        if let Ok(max) = std::env::var("VULNMIRROR_MAX_PER_WINDOW") {
            config.source.max_requests_per_window = Some(
                max.parse()
                    .map_err(|_| ConfigError::Parse("Invalid max requests per window".to_string()))?,
            );
        }
        if let Ok(days) = std::env::var("VULNMIRROR_MAX_SPAN_DAYS") {
            config.source.max_span_days = days
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid max span days".to_string()))?;
        }
        if let Ok(agent) = std::env::var("VULNMIRROR_USER_AGENT") {
            config.source.user_agent = agent;
        }
        if let Ok(hours) = std::env::var("VULNMIRROR_OSV_TTL_HOURS") {
            config.enrichment.osv_ttl_hours = hours
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid osv cache TTL hours".to_string()))?;
        }
        if let Ok(hours) = std::env::var("VULNMIRROR_KEV_TTL_HOURS") {
            config.enrichment.kev_ttl_hours = hours
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid kev cache TTL hours".to_string()))?;
        }
        if let Ok(hours) = std::env::var("VULNMIRROR_EPSS_TTL_HOURS") {
            config.enrichment.epss_ttl_hours = hours
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid epss cache TTL hours".to_string()))?;
        }
        if let Ok(level) = std::env::var("VULNMIRROR_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }
}

/// Remote authority configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Short tag naming the origin authority
    #[serde(default = "default_source_name")]
    pub name: String,

    /// Search endpoint base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional API key sent in the `apiKey` header
    pub api_key: Option<String>,

    /// User-Agent header for outbound requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Fixed page size for paginated fetches
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Requests allowed per rate window; when unset the limit is derived
    /// from API key presence (50 keyed, 5 anonymous)
    pub max_requests_per_window: Option<u32>,

    /// Rate window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Maximum span of a single sync window in days
    #[serde(default = "default_max_span_days")]
    pub max_span_days: u32,

    /// How far back the first sync reaches when no cursor exists, in days
    #[serde(default = "default_lookback_days")]
    pub default_lookback_days: u32,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl SourceConfig {
    /// Effective per-window request budget: explicit value if configured,
    /// otherwise derived from API key presence.
    pub fn resolved_max_requests(&self) -> u32 {
        self.max_requests_per_window
            .unwrap_or(if self.api_key.is_some() { 50 } else { 5 })
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            base_url: default_base_url(),
            api_key: None,
            user_agent: default_user_agent(),
            page_size: default_page_size(),
            max_requests_per_window: None,
            window_secs: default_window_secs(),
            max_span_days: default_max_span_days(),
            default_lookback_days: default_lookback_days(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_source_name() -> String {
    "nvd".to_string()
}

fn default_base_url() -> String {
    "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string()
}

fn default_user_agent() -> String {
    format!("vulnmirror/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u32 {
    2000
}

fn default_window_secs() -> u64 {
    30
}

fn default_max_span_days() -> u32 {
    7
}

fn default_lookback_days() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "vulnmirror.db".to_string()
}

/// Watch-mode scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Interval between delta syncs in seconds
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Initial delay before the first sync in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Jitter range added to sync intervals in seconds
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,

    /// Per-run timeout in seconds
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_jitter(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

fn default_sync_interval() -> u64 {
    3600
}

fn default_initial_delay() -> u64 {
    5
}

fn default_jitter() -> u64 {
    60
}

fn default_sync_timeout() -> u64 {
    1800
}

/// TTLs for the enrichment caches consumed by reporting collaborators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentConfig {
    /// Package-vulnerability lookup cache TTL in hours
    #[serde(default = "default_osv_ttl")]
    pub osv_ttl_hours: u32,

    /// Known-exploited catalog TTL in hours
    #[serde(default = "default_kev_ttl")]
    pub kev_ttl_hours: u32,

    /// Exploitability score TTL in hours
    #[serde(default = "default_epss_ttl")]
    pub epss_ttl_hours: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            osv_ttl_hours: default_osv_ttl(),
            kev_ttl_hours: default_kev_ttl(),
            epss_ttl_hours: default_epss_ttl(),
        }
    }
}

fn default_osv_ttl() -> u32 {
    12
}

fn default_kev_ttl() -> u32 {
    24
}

fn default_epss_ttl() -> u32 {
    720
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format ("pretty" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
