//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::codec::Separators;
use crate::delivery::{DeliveryConfig, DEFAULT_LAST_WILL_TOPIC};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub separators: SeparatorsConfig,

    #[serde(default)]
    pub extent: ExtentConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Equipment read in tag mode
    #[serde(default)]
    pub equipment: Vec<EquipmentConfig>,

    /// Modules read in batch mode
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// Historian backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Backend: "csv" (row replay) or "xml" (export replay)
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// What to read each cycle: "tag" or "batch"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Date pattern of every timestamp the backend produces
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Boundary handling: inside, outside or interpolated
    #[serde(default = "default_boundary")]
    pub boundary: String,
}

fn default_backend() -> String {
    "csv".to_string()
}

fn default_source_dir() -> String {
    "./historian".to_string()
}

fn default_mode() -> String {
    "tag".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%dT%H-%M-%S".to_string()
}

fn default_boundary() -> String {
    "inside".to_string()
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            source_dir: default_source_dir(),
            mode: default_mode(),
            date_format: default_date_format(),
            boundary: default_boundary(),
        }
    }
}

/// Tag codec separators
#[derive(Debug, Clone, Deserialize)]
pub struct SeparatorsConfig {
    #[serde(default = "default_time_separator")]
    pub time: String,

    #[serde(default = "default_field_separator")]
    pub field: String,

    #[serde(default = "default_value_separator")]
    pub value: String,
}

fn default_time_separator() -> String {
    ":".to_string()
}

fn default_field_separator() -> String {
    "|".to_string()
}

fn default_value_separator() -> String {
    ",".to_string()
}

impl Default for SeparatorsConfig {
    fn default() -> Self {
        Self {
            time: default_time_separator(),
            field: default_field_separator(),
            value: default_value_separator(),
        }
    }
}

impl SeparatorsConfig {
    /// Build validated separators
    pub fn to_separators(&self) -> Result<Separators, ConfigError> {
        Separators::new(&self.time, &self.field, &self.value)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Read window configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtentConfig {
    /// Window type: frequency, relative or fixed
    #[serde(rename = "type", default = "default_extent_type")]
    pub kind: String,

    /// Cycle period (frequency)
    #[serde(default = "default_every_secs")]
    pub every_secs: u64,

    /// Extra overlap as a fraction of the period (frequency)
    #[serde(default = "default_buffer")]
    pub buffer: f64,

    /// Maximum catch-up after missed cycles (frequency)
    #[serde(default)]
    pub limit_secs: Option<u64>,

    /// Look-back window (relative)
    #[serde(default = "default_read_past_secs")]
    pub read_past_secs: u64,

    /// Window bounds in the reader date format (fixed)
    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub end: Option<String>,
}

fn default_extent_type() -> String {
    "frequency".to_string()
}

fn default_every_secs() -> u64 {
    300 // 5 minutes
}

fn default_buffer() -> f64 {
    0.1
}

fn default_read_past_secs() -> u64 {
    3600
}

impl Default for ExtentConfig {
    fn default() -> Self {
        Self {
            kind: default_extent_type(),
            every_secs: default_every_secs(),
            buffer: default_buffer(),
            limit_secs: None,
            read_past_secs: default_read_past_secs(),
            start: None,
            end: None,
        }
    }
}

/// Broker delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,

    /// Transport: "http" or "memory" (dry run)
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_publish_path")]
    pub publish_path: String,

    #[serde(default = "default_status_path")]
    pub status_path: String,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retain: bool,

    #[serde(default = "default_reconnect")]
    pub reconnect: bool,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Rejections of one payload before it is dead-lettered; 0 retries forever
    #[serde(default = "default_max_publish_attempts")]
    pub max_publish_attempts: u32,

    /// Topic for the offline notice sent on shutdown; empty disables it
    #[serde(default = "default_last_will_topic")]
    pub last_will_topic: String,

    /// Payload format: "xml" or "text"
    #[serde(default = "default_serialization")]
    pub serialization: String,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_transport() -> String {
    "http".to_string()
}

fn default_broker_url() -> String {
    "http://localhost:18083".to_string()
}

fn default_publish_path() -> String {
    "/api/v5/publish".to_string()
}

fn default_status_path() -> String {
    "/api/v5/status".to_string()
}

fn default_client_name() -> String {
    "historian-relay".to_string()
}

fn default_broker_timeout() -> u64 {
    10
}

fn default_reconnect() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_max_publish_attempts() -> u32 {
    3
}

fn default_last_will_topic() -> String {
    DEFAULT_LAST_WILL_TOPIC.to_string()
}

fn default_serialization() -> String {
    "xml".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            transport: default_transport(),
            url: default_broker_url(),
            publish_path: default_publish_path(),
            status_path: default_status_path(),
            client_name: default_client_name(),
            username: None,
            password: None,
            timeout_secs: default_broker_timeout(),
            retain: false,
            reconnect: default_reconnect(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_publish_attempts: default_max_publish_attempts(),
            last_will_topic: default_last_will_topic(),
            serialization: default_serialization(),
        }
    }
}

impl BrokerConfig {
    /// Settings for the delivery queue
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            client_name: self.client_name.clone(),
            reconnect: self.reconnect,
            reconnect_delay: std::time::Duration::from_secs(self.reconnect_delay_secs),
            max_publish_attempts: self.max_publish_attempts,
            last_will_topic: Some(self.last_will_topic.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }
}

/// Local flat-file output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_enabled")]
    pub enabled: bool,

    #[serde(default = "default_output_dir")]
    pub dir: String,

    #[serde(default = "default_append")]
    pub append: bool,

    /// Date pattern written to the CSV tables
    #[serde(default = "default_output_date_format")]
    pub date_format: String,
}

fn default_output_enabled() -> bool {
    true
}

fn default_output_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("historian-relay").to_string_lossy().to_string())
        .unwrap_or_else(|| "./historian_out".to_string())
}

fn default_append() -> bool {
    true
}

fn default_output_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: default_output_enabled(),
            dir: default_output_dir(),
            append: default_append(),
            date_format: default_output_date_format(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One piece of equipment and the points read for it
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentConfig {
    pub name: String,

    /// Destination topic; defaults to the equipment name
    pub topic: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Enumerated phase points
    #[serde(default)]
    pub phases: Vec<String>,
}

impl EquipmentConfig {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }
}

/// One batch module and its historian path
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub name: String,

    pub path: String,

    /// Destination topic; defaults to the module name
    pub topic: Option<String>,
}

impl ModuleConfig {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("historian-relay").join("config.toml")),
            Some(PathBuf::from("/etc/historian-relay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check the settings that cannot be defaulted
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.separators.to_separators()?;
        check_date_format("reader.date_format", &self.reader.date_format)?;
        check_date_format("output.date_format", &self.output.date_format)?;

        match self.reader.mode.as_str() {
            "tag" if self.equipment.is_empty() => {
                return Err(ConfigError::Invalid(
                    "tag mode needs at least one [[equipment]] entry".into(),
                ))
            }
            "batch" if self.modules.is_empty() => {
                return Err(ConfigError::Invalid(
                    "batch mode needs at least one [[module]] entry".into(),
                ))
            }
            "tag" | "batch" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown reader mode: {}",
                    other
                )))
            }
        }

        if self.extent.kind == "fixed" && (self.extent.start.is_none() || self.extent.end.is_none())
        {
            return Err(ConfigError::Invalid(
                "fixed extent needs both start and end".into(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("HISTRELAY_SOURCE_DIR") {
            self.reader.source_dir = dir;
        }

        if let Ok(url) = std::env::var("HISTRELAY_BROKER_URL") {
            self.broker.url = url;
        }

        if let Ok(dir) = std::env::var("HISTRELAY_OUTPUT_DIR") {
            self.output.dir = dir;
        }

        if let Ok(level) = std::env::var("HISTRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HISTRELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn check_date_format(key: &str, format: &str) -> Result<(), ConfigError> {
    let invalid = format.is_empty()
        || StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
    if invalid {
        return Err(ConfigError::Invalid(format!(
            "{} is not a valid date pattern: '{}'",
            key, format
        )));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# historian-relay Configuration
#
# Environment variables override these settings:
# - HISTRELAY_SOURCE_DIR
# - HISTRELAY_BROKER_URL
# - HISTRELAY_OUTPUT_DIR
# - HISTRELAY_LOG_LEVEL
# - HISTRELAY_LOG_FORMAT

[reader]
# Backend: csv (row replay) or xml (export replay)
backend = "csv"

# Directory holding the backend's source files
source_dir = "./historian"

# What to read: tag (per equipment) or batch (per module)
mode = "tag"

# Date pattern of historian timestamps
date_format = "%Y-%m-%dT%H-%M-%S"

# Boundary handling: inside, outside or interpolated
boundary = "inside"

[separators]
time = ":"
field = "|"
value = ","

[extent]
# Window type: frequency, relative or fixed
type = "frequency"

# Cycle period in seconds
every_secs = 300

# Extra overlap as a fraction of the period
buffer = 0.1

# Maximum catch-up after missed cycles, in seconds
# limit_secs = 86400

# read_past_secs = 3600           # relative
# start = "2024-01-01T00-00-00"   # fixed
# end = "2024-01-02T00-00-00"     # fixed

[broker]
enabled = true

# Transport: http or memory (dry run)
transport = "http"
url = "http://localhost:18083"
publish_path = "/api/v5/publish"
status_path = "/api/v5/status"
client_name = "historian-relay"
# username = ""
# password = ""
timeout_secs = 10
retain = false
reconnect = true
reconnect_delay_secs = 5
# Rejections before a payload is dead-lettered (0 = retry forever)
max_publish_attempts = 3
# Offline notice on shutdown; empty disables it
last_will_topic = "/pireaderlastwill"

# Payload format: xml or text
serialization = "xml"

[output]
enabled = true
dir = "~/.local/share/historian-relay"
append = true
date_format = "%Y-%m-%d %H:%M:%S"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

[[equipment]]
name = "Reactor1"
topic = "plant/reactor1"
tags = ["TI-101", "PI-102"]
phases = ["PH-REACTOR1"]

# [[module]]
# name = "Reactor1"
# path = "\\Plant\\Area1\\Reactor1"
"#
    .to_string()
}
