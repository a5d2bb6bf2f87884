//! Configuration for the stream exporter.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use streamwatch_common::LoggingConfig;

use crate::api::DEFAULT_BASE_URL;
use crate::entity::{DEFAULT_ENVIRONMENT, StreamEntity};
use crate::schema::is_valid_metric_name;
use crate::worker::PollCadence;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] streamwatch_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP exposition settings.
    #[serde(default)]
    pub exporter: HttpConfig,

    /// Polling cadence and timeouts.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Upstream API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Streams to monitor.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8001").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "youtube").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "youtube".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// Polling cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between status checks.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Fetch engagement statistics every N ticks.
    #[serde(default = "default_engagement_every")]
    pub engagement_every: u64,

    /// Fetch channel details every N ticks.
    #[serde(default = "default_channel_every")]
    pub channel_every: u64,

    /// Delay between starting successive stream pollers (milliseconds).
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,

    /// Timeout of a single API request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_interval() -> u64 {
    30
}

fn default_engagement_every() -> u64 {
    5
}

fn default_channel_every() -> u64 {
    10
}

fn default_stagger() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            engagement_every: default_engagement_every(),
            channel_every: default_channel_every(),
            stagger_ms: default_stagger(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl PollingConfig {
    pub fn cadence(&self) -> PollCadence {
        PollCadence {
            interval: Duration::from_secs(self.interval_secs),
            engagement_every: self.engagement_every,
            channel_every: self.channel_every,
        }
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the video API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// One monitored stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name, used as the `stream` label.
    pub name: String,
    /// Display name of the channel.
    pub channel_name: String,
    pub channel_id: String,
    pub video_id: String,
    pub api_key: String,
    /// Environment label (default: "Production").
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

impl StreamConfig {
    pub fn to_entity(&self) -> StreamEntity {
        StreamEntity {
            channel_id: self.channel_id.clone(),
            video_id: self.video_id.clone(),
            stream_name: self.name.clone(),
            channel_name: self.channel_name.clone(),
            environment: self.environment.clone(),
            api_key: self.api_key.clone(),
        }
    }

    fn empty_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("channel_name", &self.channel_name),
            ("channel_id", &self.channel_id),
            ("video_id", &self.video_id),
            ("api_key", &self.api_key),
            ("environment", &self.environment),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = streamwatch_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = streamwatch_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate listen address format
        if self.exporter.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.exporter.listen
            )));
        }

        // Validate path starts with /
        if !self.exporter.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if !self.exporter.prefix.is_empty() && !is_valid_metric_name(&self.exporter.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.exporter.prefix
            )));
        }

        let polling = &self.polling;
        for (field, value) in [
            ("interval_secs", polling.interval_secs),
            ("engagement_every", polling.engagement_every),
            ("channel_every", polling.channel_every),
            ("request_timeout_secs", polling.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", field)));
            }
        }

        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api.base_url must not be empty".to_string(),
            ));
        }

        if self.streams.is_empty() {
            return Err(ConfigError::Validation(
                "At least one stream must be configured".to_string(),
            ));
        }

        let mut keys = HashSet::new();
        for (i, stream) in self.streams.iter().enumerate() {
            if let Some(field) = stream.empty_field() {
                return Err(ConfigError::Validation(format!(
                    "streams[{}].{} must not be empty",
                    i, field
                )));
            }

            let key = stream.to_entity().key();
            if !keys.insert(key.clone()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate stream: {}",
                    key
                )));
            }
        }

        Ok(())
    }

    /// The monitored streams, in configuration order.
    pub fn entities(&self) -> Vec<StreamEntity> {
        self.streams.iter().map(StreamConfig::to_entity).collect()
    }
}
