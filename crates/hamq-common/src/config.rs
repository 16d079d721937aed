//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Shared primitives and utilities for the core runtime."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use strum::{Display, EnumString};
use tracing::debug;

use crate::logging::LogFormat;

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::ActivePassive
}

fn default_queue() -> String {
    "job-queue".to_owned()
}

fn default_primary_connection() -> String {
    "memory://primary".to_owned()
}

fn default_secondary_connection() -> String {
    "memory://secondary".to_owned()
}

fn default_max_concurrent() -> usize {
    2
}

fn default_receive_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_batch_size() -> usize {
    10
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9899))
}

/// Primary configuration object for the HAMQ runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_delivery_mode")]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HAMQ_CONFIG";

    /// Load configuration from disk, respecting the `HAMQ_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.endpoints.validate()?;
        if self.consumer.max_concurrent == 0 {
            return Err(anyhow!("consumer.max_concurrent must be at least 1"));
        }
        if self.producer.batch_size == 0 {
            return Err(anyhow!("producer.batch_size must be at least 1"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            delivery_mode: default_delivery_mode(),
            endpoints: EndpointsConfig::default(),
            consumer: ConsumerConfig::default(),
            producer: ProducerConfig::default(),
            codec: CodecConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Fan-out strategy applied by the dispatcher for every job.
///
/// Fixed for the lifetime of the process.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum DeliveryMode {
    /// Every job is sent to both endpoints; consumers collapse the duplicates.
    ActiveActive,
    /// The secondary endpoint only receives jobs the primary could not take.
    #[default]
    ActivePassive,
}

impl DeliveryMode {
    pub fn mirrors_to_secondary(&self) -> bool {
        matches!(self, DeliveryMode::ActiveActive)
    }
}

/// Connection descriptors for the two regional endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,
}

impl EndpointsConfig {
    pub fn validate(&self) -> Result<()> {
        self.primary.validate("primary")?;
        self.secondary.validate("secondary")?;
        if self.primary.connection == self.secondary.connection
            && self.primary.queue == self.secondary.queue
        {
            return Err(anyhow!(
                "primary and secondary endpoints must not point at the same queue ({})",
                self.primary.describe()
            ));
        }
        Ok(())
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            primary: EndpointConfig::new(default_primary_connection(), default_queue()),
            secondary: EndpointConfig::new(default_secondary_connection(), default_queue()),
        }
    }
}

/// Connection descriptor for a single queue endpoint.
///
/// The connection string is opaque to this crate; an empty or unreachable
/// connection only surfaces when the transport attempts to connect.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default)]
    pub connection: String,
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl EndpointConfig {
    pub fn new(connection: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            queue: queue.into(),
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(anyhow!("endpoints.{}.queue must not be empty", label));
        }
        Ok(())
    }

    /// Loggable form of the endpoint with any credential segments removed.
    pub fn describe(&self) -> String {
        let target = self
            .connection
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let target = if target.is_empty() { "<unset>" } else { target };
        format!("{}/{}", target.trim_end_matches('/'), self.queue)
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("target", &self.describe())
            .finish()
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum number of in-flight deliveries per endpoint.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Pause applied after a receive error before polling the endpoint again.
    #[serde(default = "default_receive_backoff", rename = "receive_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub receive_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            receive_backoff: default_receive_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecConfig {
    #[serde(default)]
    pub compression: CompressionKind,
    #[serde(default)]
    pub format: PayloadFormatKind,
}

/// Byte-level transform applied to serialized payloads.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Gzip,
    None,
}

/// Serialization format used for job payloads.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PayloadFormatKind {
    #[default]
    Json,
    Cbor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
