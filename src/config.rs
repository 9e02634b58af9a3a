//! Configuration management for the waste classifier service

use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use image::imageops::FilterType;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where the model artifact is fetched from at startup
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSourceKind {
    /// Google Cloud Storage bucket
    #[default]
    Gcs,
    /// Local directory, `bucket` is the directory and `object` the file name
    Local,
}

/// Document store backend used by the result recorder
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Cloud Firestore over its REST API
    #[default]
    Firestore,
    /// In-process store, contents are lost on exit
    Memory,
}

/// Resampling filter used when resizing uploads to the model resolution
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    /// Bicubic, the default of most Python imaging stacks
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Main application configuration.
///
/// Every section and every key falls back to its default, so a file or
/// environment only needs to name what it changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifact: ArtifactConfig,
    pub gcp: GcpConfig,
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub history: HistoryConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body size
    pub body_limit_bytes: usize,
    /// Report every processing failure as 500 instead of per-kind status codes
    pub legacy_status_codes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 10 * 1024 * 1024,
            legacy_status_codes: false,
        }
    }
}

/// Model artifact location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub source: ArtifactSourceKind,
    pub bucket: String,
    pub object: String,
    /// Ephemeral path the artifact is written to
    pub local_path: PathBuf,
    pub storage_endpoint: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            source: ArtifactSourceKind::Gcs,
            bucket: "storage-model-data".to_string(),
            object: "model_capstonelancar.onnx".to_string(),
            local_path: PathBuf::from("/tmp/model.onnx"),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
        }
    }
}

/// How bearer tokens are obtained when no pre-issued token is set
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenSourceKind {
    /// Self-signed JWT-bearer grant using the key file
    #[default]
    ServiceAccount,
    /// GCE / Cloud Run metadata server, runs as the runtime identity
    Metadata,
}

/// Google Cloud credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    /// Service-account key file
    pub credentials_path: PathBuf,
    /// Overrides the project id found in the key file when non-empty
    pub project_id: String,
    pub token_source: TokenSourceKind,
    pub metadata_endpoint: String,
    /// Environment variable holding a pre-issued access token
    pub access_token_env: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("service-account.json"),
            project_id: String::new(),
            token_source: TokenSourceKind::ServiceAccount,
            metadata_endpoint: "http://metadata.google.internal".to_string(),
            access_token_env: "GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
        }
    }
}

/// Prediction store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub collection: String,
    pub database: String,
    pub firestore_endpoint: String,
    /// Documents requested per page when listing the collection
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Firestore,
            collection: "predictions".to_string(),
            database: "(default)".to_string(),
            firestore_endpoint: "https://firestore.googleapis.com".to_string(),
            page_size: 300,
        }
    }
}

/// Model input configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Square input resolution expected by the network
    pub input_size: u32,
    pub resize_filter: ResizeFilter,
    /// Number of threads for ONNX inference (default: 1)
    pub onnx_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            resize_filter: ResizeFilter::CatmullRom,
            onnx_threads: 1,
        }
    }
}

/// History listing configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Records returned when the request has no `limit`; 0 returns everything
    pub default_limit: usize,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between summaries, 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/config.toml` and `WASTE__*` variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, layered over the defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layered(path.as_ref(), None)
    }

    /// Defaults, then the file, then `WASTE__*` variables taken from `env`
    /// or the process environment
    fn load_layered(path: &Path, env: Option<Map<String, String>>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("WASTE")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Whether startup needs Google Cloud credentials
    pub fn needs_gcp(&self) -> bool {
        self.artifact.source == ArtifactSourceKind::Gcs
            || self.store.backend == StoreBackend::Firestore
    }

    /// Listener address in `host:port` form
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
