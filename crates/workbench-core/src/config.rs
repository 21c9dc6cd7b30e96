//! Configuration management for the workbench
//!
//! Handles loading and validation of `workbench.toml` and the `WORKBENCH_*`
//! environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clustering::{AutoKSelector, DEFAULT_K_MAX, DEFAULT_K_MIN, LinkageConfig, validate_names};
use crate::embedder::{DEFAULT_BATCH_SIZE, DEFAULT_DESCRIPTION_CHARS, EmbedderConfig};
use crate::error::{ConfigError, Result};
use crate::inference::EMBEDDING_DIMENSION;
use crate::logging::LogConfig;
use crate::namer::NamerConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "WORKBENCH_";
/// Config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "workbench.toml";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for terminals
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inference service settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Embedding batch settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Clustering defaults
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Cluster naming settings
    #[serde(default)]
    pub naming: NamerConfig,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file
    #[serde(default)]
    pub log_file: Option<String>,

    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "~/.incident-workbench".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.incident-workbench/incidents.db".to_string()
}

/// Inference service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the Ollama-compatible service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Model used for structured generation
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Expected embedding length
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Embedding request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Generation request timeout in seconds
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,

    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            embedding_dimension: default_embedding_dimension(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            generate_timeout_secs: default_generate_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}

fn default_embedding_dimension() -> usize {
    EMBEDDING_DIMENSION
}

fn default_connect_timeout() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    120
}

fn default_generate_timeout() -> u64 {
    180
}

fn default_max_attempts() -> u32 {
    2
}

/// Embedding batch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Texts per inference request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Description prefix length in characters
    #[serde(default = "default_description_chars")]
    pub description_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            description_chars: default_description_chars(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_description_chars() -> usize {
    DEFAULT_DESCRIPTION_CHARS
}

/// Clustering defaults applied when a run request leaves them unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Linkage method name
    #[serde(default = "default_method")]
    pub default_method: String,

    /// Distance metric name
    #[serde(default = "default_metric")]
    pub default_metric: String,

    /// Smallest k considered by automatic selection
    #[serde(default = "default_k_min")]
    pub k_min: usize,

    /// Largest k considered by automatic selection
    #[serde(default = "default_k_max")]
    pub k_max: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            default_method: default_method(),
            default_metric: default_metric(),
            k_min: default_k_min(),
            k_max: default_k_max(),
        }
    }
}

fn default_method() -> String {
    "average".to_string()
}

fn default_metric() -> String {
    "cosine".to_string()
}

fn default_k_min() -> usize {
    DEFAULT_K_MIN
}

fn default_k_max() -> usize {
    DEFAULT_K_MAX
}

impl ClusteringConfig {
    /// Validated default linkage.
    pub fn default_linkage(&self) -> Result<LinkageConfig> {
        Ok(validate_names(&self.default_method, &self.default_metric)?)
    }

    pub fn selector(&self) -> Result<AutoKSelector> {
        Ok(AutoKSelector::new(self.k_min, self.k_max)?)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    expand_path(&default_data_dir()).join(CONFIG_FILE_NAME)
}

impl Config {
    /// Load configuration from the default location, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = default_config_path();
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML without env overrides or validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str::<Self>(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?)
    }

    /// Apply `WORKBENCH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (keys include the prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        if let Some(v) = get("DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(v) = get("OLLAMA_URL") {
            self.inference.base_url = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.general.log_level = v;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(ConfigError::ValidationError(msg).into()) };
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".to_string());
        }
        if self.inference.embedding_dimension == 0 {
            return invalid("inference.embedding_dimension must be at least 1".to_string());
        }
        if self.inference.max_attempts == 0 {
            return invalid("inference.max_attempts must be at least 1".to_string());
        }
        if self.naming.sample_size == 0 {
            return invalid("naming.sample_size must be at least 1".to_string());
        }
        if self.inference.base_url.trim().is_empty() {
            return invalid("inference.base_url must not be empty".to_string());
        }
        if let Err(err) = self.clustering.selector() {
            return invalid(format!("clustering: {err}"));
        }
        if let Err(err) = self.clustering.default_linkage() {
            return invalid(format!("clustering: {err}"));
        }
        if let Err(err) = self.general.log_level.parse::<crate::logging::LogLevel>() {
            return invalid(format!("general.log_level: {err}"));
        }
        Ok(())
    }

    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.storage.db_path)
    }

    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            batch_size: self.embedding.batch_size,
            description_chars: self.embedding.description_chars,
            dimension: self.inference.embedding_dimension,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.general.log_level.clone(),
            format: self.general.log_format,
            file: self.general.log_file.as_deref().map(expand_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.inference.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.inference.embedding_model, "nomic-embed-text");
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.embedding.description_chars, 500);
        assert_eq!(config.clustering.k_min, 2);
        assert_eq!(config.clustering.k_max, 15);
        assert_eq!(config.naming.sample_size, 20);
        assert!(config.storage.db_path.ends_with("incidents.db"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [clustering]
            default_method = "complete"
            k_max = 8

            [inference]
            generation_model = "qwen2.5"
            "#,
        )
        .unwrap();
        assert_eq!(config.clustering.default_method, "complete");
        assert_eq!(config.clustering.k_max, 8);
        assert_eq!(config.clustering.k_min, 2);
        assert_eq!(config.inference.generation_model, "qwen2.5");
        assert_eq!(config.inference.embedding_model, "nomic-embed-text");
        assert_eq!(config.general.log_format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = Config::from_toml_str("[clustering\nk_min = ").unwrap_err();
        assert!(matches!(err, crate::Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut config = Config::default();
        config.clustering.default_method = "ward".to_string();
        assert!(config.validate().is_err());
        config.clustering.default_metric = "euclidean".to_string();
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.clustering.k_min = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_with_prefix() {
        let env: HashMap<&str, &str> = [
            ("WORKBENCH_DB_PATH", "/tmp/wb.db"),
            ("WORKBENCH_OLLAMA_URL", "http://gpu-box:11434"),
            ("WORKBENCH_LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/wb.db"));
        assert_eq!(config.inference.base_url, "http://gpu-box:11434");
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = Config::default();
        config.general.log_format = LogFormat::Json;
        config.clustering.k_max = 9;
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_from_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.clustering, ClusteringConfig::default());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[embedding]\nbatch_size = 8\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.embedder_config().batch_size, 8);
        assert_eq!(config.embedder_config().dimension, 768);
    }

    #[test]
    fn expand_path_handles_tilde() {
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.db"), home.join("x.db"));
        }
    }

    #[test]
    fn log_format_parse_and_display() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }
}
