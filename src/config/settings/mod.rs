
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::sqlite::DATABASE_FILE;
use crate::database::sqlite::models::Domain;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub wordnet: WordNetConfig,
    #[serde(default)]
    pub wikidata: WikidataConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Upper bound for day-based windows, keeps cutoff arithmetic in range
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Remote source sync scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum number of days between two "all sources" syncs
    pub interval_days: u64,
    /// Domains iterated when no `--domain` is given
    pub domains: Vec<Domain>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_days: 7,
            domains: Domain::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WordNetConfig {
    pub enabled: bool,
    /// Base URL of a Datamuse-compatible lexical relation service
    pub endpoint: String,
    pub max_synonyms: u32,
    pub timeout_seconds: u64,
    /// Seed vocabulary queried for each domain
    pub seeds: BTreeMap<Domain, Vec<String>>,
}

impl Default for WordNetConfig {
    fn default() -> Self {
        let seeds = [
            (
                Domain::Archival,
                &[
                    "archive",
                    "fonds",
                    "provenance",
                    "accession",
                    "finding aid",
                    "manuscript",
                    "record",
                    "appraisal",
                ][..],
            ),
            (
                Domain::Library,
                &[
                    "library",
                    "catalogue",
                    "periodical",
                    "monograph",
                    "bibliography",
                    "circulation",
                    "reference",
                ][..],
            ),
            (
                Domain::Museum,
                &[
                    "museum",
                    "exhibition",
                    "artefact",
                    "collection",
                    "curator",
                    "conservation",
                    "specimen",
                ][..],
            ),
            (
                Domain::General,
                &["document", "photograph", "map", "letter", "diary", "report"][..],
            ),
        ]
        .into_iter()
        .map(|(domain, words)| (domain, words.iter().map(|w| (*w).to_string()).collect()))
        .collect();

        Self {
            enabled: true,
            endpoint: "https://api.datamuse.com".to_string(),
            max_synonyms: 20,
            timeout_seconds: 30,
            seeds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WikidataConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub language: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Wikidata classes (QIDs) whose instances and subclasses belong to each domain
    pub classes: BTreeMap<Domain, Vec<String>>,
}

impl Default for WikidataConfig {
    fn default() -> Self {
        let classes = [
            (Domain::Archival, vec!["Q166118".to_string()]),
            (Domain::Library, vec!["Q7075".to_string()]),
            (Domain::Museum, vec!["Q33506".to_string()]),
        ]
        .into_iter()
        .collect();

        Self {
            enabled: true,
            endpoint: "https://query.wikidata.org/sparql".to_string(),
            language: "en".to_string(),
            user_agent: concat!("thesaurus-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 60,
            classes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub embedding_dimension: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embeddings older than this many days are regenerated
    pub stale_after_days: i64,
    /// Wall-clock budget for the whole run, checked between embedding calls
    pub max_runtime_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            max_runtime_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Solr/Elasticsearch synonyms file, one comma-separated group per line
    #[default]
    Solr,
    /// Body for the Elasticsearch synonyms set API
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Artifact location; defaults to `<base_dir>/export/synonyms.txt`
    pub path: Option<PathBuf>,
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub retention_days: i64,
    /// Run VACUUM/ANALYZE after deleting
    pub optimize: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            optimize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    pub backend: LockBackend,
    /// Lock file location; defaults to `<base_dir>/thesaurus-sync.lock`
    pub path: Option<PathBuf>,
    /// A database lock row without a heartbeat for this long can be taken over
    pub stale_after_seconds: u64,
    pub heartbeat_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::File,
            path: None,
            stale_after_seconds: 120,
            heartbeat_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when neither `THESAURUS_SYNC_LOG` nor `RUST_LOG` is set
    pub level: String,
    /// Log file location; defaults to `<base_dir>/logs/thesaurus-sync.log`
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid sync interval: {0} days (must be between 1 and 365)")]
    InvalidSyncInterval(u64),
    #[error("No domains configured for source sync")]
    NoDomains,
    #[error("Invalid staleness threshold: {0} days (must be between 1 and 36500)")]
    InvalidStaleness(i64),
    #[error("Invalid runtime budget: {0} (must be at least 1 second)")]
    InvalidRuntimeBudget(u64),
    #[error("Invalid retention window: {0} days (must be between 1 and 36500)")]
    InvalidRetention(i64),
    #[error("Invalid lock timing: heartbeat {0}s must be shorter than stale threshold {1}s")]
    InvalidLockTiming(u64, u64),
    #[error("Invalid log level directive: {0}")]
    InvalidLogLevel(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".thesaurus-sync"))
            .or_else(|| dirs::data_dir().map(|data| data.join("thesaurus-sync")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_sync_config()?;
        self.validate_retention_config()?;

        if self.lock.heartbeat_seconds == 0
            || self.lock.heartbeat_seconds >= self.lock.stale_after_seconds
        {
            return Err(ConfigError::InvalidLockTiming(
                self.lock.heartbeat_seconds,
                self.lock.stale_after_seconds,
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    fn validate_sync_config(&self) -> Result<(), ConfigError> {
        if !(1..=365).contains(&self.sync.interval_days) {
            return Err(ConfigError::InvalidSyncInterval(self.sync.interval_days));
        }

        if self.sync.domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }

        Url::parse(&self.wordnet.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.wordnet.endpoint.clone()))?;
        Url::parse(&self.wikidata.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.wikidata.endpoint.clone()))?;

        for timeout in [self.wordnet.timeout_seconds, self.wikidata.timeout_seconds] {
            if !(1..=600).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        Ok(())
    }

    fn validate_retention_config(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.embeddings.stale_after_days) {
            return Err(ConfigError::InvalidStaleness(
                self.embeddings.stale_after_days,
            ));
        }

        if self.embeddings.max_runtime_seconds == 0 {
            return Err(ConfigError::InvalidRuntimeBudget(
                self.embeddings.max_runtime_seconds,
            ));
        }

        if !(1..=MAX_WINDOW_DAYS).contains(&self.cleanup.retention_days) {
            return Err(ConfigError::InvalidRetention(self.cleanup.retention_days));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite term store
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join(DATABASE_FILE)
    }

    #[inline]
    pub fn lock_file_path(&self) -> PathBuf {
        self.lock
            .path
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("thesaurus-sync.lock"))
    }

    #[inline]
    pub fn log_file_path(&self) -> PathBuf {
        self.logging
            .file
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("logs").join("thesaurus-sync.log"))
    }

    #[inline]
    pub fn export_path(&self) -> PathBuf {
        self.export.path.clone().unwrap_or_else(|| {
            let file_name = match self.export.format {
                ExportFormat::Solr => "synonyms.txt",
                ExportFormat::Json => "synonyms.json",
            };
            self.get_base_dir().join("export").join(file_name)
        })
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
