// Configuration management module
// Loads the TOML settings file and exposes the paths every pipeline stage uses

pub mod settings;


pub use settings::{
    CleanupConfig, Config, ConfigError, EmbeddingConfig, ExportConfig, ExportFormat, LockBackend,
    LockConfig, LoggingConfig, OllamaConfig, SyncConfig, WikidataConfig, WordNetConfig,
};

/// Resolve the configuration directory, preferring an explicit override
#[inline]
pub fn resolve_config_dir(
    override_dir: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => Config::default_config_dir(),
    }
}
