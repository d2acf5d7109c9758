use crate::session::sweeper::DEFAULT_SWEEP_INTERVAL;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where and how to reach the REST API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_upload_timeout_ms() -> u64 {
    300_000 // large scans on slow links
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            upload_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

/// Session persistence and expiry sweep
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Directory holding the persisted session record
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One config file as written: everything optional so layers can merge
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    #[serde(default)]
    api: ApiLayer,
    #[serde(default)]
    session: SessionLayer,
    #[serde(default)]
    logging: LoggingLayer,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiLayer {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    upload_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SessionLayer {
    state_dir: Option<PathBuf>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LoggingLayer {
    level: Option<String>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.restora/config.local.toml) > project (.restora/config.toml) > user (~/.restora/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".restora").join("config.toml");
            if user_config.exists() {
                config.merge_file(&user_config)?;
            }
        }

        let project_config = Path::new(".restora").join("config.toml");
        if project_config.exists() {
            config.merge_file(&project_config)?;
        }

        // Should be gitignored
        let local_config = Path::new(".restora").join("config.local.toml");
        if local_config.exists() {
            config.merge_file(&local_config)?;
        }

        Ok(config)
    }

    /// Load configuration from a specific path on top of the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let layer: ConfigLayer = toml::from_str(&content)?;
        self.merge(layer);
        Ok(())
    }

    /// Values set in `layer` override ours
    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(base_url) = layer.api.base_url {
            self.api.base_url = base_url;
        }
        if let Some(timeout_ms) = layer.api.timeout_ms {
            self.api.timeout_ms = timeout_ms;
        }
        if let Some(upload_timeout_ms) = layer.api.upload_timeout_ms {
            self.api.upload_timeout_ms = upload_timeout_ms;
        }
        if layer.session.state_dir.is_some() {
            self.session.state_dir = layer.session.state_dir;
        }
        if let Some(secs) = layer.session.sweep_interval_secs {
            self.session.sweep_interval_secs = secs;
        }
        if let Some(level) = layer.logging.level {
            self.logging.level = level;
        }
    }

    /// Resolved state directory, expanding a leading `~/`
    pub fn state_dir(&self) -> Option<PathBuf> {
        match &self.session.state_dir {
            Some(dir) => Some(expand_home(dir)),
            None => crate::session::storage::FileStorage::default_dir(),
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: "Must not be empty".to_string(),
            });
        } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if self.api.upload_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.upload_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.sweep_interval_secs == 0 {
            errors.push(ValidationError {
                field: "session.sweep_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(ValidationError {
                field: "logging.level".to_string(),
                message: format!(
                    "Unknown level '{}', expected one of: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
