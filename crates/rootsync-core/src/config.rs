use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ModuleKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for rootsync
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RootSyncConfig {
    /// Managed library naming
    #[serde(default)]
    pub library: LibraryConfig,

    /// Which modules and artifacts take part
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Scheduling of reconciliation passes
    #[serde(default)]
    pub gate: GateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the managed library is told apart from user libraries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LibraryNamePolicy {
    /// Any library whose name starts with the prefix; tolerates generated suffixes.
    /// The first match wins when several libraries qualify.
    #[default]
    Prefix,
    /// Only a library named exactly like the prefix.
    Exact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Name given to the managed library and used to find it again
    #[serde(default = "default_library_name")]
    pub name: String,

    #[serde(default)]
    pub name_policy: LibraryNamePolicy,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            name: default_library_name(),
            name_policy: LibraryNamePolicy::default(),
        }
    }
}

impl LibraryConfig {
    pub fn matches(&self, library_name: &str) -> bool {
        match self.name_policy {
            LibraryNamePolicy::Prefix => library_name.starts_with(&self.name),
            LibraryNamePolicy::Exact => library_name == self.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerConfig {
    /// Module kinds that participate in reconciliation
    #[serde(default = "default_applicable_kinds")]
    pub applicable_kinds: Vec<ModuleKind>,

    /// Entry-name suffixes that mark an artifact as carrying metadata
    #[serde(default = "default_metadata_markers")]
    pub metadata_markers: Vec<String>,

    /// How deep the filesystem inspector looks inside directory artifacts
    #[serde(default = "default_max_scan_depth")]
    pub max_scan_depth: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            applicable_kinds: default_applicable_kinds(),
            metadata_markers: default_metadata_markers(),
            max_scan_depth: default_max_scan_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateConfig {
    /// Quiet period after a notification before a pass starts (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Retry of failed asynchronous passes
    #[serde(default)]
    pub retry: BackoffConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retry: BackoffConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Follow-up attempts after a failed pass (default: 0, no retry)
    #[serde(default)]
    pub max_retries: u32,

    /// Initial backoff duration (default: 500ms)
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (default: 30s)
    #[serde(default = "default_backoff_max_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_backoff_initial_ms(),
            max_backoff_ms: default_backoff_max_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = (self.initial_backoff_ms as f64) * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
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

// Default value functions
fn default_library_name() -> String {
    "<JavaScript metadata library>".to_string()
}
fn default_applicable_kinds() -> Vec<ModuleKind> {
    vec![ModuleKind::Java]
}
fn default_metadata_markers() -> Vec<String> {
    vec![".meta.js".to_string()]
}
fn default_max_scan_depth() -> usize {
    4
}
fn default_debounce_ms() -> u64 {
    30
}
fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: RootSyncConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.rootsync.toml, then ~/.rootsync/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();
        let (config, config_path) = Self::load_config_file()?;
        Self::finish(config, config_path)
    }

    /// Load from an explicit file; environment overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_dotenv();
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    fn finish(config: RootSyncConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Loaded rootsync config from {}", path.display()),
            None => info!("No rootsync config file found, using defaults"),
        }
        debug!(
            "library name {:?} ({:?}), debounce {}ms",
            config.library.name, config.library.name_policy, config.gate.debounce_ms
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    fn load_config_file() -> Result<(RootSyncConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".rootsync.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".rootsync").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((RootSyncConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<RootSyncConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: RootSyncConfig) -> RootSyncConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply `ROOTSYNC_*` overrides from any key lookup.
    pub fn apply_overrides<F>(mut config: RootSyncConfig, lookup: F) -> RootSyncConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("ROOTSYNC_LIBRARY_NAME") {
            config.library.name = name;
        }
        if let Some(policy) = lookup("ROOTSYNC_LIBRARY_NAME_POLICY") {
            match policy.to_lowercase().as_str() {
                "prefix" => config.library.name_policy = LibraryNamePolicy::Prefix,
                "exact" => config.library.name_policy = LibraryNamePolicy::Exact,
                other => warn!("Ignoring unknown ROOTSYNC_LIBRARY_NAME_POLICY {:?}", other),
            }
        }
        if let Some(kinds) = lookup("ROOTSYNC_APPLICABLE_KINDS") {
            config.scanner.applicable_kinds = kinds
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| ModuleKind::from(k.to_string()))
                .collect();
        }
        if let Some(debounce) = lookup("ROOTSYNC_DEBOUNCE_MS") {
            if let Ok(ms) = debounce.parse() {
                config.gate.debounce_ms = ms;
            }
        }
        if let Some(retries) = lookup("ROOTSYNC_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                config.gate.retry.max_retries = n;
            }
        }
        if let Some(level) = lookup("ROOTSYNC_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            config.logging.level = level;
        }
        if let Some(format) = lookup("ROOTSYNC_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    pub fn validate_config(config: &RootSyncConfig) -> Result<(), ConfigError> {
        if config.library.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "library.name must not be empty".to_string(),
            ));
        }

        if config.scanner.applicable_kinds.is_empty() {
            return Err(ConfigError::ValidationError(
                "scanner.applicable_kinds must list at least one module kind".to_string(),
            ));
        }

        if config.scanner.metadata_markers.iter().any(|m| m.is_empty()) {
            return Err(ConfigError::ValidationError(
                "scanner.metadata_markers must not contain empty markers".to_string(),
            ));
        }

        if config.gate.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "gate.retry.multiplier must be >= 1.0, got {}",
                config.gate.retry.multiplier
            )));
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &RootSyncConfig {
        &self.config
    }

    pub fn into_config(self) -> RootSyncConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = RootSyncConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
