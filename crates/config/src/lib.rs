//! Configuration loading, validation, and management for quillvault.
//!
//! Loads configuration from `~/.quillvault/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.quillvault/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The local model to load: a preset alias (e.g. "llama3.2:1b") or a
    /// path to a .gguf file
    #[serde(default = "default_model")]
    pub model: String,

    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Summarizer settings
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

fn default_model() -> String {
    "llama3.2:1b".into()
}

/// Queue and request-ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ledger deadline for chat, name, and tag requests, in seconds
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,

    /// Ledger deadline for summary requests, in seconds. Longer because a
    /// summary may run several sequential model calls.
    #[serde(default = "default_summary_timeout_secs")]
    pub summary_timeout_secs: u64,
}

fn default_chat_timeout_secs() -> u64 {
    60
}
fn default_summary_timeout_secs() -> u64 {
    240
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chat_timeout_secs: default_chat_timeout_secs(),
            summary_timeout_secs: default_summary_timeout_secs(),
        }
    }
}

/// Chunked-summarization limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Hard ceiling on input characters; longer inputs are truncated
    #[serde(default = "default_input_ceiling")]
    pub input_ceiling: usize,

    /// Target chunk size in characters; paragraphs are packed up to this
    #[serde(default = "default_chunk_target")]
    pub chunk_target: usize,

    /// When more than this many partial summaries exist, reduce in groups
    #[serde(default = "default_combine_threshold")]
    pub combine_threshold: usize,

    /// Group size used by the recursive reduce
    #[serde(default = "default_combine_group_size")]
    pub combine_group_size: usize,
}

fn default_input_ceiling() -> usize {
    24_000
}
fn default_chunk_target() -> usize {
    6_000
}
fn default_combine_threshold() -> usize {
    6
}
fn default_combine_group_size() -> usize {
    5
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            input_ceiling: default_input_ceiling(),
            chunk_target: default_chunk_target(),
            combine_threshold: default_combine_threshold(),
            combine_group_size: default_combine_group_size(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.quillvault/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `QUILLVAULT_MODEL` — model alias or .gguf path
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("QUILLVAULT_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quillvault")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.scheduler.chat_timeout_secs == 0 || self.scheduler.summary_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler timeouts must be at least 1 second".into(),
            ));
        }

        if self.summarizer.chunk_target == 0
            || self.summarizer.chunk_target > self.summarizer.input_ceiling
        {
            return Err(ConfigError::ValidationError(
                "chunk_target must be between 1 and input_ceiling".into(),
            ));
        }

        if self.summarizer.combine_group_size < 2 {
            return Err(ConfigError::ValidationError(
                "combine_group_size must be at least 2".into(),
            ));
        }

        if self.summarizer.combine_threshold < self.summarizer.combine_group_size {
            return Err(ConfigError::ValidationError(
                "combine_threshold must be >= combine_group_size".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            scheduler: SchedulerConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "llama3.2:1b");
        assert_eq!(config.scheduler.chat_timeout_secs, 60);
        assert_eq!(config.scheduler.summary_timeout_secs, 240);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.summarizer.input_ceiling, config.summarizer.input_ceiling);
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = AppConfig {
            scheduler: SchedulerConfig {
                chat_timeout_secs: 0,
                ..SchedulerConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_chunk_target_rejected() {
        let config = AppConfig {
            summarizer: SummarizerConfig {
                input_ceiling: 1_000,
                chunk_target: 5_000,
                ..SummarizerConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().model, "llama3.2:1b");
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "model = \"llama3.2:1b\"\n[summarizer]\ninput_ceiling = 12000"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.summarizer.input_ceiling, 12_000);
        // Unspecified fields keep their defaults
        assert_eq!(config.summarizer.chunk_target, 6_000);
        assert_eq!(config.scheduler.summary_timeout_secs, 240);
    }

    #[test]
    fn malformed_config_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [this is not toml").unwrap();

        let result = AppConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("llama3.2:1b"));
        assert!(toml_str.contains("input_ceiling"));
    }
}
