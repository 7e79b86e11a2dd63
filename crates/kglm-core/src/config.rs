//! KGLM Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{EncodingMode, DEFAULT_MAX_PARENTS};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KglmConfig {
    /// Annotation encoding and batching
    pub data: DataConfig,

    /// Scorer and encoder dimensions
    pub model: ModelConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl KglmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Data
        if let Ok(mode) = std::env::var("KGLM_MODE") {
            config.data.mode = mode.parse()?;
        }
        if let Ok(max_parents) = std::env::var("KGLM_MAX_PARENTS") {
            config.data.max_parents = parse_env("KGLM_MAX_PARENTS", max_parents)?;
        }
        if let Ok(path) = std::env::var("KGLM_ALIAS_DB") {
            config.data.alias_database_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("KGLM_KNOWLEDGE_GRAPH") {
            config.data.knowledge_graph_path = Some(PathBuf::from(path));
        }

        // Model
        if let Ok(cutoff) = std::env::var("KGLM_CUTOFF") {
            config.model.cutoff = parse_env("KGLM_CUTOFF", cutoff)?;
        }
        if let Ok(mode) = std::env::var("KGLM_NEW_ENTITY_MODE") {
            config.model.new_entity_mode = mode.parse()?;
        }

        // Logging
        if let Ok(level) = std::env::var("KGLM_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let data_defaults = DataConfig::default();
        let model_defaults = ModelConfig::default();

        // Only override if env values differ from defaults
        if env_config.data.mode != data_defaults.mode {
            self.data.mode = env_config.data.mode;
        }
        if env_config.data.max_parents != data_defaults.max_parents {
            self.data.max_parents = env_config.data.max_parents;
        }
        if env_config.data.alias_database_path.is_some() {
            self.data.alias_database_path = env_config.data.alias_database_path;
        }
        if env_config.data.knowledge_graph_path.is_some() {
            self.data.knowledge_graph_path = env_config.data.knowledge_graph_path;
        }
        if env_config.model.cutoff != model_defaults.cutoff {
            self.model.cutoff = env_config.model.cutoff;
        }
        if env_config.model.new_entity_mode != model_defaults.new_entity_mode {
            self.model.new_entity_mode = env_config.model.new_entity_mode;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }

        Ok(self)
    }

    /// Reject values the encoder or scorer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.max_parents == 0 {
            return Err(invalid("data.max_parents", self.data.max_parents));
        }
        if self.data.batch_size == 0 {
            return Err(invalid("data.batch_size", self.data.batch_size));
        }
        if self.data.chunk_length == 0 {
            return Err(invalid("data.chunk_length", self.data.chunk_length));
        }
        if self.model.cutoff == 0 {
            return Err(invalid("model.cutoff", self.model.cutoff));
        }
        if self.model.token_dim == 0 {
            return Err(invalid("model.token_dim", self.model.token_dim));
        }
        if self.model.entity_dim == 0 {
            return Err(invalid("model.entity_dim", self.model.entity_dim));
        }
        for (key, value) in [("model.alpha", self.model.alpha), ("model.beta", self.model.beta)] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, value));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Annotation encoding and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Label alignment (generative or discriminative)
    pub mode: EncodingMode,

    /// Maximum parents kept per derived mention
    pub max_parents: usize,

    /// Alias database (JSON)
    pub alias_database_path: Option<PathBuf>,

    /// Knowledge graph edges (JSON lines)
    pub knowledge_graph_path: Option<PathBuf>,

    /// Number of batch slots
    pub batch_size: usize,

    /// Tokens per chunk when splitting documents across calls
    pub chunk_length: usize,
}

impl DataConfig {
    /// Alias database path; every encoding mode needs one
    pub fn require_alias_database(&self) -> Result<&Path, ConfigError> {
        self.alias_database_path
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("data.alias_database_path".to_string()))
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            mode: EncodingMode::Generative,
            max_parents: DEFAULT_MAX_PARENTS,
            alias_database_path: None,
            knowledge_graph_path: None,
            batch_size: 4,
            chunk_length: 70,
        }
    }
}

/// Scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Candidate set used for new-entity prediction
    pub new_entity_mode: NewEntityMode,

    /// Recent entities kept per batch slot
    pub cutoff: usize,

    /// Width of the token sub-vector
    pub token_dim: usize,

    /// Width of the head and relation sub-vectors (and entity embeddings)
    pub entity_dim: usize,

    /// Activation regularization weight
    pub alpha: f32,

    /// Temporal activation regularization weight
    pub beta: f32,

    /// Seed for deterministic parameter initialisation
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            new_entity_mode: NewEntityMode::Shortlist,
            cutoff: 30,
            token_dim: 32,
            entity_dim: 16,
            alpha: 0.0,
            beta: 0.0,
            seed: 13,
        }
    }
}

/// Candidate set for new-entity prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewEntityMode {
    /// Score against the entities seen so far in the document
    #[default]
    Shortlist,
    /// Score against the full entity vocabulary
    FullVocab,
}

impl std::str::FromStr for NewEntityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shortlist" => Ok(Self::Shortlist),
            "full_vocab" | "full-vocab" | "fullvocab" => Ok(Self::FullVocab),
            _ => Err(ConfigError::InvalidValue {
                key: "KGLM_NEW_ENTITY_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KglmConfig::default();
        assert_eq!(config.data.max_parents, 10);
        assert_eq!(config.model.cutoff, 30);
        assert_eq!(config.model.alpha, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_entity_mode_parse() {
        assert_eq!(
            "shortlist".parse::<NewEntityMode>().unwrap(),
            NewEntityMode::Shortlist
        );
        assert_eq!(
            "full_vocab".parse::<NewEntityMode>().unwrap(),
            NewEntityMode::FullVocab
        );
        assert!("dense".parse::<NewEntityMode>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kglm.toml");
        std::fs::write(
            &path,
            concat!(
                "[data]\nmode = \"discriminative\"\n\n",
                "[model]\nnew_entity_mode = \"full_vocab\"\ncutoff = 5\n",
            ),
        )
        .unwrap();

        let config = KglmConfig::from_file(&path).unwrap();
        assert_eq!(config.data.mode, EncodingMode::Discriminative);
        assert_eq!(config.data.max_parents, DEFAULT_MAX_PARENTS);
        assert_eq!(config.model.new_entity_mode, NewEntityMode::FullVocab);
        assert_eq!(config.model.cutoff, 5);
    }

    #[test]
    fn test_alias_database_is_required() {
        let mut config = KglmConfig::default();
        let err = config.data.require_alias_database().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired(ref key) if key == "data.alias_database_path"
        ));

        config.data.alias_database_path = Some(PathBuf::from("aliases.json"));
        assert_eq!(
            config.data.require_alias_database().unwrap(),
            Path::new("aliases.json")
        );
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = KglmConfig::from_file("/nonexistent/kglm.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_parents() {
        let mut config = KglmConfig::default();
        config.data.max_parents = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_regularization() {
        let mut config = KglmConfig::default();
        config.model.beta = -1.0;
        assert!(config.validate().is_err());
    }
}
