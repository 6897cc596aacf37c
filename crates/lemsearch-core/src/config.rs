use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LemError, Result};

/// Top-level configuration for lemsearch.
///
/// Loaded from `~/.lemsearch/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LemConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub vectorize: VectorizeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LemConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LemConfig = toml::from_str(&content)?;
        config.engine.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LemError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Expected embedding dimension.
    pub embedding_dim: usize,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: "./model/sentence-bert/all-MiniLM-L6-v2".to_string(),
            embedding_dim: 384,
            intra_threads: 1,
        }
    }
}

/// Corpus vectorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeConfig {
    /// Simplified lexeme JSON array to read.
    pub input: String,
    /// Index file to write.
    pub output: String,
    /// L2-normalize corpus vectors before writing them.
    pub normalize: bool,
    /// Log a progress line every this many written records.
    pub progress_every: usize,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            input: "./data/simplified_lexemes.json".to_string(),
            output: "./data/lexeme_vectors.txt".to_string(),
            normalize: true,
            progress_every: 100,
        }
    }
}

/// External matching engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable.
    pub command: String,
    /// Arguments passed to the engine.
    pub args: Vec<String>,
    /// Working directory for the engine process. Empty means inherit.
    pub working_dir: String,
    /// Line that ends the startup banner (exact match after trimming).
    pub init_sentinel: String,
    /// Marker that ends a query response (substring match).
    pub end_sentinel: String,
    /// Bound on the startup banner, in seconds. 0 waits indefinitely.
    pub init_timeout_secs: u64,
    /// Bound on each response line, in seconds. 0 waits indefinitely.
    pub response_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "./lemdebug".to_string(),
            args: Vec::new(),
            working_dir: String::new(),
            init_sentinel: "###INITEND###".to_string(),
            end_sentinel: "###END###".to_string(),
            init_timeout_secs: 600,
            response_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Reject settings that would desynchronize the engine protocol.
    ///
    /// An empty end sentinel matches every response line and an empty init
    /// sentinel matches the first blank banner line.
    pub fn validate(&self) -> Result<()> {
        if self.init_sentinel.trim().is_empty() {
            return Err(LemError::Config(
                "engine.init_sentinel must not be empty".to_string(),
            ));
        }
        if self.end_sentinel.is_empty() {
            return Err(LemError::Config(
                "engine.end_sentinel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
