//! CLI argument definitions for the lemsearch binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lemsearch - semantic lookup over an English lexeme index.
#[derive(Parser, Debug)]
#[command(name = "lemsearch", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Directory holding model.onnx and tokenizer.json.
    #[arg(short = 'm', long = "model-dir", global = true)]
    pub model_dir: Option<PathBuf>,

    /// Use deterministic hash embeddings instead of the ONNX model.
    #[arg(long = "mock-embedder", global = true)]
    pub mock_embedder: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reduce a line-delimited lexeme dump to the corpus the vectorizer reads.
    Simplify {
        /// Lexeme dump (one JSON object per line).
        input: PathBuf,
        /// Simplified corpus output (JSON array).
        output: PathBuf,
        /// Language code whose lemmas are kept.
        #[arg(long, default_value = "en")]
        language: String,
    },

    /// Embed every eligible corpus entry and write the index file.
    Vectorize {
        /// Corpus input. Defaults to `vectorize.input`.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Index output. Defaults to `vectorize.output`.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write raw model output instead of unit-length vectors.
        #[arg(long)]
        raw: bool,
    },

    /// Print the normalized embedding of one text as comma-separated floats.
    Embed {
        /// Text to embed. Read from stdin when omitted.
        text: Option<String>,
    },

    /// Decode an index file and report what it holds.
    Inspect {
        /// Index file. Defaults to `vectorize.output`.
        index: Option<PathBuf>,
        /// Expected vector dimension. Defaults to `model.embedding_dim`.
        #[arg(long)]
        dim: Option<usize>,
        /// Number of records to print.
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },

    /// Start the matching engine and run an interactive query console.
    Query {
        /// Engine executable. Defaults to `engine.command`.
        #[arg(short, long)]
        engine: Option<PathBuf>,
        /// Arguments passed to the engine, after `--`.
        #[arg(last = true)]
        engine_args: Vec<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LEMSEARCH_CONFIG env var > ~/.lemsearch/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LEMSEARCH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the model directory.
    ///
    /// Priority: --model-dir flag > LEMSEARCH_MODEL env var > config file value.
    pub fn resolve_model_dir(&self, config_dir: &str) -> PathBuf {
        if let Some(ref p) = self.model_dir {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LEMSEARCH_MODEL") {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        PathBuf::from(config_dir)
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".lemsearch").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".lemsearch").join("config.toml");
    }
    PathBuf::from("config.toml")
}
