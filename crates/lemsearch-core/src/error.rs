use thiserror::Error;

/// Top-level error type for lemsearch.
///
/// Decode failures (`Format`, `Dimension`) are local to a single record and
/// callers may skip the record and continue. `ChildProcess` and `Timeout`
/// are terminal for an engine session. `Embedder` wraps any failure reported
/// by the embedding backend without decomposing it further.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LemError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Embedder error: {0}")]
    Embedder(String),

    #[error("Engine process error: {0}")]
    ChildProcess(String),

    #[error("Engine did not respond within {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LemError {
    /// Whether this error ends an engine session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            LemError::ChildProcess(_) | LemError::Timeout { .. } | LemError::Io(_)
        )
    }

    /// Whether this error only invalidates a single decoded record.
    pub fn is_record_local(&self) -> bool {
        matches!(self, LemError::Format(_) | LemError::Dimension { .. })
    }
}

impl From<toml::de::Error> for LemError {
    fn from(err: toml::de::Error) -> Self {
        LemError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LemError {
    fn from(err: toml::ser::Error) -> Self {
        LemError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LemError {
    fn from(err: serde_json::Error) -> Self {
        LemError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for lemsearch operations.
pub type Result<T> = std::result::Result<T, LemError>;
