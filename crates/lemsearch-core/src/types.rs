use serde::{Deserialize, Serialize};

// =============================================================================
// Corpus
// =============================================================================

/// Language code of the entries that get indexed.
pub const INDEXED_LANGUAGE: &str = "en";

/// One simplified lexeme from the corpus.
///
/// Missing fields deserialize to empty values and unknown fields are
/// ignored, so partially populated corpora still stream through.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalEntry {
    /// Opaque identifier, e.g. `L314`.
    pub id: String,
    /// ISO language code.
    pub language: String,
    /// Display form.
    pub lemma: String,
    /// Inflected forms.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<String>,
    /// Glosses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub senses: Vec<String>,
    /// The text that gets embedded.
    pub combined_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl LexicalEntry {
    /// English entries with something to embed.
    pub fn is_eligible(&self) -> bool {
        self.language.eq_ignore_ascii_case(INDEXED_LANGUAGE) && !self.combined_text.is_empty()
    }
}

/// A persisted `(id, lemma, embedding)` triple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub lemma: String,
    pub embedding: Vec<f32>,
}

// =============================================================================
// Engine protocol
// =============================================================================

/// The line sent to the engine for each query.
///
/// `embedding` is the comma-joined 6-decimal rendering of the normalized
/// query vector, carried as a single JSON string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub input_text: String,
    pub embedding: String,
}

impl QueryEnvelope {
    /// Render as a single JSON line without the trailing newline.
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Lifecycle of an engine session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Engine spawned, startup banner not yet consumed.
    Initializing,
    /// Accepting queries.
    Ready,
    /// Engine exited before finishing startup.
    Failed,
    /// Session ended; no further queries.
    Closed,
}

impl SessionState {
    /// Whether the session has ended for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}
