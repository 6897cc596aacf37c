//! lemsearch vector crate - codec, embedding services, corpus vectorizer and
//! index reader.
//!
//! Provides the fixed-precision vector encodings shared by the index file
//! and the engine protocol, an embedding service trait with ONNX and mock
//! backends, the streaming corpus vectorizer, and the lexeme dump
//! simplifier that prepares its input.

pub mod codec;
pub mod corpus;
pub mod embedding;
pub mod index;

pub use corpus::{CorpusVectorizer, EntryStream, VectorizeOptions, VectorizeSummary};
pub use embedding::{EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{load_index, load_index_file, IndexReader, LoadedIndex};
