//! Corpus streaming, lexeme simplification and the corpus vectorizer.
//!
//! Corpora can be far larger than memory, so the top-level JSON array is
//! parsed one element at a time and every index record is flushed as soon
//! as it is written.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use lemsearch_core::error::{LemError, Result};
use lemsearch_core::lexeme::RawLexeme;
use lemsearch_core::types::LexicalEntry;

use crate::codec;
use crate::embedding::EmbeddingService;

// ---------------------------------------------------------------------------
// EntryStream - lazy element-by-element reader for a top-level JSON array
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayPosition {
    BeforeOpen,
    AfterItem,
    Done,
}

/// Lazily yields the elements of a top-level JSON array of [`LexicalEntry`].
///
/// Only the element being decoded is held in memory. An element that is
/// valid JSON but not a valid entry yields an error and the stream moves
/// on; malformed JSON or I/O failure ends the stream.
pub struct EntryStream<R> {
    reader: R,
    position: ArrayPosition,
    ordinal: usize,
}

impl<R: BufRead> EntryStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: ArrayPosition::BeforeOpen,
            ordinal: 0,
        }
    }

    /// Number of elements decoded so far.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    /// Skip whitespace, then consume and return the next byte.
    fn next_token(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek_byte()? {
                Some(b) if b.is_ascii_whitespace() => self.reader.consume(1),
                Some(b) => {
                    self.reader.consume(1);
                    return Ok(Some(b));
                }
                None => return Ok(None),
            }
        }
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek_byte()? {
                Some(b) if b.is_ascii_whitespace() => self.reader.consume(1),
                other => return Ok(other),
            }
        }
    }

    /// Decode the next element. The outer error means the stream position is
    /// lost; the inner one only rejects this element.
    fn read_item(&mut self) -> Result<Result<LexicalEntry>> {
        let index = self.ordinal;
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let value = serde_json::Value::deserialize(&mut de).map_err(|e| {
            if e.is_io() {
                LemError::Io(e.into())
            } else {
                LemError::Format(format!("corpus item {}: {}", index, e))
            }
        })?;
        self.ordinal += 1;
        Ok(serde_json::from_value::<LexicalEntry>(value)
            .map_err(|e| LemError::Format(format!("corpus item {}: {}", index, e))))
    }

    fn advance(&mut self) -> Result<Option<Result<LexicalEntry>>> {
        match self.position {
            ArrayPosition::Done => Ok(None),
            ArrayPosition::BeforeOpen => {
                match self.next_token()? {
                    Some(b'[') => {}
                    Some(b) => {
                        return Err(LemError::Format(format!(
                            "expected a top-level JSON array, found {:?}",
                            b as char
                        )))
                    }
                    None => {
                        return Err(LemError::Format(
                            "expected a top-level JSON array, found end of input".to_string(),
                        ))
                    }
                }
                if self.skip_whitespace()? == Some(b']') {
                    self.reader.consume(1);
                    self.position = ArrayPosition::Done;
                    return Ok(None);
                }
                let item = self.read_item()?;
                self.position = ArrayPosition::AfterItem;
                Ok(Some(item))
            }
            ArrayPosition::AfterItem => match self.next_token()? {
                Some(b',') => self.read_item().map(Some),
                Some(b']') => {
                    self.position = ArrayPosition::Done;
                    Ok(None)
                }
                Some(b) => Err(LemError::Format(format!(
                    "expected ',' or ']' after corpus item {}, found {:?}",
                    self.ordinal.saturating_sub(1),
                    b as char
                ))),
                None => Err(LemError::Format(format!(
                    "unterminated corpus array after {} items",
                    self.ordinal
                ))),
            },
        }
    }

    /// Whether the stream has ended, either at `]` or after an error it
    /// cannot recover from.
    pub fn is_finished(&self) -> bool {
        self.position == ArrayPosition::Done
    }
}

impl<R: BufRead> Iterator for EntryStream<R> {
    type Item = Result<LexicalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(item),
            Ok(None) => None,
            Err(e) => {
                self.position = ArrayPosition::Done;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CorpusVectorizer
// ---------------------------------------------------------------------------

/// Tunables for a vectorization run.
#[derive(Debug, Clone)]
pub struct VectorizeOptions {
    /// L2-normalize each vector before it is written.
    pub normalize: bool,
    /// Log progress every this many written records. 0 disables.
    pub progress_every: usize,
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            progress_every: 100,
        }
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorizeSummary {
    /// Entries read from the corpus.
    pub seen: usize,
    /// Index records written.
    pub written: usize,
    /// Entries filtered out (wrong language or nothing to embed).
    pub skipped: usize,
    /// Entries dropped as malformed or with a wrong-sized embedding.
    pub rejected: usize,
}

/// Embeds every eligible corpus entry into an index file.
pub struct CorpusVectorizer<E: EmbeddingService> {
    embedder: E,
    options: VectorizeOptions,
}

impl<E: EmbeddingService> CorpusVectorizer<E> {
    pub fn new(embedder: E, options: VectorizeOptions) -> Self {
        Self { embedder, options }
    }

    pub fn with_defaults(embedder: E) -> Self {
        Self::new(embedder, VectorizeOptions::default())
    }

    /// Stream `input` (a JSON array of entries) into index lines on `output`.
    ///
    /// Records are written in corpus order and flushed one at a time. An
    /// entry with the wrong shape or a wrong-sized embedding is logged and
    /// rejected. Embedder, write and JSON syntax failures abort the run.
    pub async fn run<R: BufRead, W: Write>(
        &self,
        input: R,
        output: &mut W,
    ) -> Result<VectorizeSummary> {
        let mut summary = VectorizeSummary::default();
        let expected_dim = self.embedder.dimensions();

        let mut stream = EntryStream::new(input);
        while let Some(entry) = stream.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if !stream.is_finished() => {
                    warn!(error = %e, "Rejecting corpus entry");
                    summary.seen += 1;
                    summary.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            summary.seen += 1;

            if !entry.is_eligible() {
                debug!(id = %entry.id, language = %entry.language, "Skipping entry");
                summary.skipped += 1;
                continue;
            }

            let raw = self
                .embedder
                .embed(&entry.combined_text)
                .await
                .map_err(|e| match e {
                    LemError::Embedder(msg) => {
                        LemError::Embedder(format!("entry {}: {}", entry.id, msg))
                    }
                    other => other,
                })?;
            if raw.len() != expected_dim {
                warn!(
                    id = %entry.id,
                    expected_dim,
                    actual = raw.len(),
                    "Rejecting entry with wrong embedding dimension"
                );
                summary.rejected += 1;
                continue;
            }
            let embedding = if self.options.normalize {
                codec::normalize(&raw)
            } else {
                raw
            };

            writeln!(
                output,
                "{}",
                codec::encode_index_record(&entry.id, &entry.lemma, &embedding)
            )?;
            output.flush()?;
            summary.written += 1;

            if self.options.progress_every > 0 && summary.written % self.options.progress_every == 0
            {
                info!(written = summary.written, seen = summary.seen, "Vectorization progress");
            }
        }

        info!(
            seen = summary.seen,
            written = summary.written,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "Vectorization complete"
        );
        Ok(summary)
    }

    /// [`run`](Self::run) between two files. The output file is truncated.
    pub async fn run_files(&self, input: &Path, output: &Path) -> Result<VectorizeSummary> {
        info!(input = %input.display(), output = %output.display(), "Vectorizing corpus");
        let reader = BufReader::new(File::open(input)?);
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(output)?);
        self.run(reader, &mut writer).await
    }
}

// ---------------------------------------------------------------------------
// Lexeme dump simplification
// ---------------------------------------------------------------------------

/// Counters for a simplification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifySummary {
    /// Non-blank dump lines read.
    pub read: usize,
    /// Lexemes written to the output array.
    pub kept: usize,
    /// Lines that were not valid lexeme JSON.
    pub malformed: usize,
}

/// Convert a line-delimited lexeme dump into a JSON array of
/// [`LexicalEntry`] for `language`, writing elements as they are produced.
///
/// Malformed lines are logged and skipped. Lines may carry the trailing
/// comma of a pretty-printed dump.
pub fn simplify_dump<R: BufRead, W: Write>(
    input: R,
    output: &mut W,
    language: &str,
) -> Result<SimplifySummary> {
    let mut summary = SimplifySummary::default();
    output.write_all(b"[")?;

    for (line_no, line) in input.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim().trim_end_matches(',');
        if trimmed.is_empty() || trimmed == "[" || trimmed == "]" {
            continue;
        }
        summary.read += 1;

        let raw: RawLexeme = match serde_json::from_str(trimmed) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed lexeme");
                summary.malformed += 1;
                continue;
            }
        };

        if let Some(entry) = raw.simplify(language) {
            if summary.kept > 0 {
                output.write_all(b",")?;
            }
            output.write_all(b"\n")?;
            serde_json::to_writer(&mut *output, &entry)?;
            summary.kept += 1;
        }

        if summary.read % 1000 == 0 {
            info!(read = summary.read, kept = summary.kept, "Simplification progress");
        }
    }

    output.write_all(b"\n]\n")?;
    output.flush()?;
    info!(
        read = summary.read,
        kept = summary.kept,
        malformed = summary.malformed,
        "Simplification complete"
    );
    Ok(summary)
}
