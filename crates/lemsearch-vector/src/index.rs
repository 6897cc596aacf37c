//! Reading index files back into records.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use tracing::{info, warn};

use lemsearch_core::error::Result;
use lemsearch_core::types::IndexRecord;

use crate::codec;

/// Iterates the records of an index file.
///
/// Yields `(line_number, record)` pairs, 1-based. A malformed line yields an
/// error for that line only; iteration continues with the next line. Blank
/// lines are skipped. A read failure on the underlying stream is yielded
/// once and ends iteration.
pub struct IndexReader<R> {
    lines: Lines<R>,
    line_no: usize,
    expected_dim: Option<usize>,
    failed: bool,
}

impl<R: BufRead> IndexReader<R> {
    pub fn new(reader: R, expected_dim: Option<usize>) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            expected_dim,
            failed: false,
        }
    }
}

impl IndexReader<BufReader<File>> {
    pub fn open(path: &Path, expected_dim: Option<usize>) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?), expected_dim))
    }
}

impl<R: BufRead> Iterator for IndexReader<R> {
    type Item = (usize, Result<IndexRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some((
                        self.line_no,
                        codec::decode_index_record(&line, self.expected_dim),
                    ))
                }
                Err(e) => {
                    self.failed = true;
                    return Some((self.line_no, Err(e.into())));
                }
            }
        }
    }
}

/// Records from an index file, with the lines that were rejected.
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub records: Vec<IndexRecord>,
    /// `(line_number, reason)` for every rejected line.
    pub rejected: Vec<(usize, String)>,
}

impl LoadedIndex {
    /// Dimension shared by the loaded records, if any were loaded.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.len())
    }
}

/// Load every well-formed record, skipping and logging malformed lines.
///
/// Only record-local failures are skipped; read failures are returned.
pub fn load_index<R: BufRead>(reader: R, expected_dim: Option<usize>) -> Result<LoadedIndex> {
    let mut loaded = LoadedIndex::default();
    for (line_no, record) in IndexReader::new(reader, expected_dim) {
        match record {
            Ok(record) => loaded.records.push(record),
            Err(e) if e.is_record_local() => {
                warn!(line = line_no, error = %e, "Rejected index line");
                loaded.rejected.push((line_no, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    info!(
        records = loaded.records.len(),
        rejected = loaded.rejected.len(),
        "Index loaded"
    );
    Ok(loaded)
}

/// [`load_index`] from a file path.
pub fn load_index_file(path: &Path, expected_dim: Option<usize>) -> Result<LoadedIndex> {
    load_index(BufReader::new(File::open(path)?), expected_dim)
}
