//! JSON lines document reader
//!
//! Each non-blank line holds one [`Document`]:
//! `{"tokens": [[...], ...], "annotations": [{"id", "parent_id", "relation", "span"}]}`

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use kglm_core::{Document, KglmError, Result};

/// Streaming reader over a JSON lines file
pub struct DocumentReader<R: BufRead> {
    lines: Lines<R>,
    line_number: usize,
}

impl DocumentReader<BufReader<File>> {
    /// Open a JSON lines file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> DocumentReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for DocumentReader<R> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|e| {
                KglmError::Data(format!("line {}: {e}", self.line_number))
            }));
        }
    }
}

/// Read every document of a JSON lines file
pub fn read_documents(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let documents = DocumentReader::open(path)?.collect::<Result<Vec<_>>>()?;
    tracing::info!("Read {} documents from {}", documents.len(), path.display());
    Ok(documents)
}
