//! Reference extraction through a tokenizer backend.

use crate::records::{FileId, ReferenceRecord};
use crate::scanner::{canonical_language_name, LanguageMap};
use crate::tokenizer::{Token, TokenKind, Tokenizer, TokenizerBackend};
use crate::IndexerError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Names shorter than this are treated as noise (loop variables and such).
pub const MIN_SYMBOL_LEN: usize = 3;

/// Byte offsets at which each line starts, plus a sentinel.
///
/// `starts[i]` is the offset just past the `i`-th newline; the last entry is
/// the content length. An offset `k` lies on line `n + 1` where `n` is the
/// number of entries `<= k`, i.e. the number of newlines before `k`.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts: Vec<usize> = text
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i + 1)
            .collect();
        starts.push(text.len());
        Self { starts }
    }

    /// Forward-only cursor over this index.
    pub fn cursor(&self) -> LineCursor<'_> {
        LineCursor {
            starts: &self.starts,
            passed: 0,
        }
    }
}

/// Converts non-decreasing offsets into 1-based line numbers without
/// rescanning from the start.
#[derive(Debug)]
pub struct LineCursor<'a> {
    starts: &'a [usize],
    passed: usize,
}

impl LineCursor<'_> {
    pub fn line_at(&mut self, offset: usize) -> u32 {
        while self.passed < self.starts.len() && self.starts[self.passed] <= offset {
            self.passed += 1;
        }
        (self.passed + 1) as u32
    }
}

/// Turn a token stream into reference records.
pub fn references_from_tokens(text: &str, tokens: &[Token], file_id: FileId) -> Vec<ReferenceRecord> {
    let index = LineIndex::new(text);
    let mut cursor = index.cursor();
    let mut references = Vec::new();

    for token in tokens.iter().filter(|t| t.kind == TokenKind::Name) {
        let line = cursor.line_at(token.offset);

        if token.text.trim().is_empty() {
            continue;
        }
        if token.text.chars().count() < MIN_SYMBOL_LEN {
            continue;
        }

        references.push(ReferenceRecord {
            symbol: token.text.clone(),
            line,
            file_id,
        });
    }

    references
}

/// Decode bytes one byte per char (Latin-1), which never fails.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Extracts `(symbol, line, fileId)` references from one file.
pub struct ReferenceExtractor {
    root: PathBuf,
    languages: LanguageMap,
    backend: Arc<dyn TokenizerBackend>,
}

impl ReferenceExtractor {
    /// Create an extractor resolving listed paths against `root`.
    pub fn new(root: &Path, languages: LanguageMap, backend: Arc<dyn TokenizerBackend>) -> Self {
        Self {
            root: root.to_path_buf(),
            languages,
            backend,
        }
    }

    /// Tokenizer for `path`: the language map wins over extension lookup.
    pub fn resolve(&self, path: &Path) -> Option<Arc<dyn Tokenizer>> {
        match self.languages.language_for(path) {
            Some(language) => self.backend.by_name(&canonical_language_name(language)),
            None => self.backend.for_filename(path),
        }
    }

    /// Extract references, reporting why a file could not be processed.
    ///
    /// `Ok(None)` means no tokenizer handles the file.
    pub fn try_extract(
        &self,
        path: &str,
        file_id: FileId,
    ) -> Result<Option<Vec<ReferenceRecord>>, IndexerError> {
        let Some(tokenizer) = self.resolve(Path::new(path)) else {
            return Ok(None);
        };

        let full_path = self.root.join(path);
        let bytes = std::fs::read(&full_path)?;
        let text = decode_latin1(&bytes);

        let tokens = tokenizer
            .tokenize(&text)
            .map_err(|e| IndexerError::Tokenize {
                path: full_path.clone(),
                message: e.to_string(),
            })?;

        let references = references_from_tokens(&text, &tokens, file_id);

        debug!(
            path,
            file_id,
            tokenizer = tokenizer.name(),
            references = references.len(),
            "Extracted references"
        );

        Ok(Some(references))
    }

    /// Extract references; failures are logged and yield nothing.
    pub fn extract(&self, path: &str, file_id: FileId) -> Vec<ReferenceRecord> {
        match self.try_extract(path, file_id) {
            Ok(references) => references.unwrap_or_default(),
            Err(e) => {
                warn!(path, error = %e, "Reference extraction failed");
                Vec::new()
            }
        }
    }
}
