//! Records stored in and returned by the tag store.

use serde::{Deserialize, Serialize};

/// Stable integer identity of an indexed path.
pub type FileId = i64;

/// A catalogued file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path as listed, relative to the index root
    pub path: String,
    /// Modification time (Unix seconds)
    pub mtime: i64,
    /// Join key shared by references and definitions
    pub file_id: FileId,
    /// The path no longer exists on disk
    pub deleted: bool,
}

/// One occurrence of an identifier-like token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub symbol: String,
    /// 1-based line number
    pub line: u32,
    pub file_id: FileId,
}

/// A definition site with its human-readable context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub symbol: String,
    pub file_id: FileId,
    pub line: u32,
    pub signature: String,
}

/// A file queued for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    /// Path as listed (sent verbatim to the definition process)
    pub path: String,
    pub file_id: FileId,
}

impl FileTask {
    pub fn new(path: impl Into<String>, file_id: FileId) -> Self {
        Self {
            path: path.into(),
            file_id,
        }
    }
}

/// Result row of a definition lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionHit {
    pub path: String,
    pub line: u32,
    pub signature: String,
}

/// Result row of a reference lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceHit {
    pub path: String,
    pub line: u32,
}

/// A definition inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSymbol {
    pub symbol: String,
    pub line: u32,
    pub signature: String,
}

/// A reference inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToken {
    pub symbol: String,
    pub line: u32,
}
