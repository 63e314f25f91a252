//! atags Indexer
//!
//! This crate provides the indexing engine for atags, including:
//! - File listing from `gtags.files` or a gitignore-aware walk
//! - Change detection with stable file ids across incremental runs
//! - Reference extraction through tree-sitter tokenizers on a worker pool
//! - Definition extraction through a long-lived `ctags` filter process
//! - A SQLite tag store with definition and reference queries

mod error;

pub mod builder;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod extract;
pub mod pool;
pub mod records;
pub mod scanner;
pub mod storage;
pub mod tokenizer;

pub use builder::{
    BuildOptions, Diagnostics, IndexBuilder, RunReport, SkippedFile, Stage, StageTimings,
    TracingDiagnostics,
};
pub use cancel::Cancellation;
pub use catalog::{CatalogDiff, FileCatalog, IndexMode};
pub use config::{IndexConfig, DB_FILE_NAME};
pub use error::IndexerError;
pub use extract::{
    CtagsProvider, DefinitionProvider, DefinitionSource, ReferenceExtractor, TERMINATOR,
};
pub use pool::{ExtractOutcome, FileReferences, WorkerPool, DEFAULT_JOBS};
pub use records::{
    DefinitionHit, DefinitionRecord, FileId, FileRecord, FileSymbol, FileTask, FileToken,
    ReferenceHit, ReferenceRecord,
};
pub use scanner::{FileLister, Language, LanguageMap, Listing, ListingSource};
pub use storage::{Snapshot, StoreStats, TagStore};
pub use tokenizer::{SyntaxBackend, Token, TokenKind, Tokenizer, TokenizerBackend};
