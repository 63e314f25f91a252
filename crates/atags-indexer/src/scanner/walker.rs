//! File system walker with gitignore support.

use crate::IndexerError;
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

/// A discovered file entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the walk root
    pub path: String,
    /// Last modified time (Unix timestamp)
    pub mtime: i64,
}

/// File system walker that respects .gitignore rules.
pub struct Walker {
    root: PathBuf,
    follow_symlinks: bool,
}

impl Walker {
    /// Create a new walker for the given root directory.
    pub fn new(root: &Path, follow_symlinks: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            follow_symlinks,
        }
    }

    /// Walk the directory tree and return all discovered files.
    pub fn walk(&self) -> Result<Vec<FileEntry>, IndexerError> {
        if !self.root.is_dir() {
            return Err(IndexerError::NotFound(self.root.clone()));
        }

        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .follow_links(self.follow_symlinks)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .parents(true)
            .build_parallel();

        walker.run(|| {
            let tx = tx.clone();
            let root = self.root.clone();
            Box::new(move |result| {
                match result {
                    Ok(entry) => {
                        if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                            if let Ok(metadata) = entry.metadata() {
                                let relative = entry
                                    .path()
                                    .strip_prefix(&root)
                                    .unwrap_or(entry.path())
                                    .to_string_lossy()
                                    .to_string();

                                let _ = tx.send(FileEntry {
                                    path: relative,
                                    mtime: modified_secs(&metadata),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        // A single unreadable directory must not fail the walk
                        debug!(error = %e, "Walk error");
                    }
                }
                WalkState::Continue
            })
        });

        drop(tx);

        let mut entries: Vec<FileEntry> = rx.into_iter().collect();

        // Sort by path for deterministic ordering
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(entries)
    }
}

/// Modification time of `metadata` in Unix seconds, 0 when unavailable.
pub fn modified_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
