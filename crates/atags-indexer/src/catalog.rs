//! Change detection between a file listing and the stored catalog.

use crate::records::{FileId, FileRecord, FileTask};
use crate::scanner::modified_secs;
use crate::storage::{Snapshot, TagStore};
use crate::IndexerError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Kind of indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Rebuild everything with fresh ids
    Full,
    /// Only touch added, modified and removed files
    Incremental,
}

/// Files a run has to extract or forget.
#[derive(Debug, Clone, Default)]
pub struct CatalogDiff {
    /// Added or modified files with their new mtime
    pub changed: Vec<FileRecord>,
    /// Catalogued files that are gone from disk
    pub removed: Vec<FileRecord>,
    /// Listed files left untouched
    pub unchanged: usize,
    /// Smallest id not yet handed out after this diff
    pub next_file_id: FileId,
}

impl CatalogDiff {
    /// Extraction work in listing order.
    pub fn tasks(&self) -> Vec<FileTask> {
        self.changed
            .iter()
            .map(|file| FileTask::new(file.path.clone(), file.file_id))
            .collect()
    }

    pub fn removed_ids(&self) -> Vec<FileId> {
        self.removed.iter().map(|file| file.file_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Tracks indexed files of one root and their stable ids.
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Compare `listing` against the previous run.
    ///
    /// With no `prior` snapshot every listed file is new and ids start at 1.
    /// Listed paths that cannot be stat'ed are left out of the catalog.
    pub fn diff(&self, listing: &[String], prior: Option<&Snapshot>) -> CatalogDiff {
        let observed = self.observe(listing);
        let diff = compute_diff(&observed, prior, |path| self.root.join(path).is_file());

        info!(
            mode = if prior.is_some() { "incremental" } else { "full" },
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged,
            "Catalog diff computed"
        );

        diff
    }

    /// Persist `diff` as the new catalog, purging rows of removed files.
    pub fn persist(&self, store: &TagStore, diff: &CatalogDiff) -> Result<(), IndexerError> {
        store.apply_catalog(&diff.changed, &diff.removed_ids(), diff.next_file_id)
    }

    /// `(path, mtime)` of every listed file that exists, first listing wins.
    fn observe(&self, listing: &[String]) -> Vec<(String, i64)> {
        let mut seen = HashSet::new();
        let mut observed = Vec::with_capacity(listing.len());

        for path in listing {
            if !seen.insert(path.as_str()) {
                continue;
            }
            match std::fs::metadata(self.root.join(path)) {
                Ok(metadata) if metadata.is_file() => {
                    observed.push((path.clone(), modified_secs(&metadata)));
                }
                Ok(_) => debug!(path, "Listed path is not a file"),
                Err(e) => warn!(path, error = %e, "Listed file not readable"),
            }
        }

        observed
    }
}

/// Diff `observed` files against `prior`; `on_disk` decides whether a
/// catalogued path that is not in the listing still exists.
pub fn compute_diff<F>(observed: &[(String, i64)], prior: Option<&Snapshot>, on_disk: F) -> CatalogDiff
where
    F: Fn(&str) -> bool,
{
    let Some(prior) = prior else {
        let changed: Vec<FileRecord> = observed
            .iter()
            .zip(1..)
            .map(|((path, mtime), file_id)| FileRecord {
                path: path.clone(),
                mtime: *mtime,
                file_id,
                deleted: false,
            })
            .collect();
        let next_file_id = changed.len() as FileId + 1;
        return CatalogDiff {
            changed,
            removed: Vec::new(),
            unchanged: 0,
            next_file_id,
        };
    };

    let listed: HashSet<&str> = observed.iter().map(|(path, _)| path.as_str()).collect();

    let mut removed: Vec<FileRecord> = prior
        .entries
        .iter()
        .filter(|(path, _)| !listed.contains(path.as_str()) && !on_disk(path.as_str()))
        .map(|(path, entry)| FileRecord {
            path: path.clone(),
            mtime: entry.mtime,
            file_id: entry.file_id,
            deleted: true,
        })
        .collect();
    removed.sort_by_key(|file| file.file_id);

    let mut next_file_id = prior.next_file_id.max(1);
    let mut changed = Vec::new();
    let mut unchanged = 0;

    for (path, mtime) in observed {
        match prior.entries.get(path) {
            None => {
                changed.push(FileRecord {
                    path: path.clone(),
                    mtime: *mtime,
                    file_id: next_file_id,
                    deleted: false,
                });
                next_file_id += 1;
            }
            Some(entry) if *mtime > entry.mtime => changed.push(FileRecord {
                path: path.clone(),
                mtime: *mtime,
                file_id: entry.file_id,
                deleted: false,
            }),
            Some(_) => unchanged += 1,
        }
    }

    CatalogDiff {
        changed,
        removed,
        unchanged,
        next_file_id,
    }
}
