//! File listing for an indexing run.
//!
//! A run indexes either the paths named in a `gtags.files` list at the
//! root, a gitignore-aware walk of the root, or a single path.

mod language;
mod walker;

pub use language::{
    canonical_language_name, detect_language, Language, LanguageMap, LANGUAGE_ALIASES,
};
pub use walker::{modified_secs, FileEntry, Walker};

use crate::IndexerError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the explicit file list looked up at the index root.
pub const FILE_LIST_NAME: &str = "gtags.files";

/// Where the paths of a [`Listing`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingSource {
    /// Lines of a file list
    FileList(PathBuf),
    /// Directory walk
    Walk,
    /// A single path given on the command line
    Single,
}

/// Paths to consider for one run, relative to the index root.
#[derive(Debug, Clone)]
pub struct Listing {
    pub source: ListingSource,
    pub paths: Vec<String>,
}

/// Produces the [`Listing`] for a root directory.
pub struct FileLister {
    root: PathBuf,
    follow_symlinks: bool,
    excluded: Vec<String>,
}

impl FileLister {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            follow_symlinks: false,
            excluded: Vec::new(),
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Skip files whose name starts with `prefix` (e.g. the tag database).
    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.excluded.push(prefix.into());
        self
    }

    /// List the files of the root.
    pub fn list(&self) -> Result<Listing, IndexerError> {
        let list_path = self.root.join(FILE_LIST_NAME);

        let listing = if list_path.is_file() {
            let content = std::fs::read_to_string(&list_path)?;
            let paths = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            Listing {
                source: ListingSource::FileList(list_path),
                paths,
            }
        } else {
            let entries = Walker::new(&self.root, self.follow_symlinks).walk()?;
            let paths = entries
                .into_iter()
                .map(|entry| entry.path)
                .filter(|path| !self.is_excluded(path))
                .collect();
            Listing {
                source: ListingSource::Walk,
                paths,
            }
        };

        info!(
            root = ?self.root,
            source = ?listing.source,
            files = listing.paths.len(),
            "Listed files"
        );

        Ok(listing)
    }

    /// Listing for a single-file update.
    pub fn single(path: impl Into<String>) -> Listing {
        Listing {
            source: ListingSource::Single,
            paths: vec![path.into()],
        }
    }

    fn is_excluded(&self, path: &str) -> bool {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let excluded = self
            .excluded
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()));
        if excluded {
            debug!(path, "Excluded from listing");
        }
        excluded
    }
}
