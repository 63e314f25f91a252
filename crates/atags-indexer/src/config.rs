//! Configuration for atags.

use crate::extract::{DEFAULT_CTAGS_FORMAT, DEFAULT_CTAGS_PROGRAM};
use crate::pool::DEFAULT_JOBS;
use crate::IndexerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the tag database inside the database directory.
pub const DB_FILE_NAME: &str = "tags.db";

/// Indexer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `tags.db`
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Concurrent reference extraction workers
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Extension to language overrides (`Lang:.ext.ext2,Other:.x`)
    #[serde(default)]
    pub langmap: String,

    /// Definition extraction program
    #[serde(default = "default_ctags_program")]
    pub ctags_program: String,

    /// `--format` passed to the definition program
    #[serde(default = "default_ctags_format")]
    pub ctags_format: u32,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Collect per-stage timings
    #[serde(default)]
    pub statistics: bool,

    /// Descend into symlinked directories while walking the root
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_jobs() -> usize {
    DEFAULT_JOBS
}

fn default_ctags_program() -> String {
    DEFAULT_CTAGS_PROGRAM.to_string()
}

fn default_ctags_format() -> u32 {
    DEFAULT_CTAGS_FORMAT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            jobs: default_jobs(),
            langmap: String::new(),
            ctags_program: default_ctags_program(),
            ctags_format: default_ctags_format(),
            log_level: default_log_level(),
            statistics: false,
            follow_symlinks: false,
        }
    }
}

impl IndexConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("atags").join("config.yaml"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_or_default(&path),
            _ => Self::default(),
        }
    }

    /// Load configuration from `path`, warning and falling back to defaults
    /// when it cannot be read or parsed
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Ignoring config file");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, IndexerError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Full path of the tag database.
    pub fn db_file(&self) -> PathBuf {
        self.db_path.join(DB_FILE_NAME)
    }
}
