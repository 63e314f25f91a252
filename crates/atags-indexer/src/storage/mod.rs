//! Persistent tag store.
//!
//! A single SQLite connection behind a mutex holds the file catalog, the
//! reference and definition rows keyed by file id, and a small metadata
//! table describing the last run. Every per-file mutation is one
//! transaction, so readers never observe a file with a mix of old and new
//! rows.

mod schema;

pub use schema::{initialize_database, initialize_in_memory, SCHEMA_VERSION, SECONDARY_INDICES};

use crate::records::{
    DefinitionHit, DefinitionRecord, FileId, FileRecord, FileSymbol, FileToken, ReferenceHit,
    ReferenceRecord,
};
use crate::IndexerError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stored mtime of a file whose last extraction did not complete. Any real
/// mtime is newer, so the next incremental run picks the file up again.
pub const STALE_MTIME: i64 = i64::MIN;

const META_SCHEMA_VERSION: &str = "schema_version";
const META_NEXT_FILE_ID: &str = "next_file_id";
const META_RUN_STATE: &str = "run_state";
const META_LAST_RUN: &str = "last_run";

const RUN_IN_PROGRESS: &str = "in_progress";
const RUN_COMPLETE: &str = "complete";

const UPSERT_FILE_SQL: &str = "\
INSERT INTO files (file_id, path, mtime) VALUES (?1, ?2, ?3)
ON CONFLICT(file_id) DO UPDATE SET
  path = excluded.path,
  mtime = excluded.mtime";

const SET_META_SQL: &str = "\
INSERT INTO meta (key, value) VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value";

const DELETE_REFS_SQL: &str = "DELETE FROM refs WHERE file_id = ?1";
const DELETE_DEFS_SQL: &str = "DELETE FROM defs WHERE file_id = ?1";
const DELETE_FILE_SQL: &str = "DELETE FROM files WHERE file_id = ?1";
const INSERT_REF_SQL: &str = "INSERT INTO refs (symbol, line, file_id) VALUES (?1, ?2, ?3)";
const INSERT_DEF_SQL: &str =
    "INSERT INTO defs (symbol, file_id, line, signature) VALUES (?1, ?2, ?3, ?4)";

const FIND_DEFINITIONS_SQL: &str = "\
SELECT f.path, d.line, d.signature FROM defs d
JOIN files f ON f.file_id = d.file_id
WHERE d.symbol = ?1
ORDER BY f.path, d.line, d.rowid";

const FIND_REFERENCES_SQL: &str = "\
SELECT f.path, r.line FROM refs r
JOIN files f ON f.file_id = r.file_id
WHERE r.symbol = ?1
ORDER BY f.path, r.line, r.rowid";

const SYMBOLS_IN_FILE_SQL: &str = "\
SELECT d.symbol, d.line, d.signature FROM defs d
JOIN files f ON f.file_id = d.file_id
WHERE f.path = ?1
ORDER BY d.line, d.rowid";

const REFERENCES_IN_FILE_SQL: &str = "\
SELECT r.symbol, r.line FROM refs r
JOIN files f ON f.file_id = r.file_id
WHERE f.path = ?1
ORDER BY r.line, r.rowid";

/// One catalogued path as seen by the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub mtime: i64,
    pub file_id: FileId,
}

/// Catalog contents left by the last completed run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: HashMap<String, SnapshotEntry>,
    /// Smallest id never handed out
    pub next_file_id: FileId,
}

/// Row counts of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub files: usize,
    pub references: usize,
    pub definitions: usize,
    /// Completion time of the last finished run (RFC 3339)
    pub last_run: Option<String>,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} references, {} definitions",
            self.files, self.references, self.definitions
        )?;
        if let Some(last_run) = &self.last_run {
            write!(f, " (indexed {})", last_run)?;
        }
        Ok(())
    }
}

/// The tag database.
pub struct TagStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl fmt::Debug for TagStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TagStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, IndexerError> {
        let conn = initialize_database(path)?;
        debug!(path = ?path, "Opened tag store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Fresh in-memory store.
    pub fn open_in_memory() -> Result<Self, IndexerError> {
        Ok(Self {
            conn: Mutex::new(initialize_in_memory()?),
            path: None,
        })
    }

    /// Location of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Remove every file, reference, definition and metadata row.
    pub fn reset(&self) -> Result<(), IndexerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM refs; DELETE FROM defs; DELETE FROM files; DELETE FROM meta;",
        )?;
        tx.commit()?;
        info!("Tag store reset");
        Ok(())
    }

    /// Catalog left by the previous run.
    ///
    /// Fails with [`IndexerError::RebuildRequired`] when there is no usable
    /// previous run: nothing indexed yet, a different schema version, a run
    /// that never finished, or rows that cannot be read.
    pub fn snapshot(&self) -> Result<Snapshot, IndexerError> {
        let conn = self.conn.lock();
        read_snapshot(&conn).map_err(|e| match e {
            IndexerError::Database(e) => {
                IndexerError::RebuildRequired(format!("unreadable catalog: {}", e))
            }
            other => other,
        })
    }

    /// Persist a catalog diff in one transaction.
    ///
    /// Removed files lose their reference and definition rows before their
    /// file row; changed files are upserted with their new mtime. The run is
    /// marked in progress until [`TagStore::finish_run`].
    pub fn apply_catalog(
        &self,
        changed: &[FileRecord],
        removed: &[FileId],
        next_file_id: FileId,
    ) -> Result<(), IndexerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut del_refs = tx.prepare_cached(DELETE_REFS_SQL)?;
            let mut del_defs = tx.prepare_cached(DELETE_DEFS_SQL)?;
            let mut del_file = tx.prepare_cached(DELETE_FILE_SQL)?;
            for file_id in removed {
                del_refs.execute([file_id])?;
                del_defs.execute([file_id])?;
                del_file.execute([file_id])?;
            }

            let mut upsert = tx.prepare_cached(UPSERT_FILE_SQL)?;
            for file in changed {
                upsert.execute(params![file.file_id, file.path, file.mtime])?;
            }

            let mut set_meta = tx.prepare_cached(SET_META_SQL)?;
            set_meta.execute(params![META_SCHEMA_VERSION, SCHEMA_VERSION.to_string()])?;
            set_meta.execute(params![META_NEXT_FILE_ID, next_file_id.to_string()])?;
            set_meta.execute(params![META_RUN_STATE, RUN_IN_PROGRESS])?;
        }
        tx.commit()?;

        debug!(
            changed = changed.len(),
            removed = removed.len(),
            next_file_id,
            "Catalog persisted"
        );
        Ok(())
    }

    /// Replace every reference row of `file_id`.
    pub fn replace_references(
        &self,
        file_id: FileId,
        references: &[ReferenceRecord],
    ) -> Result<usize, IndexerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            tx.prepare_cached(DELETE_REFS_SQL)?.execute([file_id])?;
            let mut insert = tx.prepare_cached(INSERT_REF_SQL)?;
            for reference in references {
                insert.execute(params![reference.symbol, reference.line, file_id])?;
            }
        }
        tx.commit()?;
        Ok(references.len())
    }

    /// Replace every definition row of `file_id`.
    pub fn replace_definitions(
        &self,
        file_id: FileId,
        definitions: &[DefinitionRecord],
    ) -> Result<usize, IndexerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            tx.prepare_cached(DELETE_DEFS_SQL)?.execute([file_id])?;
            let mut insert = tx.prepare_cached(INSERT_DEF_SQL)?;
            for definition in definitions {
                insert.execute(params![
                    definition.symbol,
                    file_id,
                    definition.line,
                    definition.signature
                ])?;
            }
        }
        tx.commit()?;
        Ok(definitions.len())
    }

    /// Forget a file together with its references and definitions.
    pub fn remove_file(&self, file_id: FileId) -> Result<(), IndexerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            tx.prepare_cached(DELETE_REFS_SQL)?.execute([file_id])?;
            tx.prepare_cached(DELETE_DEFS_SQL)?.execute([file_id])?;
            tx.prepare_cached(DELETE_FILE_SQL)?.execute([file_id])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn drop_secondary_indices(&self) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        for (name, _) in SECONDARY_INDICES {
            conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", name))?;
        }
        debug!("Secondary indices dropped");
        Ok(())
    }

    pub fn rebuild_secondary_indices(&self) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        for (_, ddl) in SECONDARY_INDICES {
            conn.execute_batch(ddl)?;
        }
        debug!("Secondary indices rebuilt");
        Ok(())
    }

    /// Force the given files to be re-extracted by the next incremental run.
    pub fn mark_stale(&self, file_ids: &[FileId]) -> Result<(), IndexerError> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut update = tx.prepare_cached("UPDATE files SET mtime = ?1 WHERE file_id = ?2")?;
            for file_id in file_ids {
                update.execute(params![STALE_MTIME, file_id])?;
            }
        }
        tx.commit()?;
        debug!(files = file_ids.len(), "Marked files stale");
        Ok(())
    }

    /// Record that the current run reached its end.
    pub fn finish_run(&self) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        let mut set_meta = conn.prepare_cached(SET_META_SQL)?;
        set_meta.execute(params![META_RUN_STATE, RUN_COMPLETE])?;
        set_meta.execute(params![META_LAST_RUN, chrono::Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// All catalogued files ordered by id.
    pub fn files(&self) -> Result<Vec<FileRecord>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT path, mtime, file_id FROM files ORDER BY file_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                mtime: row.get(1)?,
                file_id: row.get(2)?,
                deleted: false,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Id of a catalogued path.
    pub fn file_id(&self, path: &str) -> Result<Option<FileId>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT file_id FROM files WHERE path = ?1")?;
        Ok(stmt.query_row([path], |row| row.get(0)).optional()?)
    }

    /// Where `symbol` is defined.
    pub fn find_definitions(&self, symbol: &str) -> Result<Vec<DefinitionHit>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(FIND_DEFINITIONS_SQL)?;
        let rows = stmt.query_map([symbol], |row| {
            Ok(DefinitionHit {
                path: row.get(0)?,
                line: row.get(1)?,
                signature: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Where `symbol` occurs.
    pub fn find_references(&self, symbol: &str) -> Result<Vec<ReferenceHit>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(FIND_REFERENCES_SQL)?;
        let rows = stmt.query_map([symbol], |row| {
            Ok(ReferenceHit {
                path: row.get(0)?,
                line: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Definitions inside `path`.
    pub fn symbols_in_file(&self, path: &str) -> Result<Vec<FileSymbol>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(SYMBOLS_IN_FILE_SQL)?;
        let rows = stmt.query_map([path], |row| {
            Ok(FileSymbol {
                symbol: row.get(0)?,
                line: row.get(1)?,
                signature: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// References inside `path`.
    pub fn references_in_file(&self, path: &str) -> Result<Vec<FileToken>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(REFERENCES_IN_FILE_SQL)?;
        let rows = stmt.query_map([path], |row| {
            Ok(FileToken {
                symbol: row.get(0)?,
                line: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn stats(&self) -> Result<StoreStats, IndexerError> {
        let conn = self.conn.lock();
        let count = |table: &str| -> rusqlite::Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            files: count("files")?,
            references: count("refs")?,
            definitions: count("defs")?,
            last_run: get_meta(&conn, META_LAST_RUN)?,
        })
    }
}

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.prepare_cached("SELECT value FROM meta WHERE key = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()
}

fn read_snapshot(conn: &Connection) -> Result<Snapshot, IndexerError> {
    let version = get_meta(conn, META_SCHEMA_VERSION)?
        .ok_or_else(|| IndexerError::RebuildRequired("no previous index".to_string()))?;
    if version.parse::<i64>().ok() != Some(SCHEMA_VERSION) {
        return Err(IndexerError::RebuildRequired(format!(
            "schema version {} does not match {}",
            version, SCHEMA_VERSION
        )));
    }

    if get_meta(conn, META_RUN_STATE)?.as_deref() != Some(RUN_COMPLETE) {
        return Err(IndexerError::RebuildRequired(
            "previous run did not finish".to_string(),
        ));
    }

    let mut entries = HashMap::new();
    let mut max_id = 0;
    {
        let mut stmt = conn.prepare_cached("SELECT path, mtime, file_id FROM files")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let entry = SnapshotEntry {
                mtime: row.get(1)?,
                file_id: row.get(2)?,
            };
            max_id = max_id.max(entry.file_id);
            entries.insert(path, entry);
        }
    }

    let stored_next = get_meta(conn, META_NEXT_FILE_ID)?
        .and_then(|v| v.parse::<FileId>().ok())
        .unwrap_or(0);

    Ok(Snapshot {
        entries,
        next_file_id: stored_next.max(max_id + 1),
    })
}
