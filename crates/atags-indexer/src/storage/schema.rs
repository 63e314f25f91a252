//! SQLite schema of the tag database.

use rusqlite::Connection;
use std::path::Path;

/// Bumped whenever the layout below changes; older databases are rebuilt.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_FILES: &str = "\
CREATE TABLE IF NOT EXISTS files (
  file_id INTEGER PRIMARY KEY,
  path TEXT NOT NULL UNIQUE,
  mtime INTEGER NOT NULL
)";

const CREATE_REFS: &str = "\
CREATE TABLE IF NOT EXISTS refs (
  symbol TEXT NOT NULL,
  line INTEGER NOT NULL,
  file_id INTEGER NOT NULL
)";

const CREATE_DEFS: &str = "\
CREATE TABLE IF NOT EXISTS defs (
  symbol TEXT NOT NULL,
  file_id INTEGER NOT NULL,
  line INTEGER NOT NULL,
  signature TEXT NOT NULL
)";

const CREATE_META: &str = "\
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
)";

/// Secondary indices, dropped during bulk loads: `(name, definition)`.
pub const SECONDARY_INDICES: &[(&str, &str)] = &[
    (
        "idx_refs_symbol",
        "CREATE INDEX IF NOT EXISTS idx_refs_symbol ON refs(symbol)",
    ),
    (
        "idx_refs_file",
        "CREATE INDEX IF NOT EXISTS idx_refs_file ON refs(file_id)",
    ),
    (
        "idx_defs_symbol",
        "CREATE INDEX IF NOT EXISTS idx_defs_symbol ON defs(symbol)",
    ),
    (
        "idx_defs_file",
        "CREATE INDEX IF NOT EXISTS idx_defs_file ON defs(file_id)",
    ),
];

/// Open (or create) the database at `db_path` and apply the schema.
pub fn initialize_database(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the schema applied.
pub fn initialize_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    // Interrupted runs are caught by the run state, not by the journal.
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "synchronous", "OFF")?;

    conn.execute_batch(CREATE_FILES)?;
    conn.execute_batch(CREATE_REFS)?;
    conn.execute_batch(CREATE_DEFS)?;
    conn.execute_batch(CREATE_META)?;

    for (_, ddl) in SECONDARY_INDICES {
        conn.execute_batch(ddl)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_schema_creates_tables_and_indices() {
        let conn = initialize_in_memory().unwrap();

        for table in ["files", "refs", "defs", "meta"] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }

        assert_eq!(
            index_names(&conn),
            vec!["idx_defs_file", "idx_defs_symbol", "idx_refs_file", "idx_refs_symbol"]
        );
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tags.db");

        drop(initialize_database(&path).unwrap());
        let conn = initialize_database(&path).unwrap();
        assert_eq!(index_names(&conn).len(), SECONDARY_INDICES.len());
    }
}
