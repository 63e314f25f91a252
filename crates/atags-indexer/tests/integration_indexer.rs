//! Integration tests for the atags indexing pipeline and tag store.

use async_trait::async_trait;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::tempdir;

use atags_indexer::{
    BuildOptions, Cancellation, DefinitionProvider, DefinitionRecord, DefinitionSource, FileId,
    FileLister, IndexBuilder, IndexMode, IndexerError, LanguageMap, ReferenceExtractor,
    RunReport, SyntaxBackend, TagStore,
};

const A_GO: &str = "package main\n\nfunc main() {\n\thelper()\n}\n";
const B_GO: &str = "package main\n\nfunc helper() int {\n\treturn 1\n}\n";
const B_GO_MODIFIED: &str =
    "package main\n\nfunc helper() int {\n\treturn other()\n}\n\nfunc other() int {\n\treturn 2\n}\n";

/// Reports every `func name(` line of a file as a definition.
struct FuncDefinitions;

struct FuncSource {
    root: PathBuf,
}

#[async_trait]
impl DefinitionSource for FuncSource {
    async fn definitions(
        &mut self,
        path: &str,
        file_id: FileId,
    ) -> Result<Vec<DefinitionRecord>, IndexerError> {
        let content = fs::read_to_string(self.root.join(path))?;
        Ok(content
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let rest = line.strip_prefix("func ")?;
                let name = rest.split('(').next()?.trim();
                Some(DefinitionRecord {
                    symbol: name.to_string(),
                    file_id,
                    line: i as u32 + 1,
                    signature: line.trim().to_string(),
                })
            })
            .collect())
    }

    async fn shutdown(&mut self) {}
}

#[async_trait]
impl DefinitionProvider for FuncDefinitions {
    async fn open(&self, root: &Path) -> Result<Box<dyn DefinitionSource>, IndexerError> {
        Ok(Box::new(FuncSource {
            root: root.to_path_buf(),
        }))
    }
}

/// Write `content` to `root/name` and pin its mtime to `secs` after the epoch.
fn write_at(root: &Path, name: &str, content: &str, secs: u64) {
    let path = root.join(name);
    fs::write(&path, content).unwrap();
    let file = File::options().write(true).open(&path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

async fn index(root: &Path, store: &Arc<TagStore>, mode: IndexMode) -> RunReport {
    let listing = FileLister::new(root).list().unwrap();
    index_listing(root, store, mode, &listing).await
}

async fn index_listing(
    root: &Path,
    store: &Arc<TagStore>,
    mode: IndexMode,
    listing: &atags_indexer::Listing,
) -> RunReport {
    try_index(root, store, mode, listing).await.unwrap()
}

async fn try_index(
    root: &Path,
    store: &Arc<TagStore>,
    mode: IndexMode,
    listing: &atags_indexer::Listing,
) -> Result<RunReport, IndexerError> {
    let references = ReferenceExtractor::new(
        root,
        LanguageMap::new(),
        Arc::new(SyntaxBackend::new()),
    );
    IndexBuilder::new(root, store.clone(), references, Arc::new(FuncDefinitions))
        .with_options(BuildOptions {
            mode,
            jobs: 2,
            profile: false,
        })
        .run(listing, &Cancellation::new())
        .await
}

fn lines_of(hits: &[atags_indexer::ReferenceHit]) -> Vec<(&str, u32)> {
    hits.iter().map(|h| (h.path.as_str(), h.line)).collect()
}

#[tokio::test]
async fn test_unchanged_and_modified_files() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO, 1_000_000);

    let db_dir = tempdir().unwrap();
    let store = Arc::new(TagStore::open(&db_dir.path().join("tags.db")).unwrap());
    let first = index(root, &store, IndexMode::Full).await;
    assert!(first.is_complete(), "{}", first);
    assert_eq!(first.files_attempted, 2);

    let a_id = store.file_id("a.go").unwrap().unwrap();
    let b_id = store.file_id("b.go").unwrap().unwrap();
    assert_eq!((a_id, b_id), (1, 2));

    assert_eq!(
        lines_of(&store.find_references("helper").unwrap()),
        vec![("a.go", 4), ("b.go", 3)]
    );

    write_at(root, "b.go", B_GO_MODIFIED, 1_000_010);
    let second = index(root, &store, IndexMode::Incremental).await;

    assert_eq!(second.files_attempted, 1);
    assert_eq!(second.files_unchanged, 1);
    assert_eq!(second.files_removed, 0);

    // a.go rows survive untouched, b.go rows are the new version only
    assert_eq!(store.file_id("a.go").unwrap(), Some(a_id));
    assert_eq!(store.file_id("b.go").unwrap(), Some(b_id));
    assert_eq!(
        lines_of(&store.find_references("helper").unwrap()),
        vec![("a.go", 4), ("b.go", 3)]
    );
    assert_eq!(
        lines_of(&store.find_references("other").unwrap()),
        vec![("b.go", 4), ("b.go", 7)]
    );

    let symbols: Vec<_> = store
        .symbols_in_file("b.go")
        .unwrap()
        .into_iter()
        .map(|s| (s.symbol, s.line))
        .collect();
    assert_eq!(
        symbols,
        vec![("helper".to_string(), 3), ("other".to_string(), 7)]
    );
    assert_eq!(store.find_definitions("main").unwrap()[0].path, "a.go");
}

#[tokio::test]
async fn test_file_ids_stable_across_runs() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    index(root, &store, IndexMode::Full).await;
    let before = store.files().unwrap();

    write_at(root, "c.go", "package main\n", 1_000_000);
    write_at(root, "a.go", A_GO, 1_000_005);
    index(root, &store, IndexMode::Incremental).await;

    let after = store.files().unwrap();
    for file in &before {
        let same = after.iter().find(|f| f.path == file.path).unwrap();
        assert_eq!(same.file_id, file.file_id);
    }
    assert_eq!(store.file_id("c.go").unwrap(), Some(3));
}

#[tokio::test]
async fn test_removed_file_is_purged() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    index(root, &store, IndexMode::Full).await;

    fs::remove_file(root.join("b.go")).unwrap();
    let report = index(root, &store, IndexMode::Incremental).await;

    assert_eq!(report.files_removed, 1);
    assert_eq!(report.files_attempted, 0);
    assert_eq!(store.file_id("b.go").unwrap(), None);
    assert!(store.references_in_file("b.go").unwrap().is_empty());
    assert!(store.find_definitions("helper").unwrap().is_empty());
    assert_eq!(
        lines_of(&store.find_references("helper").unwrap()),
        vec![("a.go", 4)]
    );

    let stats = store.stats().unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.definitions, 1);

    // A re-created path gets a new id
    write_at(root, "b.go", B_GO, 1_000_000);
    index(root, &store, IndexMode::Incremental).await;
    assert_eq!(store.file_id("b.go").unwrap(), Some(3));
}

#[tokio::test]
async fn test_full_runs_are_idempotent() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO_MODIFIED, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());

    let mut states = Vec::new();
    for _ in 0..2 {
        index(root, &store, IndexMode::Full).await;
        let mut state = Vec::new();
        for file in store.files().unwrap() {
            state.push(format!(
                "{} {} {:?} {:?}",
                file.file_id,
                file.path,
                store.references_in_file(&file.path).unwrap(),
                store.symbols_in_file(&file.path).unwrap()
            ));
        }
        states.push(state);
    }

    assert_eq!(states[0], states[1]);
    assert!(!states[0].is_empty());
}

#[tokio::test]
async fn test_incremental_without_changes_is_noop() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    index(root, &store, IndexMode::Full).await;
    let before = store.stats().unwrap();

    let report = index(root, &store, IndexMode::Incremental).await;
    assert_eq!(report.files_attempted, 0);
    assert_eq!(report.files_unchanged, 1);

    let after = store.stats().unwrap();
    assert_eq!(before.references, after.references);
    assert_eq!(before.definitions, after.definitions);
}

#[tokio::test]
async fn test_single_file_update() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    index(root, &store, IndexMode::Full).await;

    write_at(root, "b.go", B_GO_MODIFIED, 1_000_020);
    let listing = FileLister::single("b.go");
    let report = index_listing(root, &store, IndexMode::Incremental, &listing).await;

    // a.go is not listed but still on disk, so it stays catalogued
    assert_eq!(report.files_attempted, 1);
    assert_eq!(report.files_removed, 0);
    assert_eq!(store.file_id("a.go").unwrap(), Some(1));
    assert_eq!(store.find_definitions("other").unwrap().len(), 1);
}

#[tokio::test]
async fn test_file_list_limits_indexing() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);
    write_at(root, "b.go", B_GO, 1_000_000);
    fs::write(root.join("gtags.files"), "b.go\n").unwrap();

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    let report = index(root, &store, IndexMode::Full).await;

    assert_eq!(report.files_attempted, 1);
    assert_eq!(store.file_id("a.go").unwrap(), None);
    assert_eq!(store.find_definitions("helper").unwrap()[0].path, "b.go");
}

#[tokio::test]
async fn test_langmap_routes_unknown_extension() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "script.gox", B_GO, 1_000_000);

    let store = Arc::new(TagStore::open_in_memory().unwrap());
    let listing = FileLister::new(root).list().unwrap();
    let references = ReferenceExtractor::new(
        root,
        LanguageMap::parse("Golang:.gox").unwrap(),
        Arc::new(SyntaxBackend::new()),
    );
    let report = IndexBuilder::new(root, store.clone(), references, Arc::new(FuncDefinitions))
        .run(&listing, &Cancellation::new())
        .await
        .unwrap();

    assert_eq!(report.files_unsupported, 0);
    assert_eq!(
        lines_of(&store.find_references("helper").unwrap()),
        vec![("script.gox", 3)]
    );
}

#[tokio::test]
async fn test_store_error_aborts_run() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_at(root, "a.go", A_GO, 1_000_000);

    let db_dir = tempdir().unwrap();
    let db_file = db_dir.path().join("tags.db");
    let store = Arc::new(TagStore::open(&db_file).unwrap());
    index(root, &store, IndexMode::Full).await;

    let conn = rusqlite::Connection::open(&db_file).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER refs_read_only BEFORE INSERT ON refs \
         BEGIN SELECT RAISE(ABORT, 'refs are read-only'); END;",
    )
    .unwrap();
    drop(conn);

    write_at(root, "b.go", B_GO, 1_000_000);
    let listing = FileLister::new(root).list().unwrap();
    let result = try_index(root, &store, IndexMode::Incremental, &listing).await;

    assert!(
        matches!(result, Err(IndexerError::Database(_))),
        "{:?}",
        result.map(|report| report.to_string())
    );
    assert!(matches!(
        store.snapshot(),
        Err(IndexerError::RebuildRequired(_))
    ));
}

#[test]
fn test_modified_time_is_observed() {
    let temp_dir = tempdir().unwrap();
    write_at(temp_dir.path(), "a.go", A_GO, 1_234_567);
    let modified = fs::metadata(temp_dir.path().join("a.go"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(
        modified.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
        1_234_567
    );
}
