//! Bounded-parallel reference extraction.

use crate::cancel::Cancellation;
use crate::extract::ReferenceExtractor;
use crate::records::{FileId, FileTask, ReferenceRecord};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of concurrent extraction workers.
pub const DEFAULT_JOBS: usize = 8;

/// How extraction of one file ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted(Vec<ReferenceRecord>),
    /// No tokenizer handles the file
    Unsupported,
    /// Read, lexer or worker failure
    Failed(String),
    /// Never dispatched because the run was cancelled
    Cancelled,
}

/// The single result delivered for each submitted file.
#[derive(Debug, Clone)]
pub struct FileReferences {
    pub file_id: FileId,
    pub path: String,
    pub outcome: ExtractOutcome,
}

impl FileReferences {
    /// References to store for this file; failures store nothing.
    pub fn references(&self) -> &[ReferenceRecord] {
        match &self.outcome {
            ExtractOutcome::Extracted(refs) => refs,
            _ => &[],
        }
    }
}

/// Runs a [`ReferenceExtractor`] over many files.
pub struct WorkerPool {
    extractor: Arc<ReferenceExtractor>,
    limit: usize,
}

impl WorkerPool {
    pub fn new(extractor: Arc<ReferenceExtractor>, limit: usize) -> Self {
        Self {
            extractor,
            limit: limit.max(1),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Start extraction. Every file yields exactly one result on the stream.
    ///
    /// Batches no larger than the limit run sequentially as the stream is
    /// polled; larger ones are spread over up to `limit` blocking workers
    /// and arrive in completion order.
    pub fn run(&self, files: Vec<FileTask>, cancel: Cancellation) -> ReferenceStream {
        let total = files.len();

        if total <= self.limit {
            debug!(files = total, "Extracting references inline");
            return ReferenceStream {
                total,
                inner: StreamInner::Inline {
                    extractor: self.extractor.clone(),
                    pending: files.into(),
                    cancel,
                },
            };
        }

        debug!(files = total, workers = self.limit, "Extracting references on worker pool");

        let (tx, rx) = mpsc::channel(self.limit * 2);
        tokio::spawn(drive(self.extractor.clone(), files, self.limit, cancel, tx));

        ReferenceStream {
            total,
            inner: StreamInner::Pooled(rx),
        }
    }
}

async fn drive(
    extractor: Arc<ReferenceExtractor>,
    files: Vec<FileTask>,
    limit: usize,
    cancel: Cancellation,
    tx: mpsc::Sender<FileReferences>,
) {
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut workers = JoinSet::new();
    let mut pending = files.into_iter();

    while let Some(task) = pending.next() {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let _ = tx.send(failed(task, e.to_string())).await;
                continue;
            }
        };

        if cancel.is_cancelled() {
            drop(permit);
            for task in std::iter::once(task).chain(pending.by_ref()) {
                let _ = tx.send(cancelled(task)).await;
            }
            break;
        }

        let extractor = extractor.clone();
        let tx = tx.clone();
        workers.spawn_blocking(move || {
            let result = extract_one(&extractor, task);
            drop(permit);
            let _ = tx.blocking_send(result);
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Reference worker did not finish");
        }
    }
}

fn extract_one(extractor: &ReferenceExtractor, task: FileTask) -> FileReferences {
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        extractor.try_extract(&task.path, task.file_id)
    }));

    let outcome = match attempt {
        Ok(Ok(Some(refs))) => ExtractOutcome::Extracted(refs),
        Ok(Ok(None)) => ExtractOutcome::Unsupported,
        Ok(Err(e)) => {
            warn!(path = %task.path, error = %e, "Skipping references");
            ExtractOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(path = %task.path, "Reference worker panicked");
            ExtractOutcome::Failed("worker panicked".to_string())
        }
    };

    FileReferences {
        file_id: task.file_id,
        path: task.path,
        outcome,
    }
}

fn failed(task: FileTask, cause: String) -> FileReferences {
    FileReferences {
        file_id: task.file_id,
        path: task.path,
        outcome: ExtractOutcome::Failed(cause),
    }
}

fn cancelled(task: FileTask) -> FileReferences {
    FileReferences {
        file_id: task.file_id,
        path: task.path,
        outcome: ExtractOutcome::Cancelled,
    }
}

enum StreamInner {
    Inline {
        extractor: Arc<ReferenceExtractor>,
        pending: VecDeque<FileTask>,
        cancel: Cancellation,
    },
    Pooled(mpsc::Receiver<FileReferences>),
}

/// Per-file results of a [`WorkerPool::run`].
pub struct ReferenceStream {
    total: usize,
    inner: StreamInner,
}

impl ReferenceStream {
    /// Number of files submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next finished file, `None` once every file has been delivered.
    pub async fn next(&mut self) -> Option<FileReferences> {
        match &mut self.inner {
            StreamInner::Inline {
                extractor,
                pending,
                cancel,
            } => {
                let task = pending.pop_front()?;
                if cancel.is_cancelled() {
                    Some(cancelled(task))
                } else {
                    Some(extract_one(extractor, task))
                }
            }
            StreamInner::Pooled(rx) => rx.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::LanguageMap;
    use crate::tokenizer::testing::FakeBackend;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn pool(root: &Path, limit: usize) -> WorkerPool {
        let extractor = ReferenceExtractor::new(root, LanguageMap::new(), Arc::new(FakeBackend));
        WorkerPool::new(Arc::new(extractor), limit)
    }

    fn write_files(root: &Path, names: &[&str]) -> Vec<FileTask> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                fs::write(root.join(name), format!("symbol_{} shared\n", i)).unwrap();
                FileTask::new(*name, i as FileId + 1)
            })
            .collect()
    }

    async fn drain(mut stream: ReferenceStream) -> HashMap<FileId, FileReferences> {
        let mut results = HashMap::new();
        while let Some(result) = stream.next().await {
            assert!(
                results.insert(result.file_id, result).is_none(),
                "file delivered twice"
            );
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_file_yields_once() {
        let temp_dir = tempdir().unwrap();
        let names: Vec<String> = (0..25).map(|i| format!("f{}.w", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let files = write_files(temp_dir.path(), &names);

        let pool = pool(temp_dir.path(), 3);
        let stream = pool.run(files, Cancellation::new());
        assert_eq!(stream.total(), 25);

        let results = drain(stream).await;
        assert_eq!(results.len(), 25);
        for id in 1..=25 {
            let refs = results[&id].references();
            assert_eq!(refs.len(), 2);
            assert_eq!(refs[0].symbol, format!("symbol_{}", id - 1));
            assert!(refs.iter().all(|r| r.file_id == id));
        }
    }

    #[tokio::test]
    async fn test_inline_when_small() {
        let temp_dir = tempdir().unwrap();
        let files = write_files(temp_dir.path(), &["a.w", "b.txt"]);

        let results = drain(pool(temp_dir.path(), 8).run(files, Cancellation::new())).await;

        assert!(matches!(results[&1].outcome, ExtractOutcome::Extracted(_)));
        assert_eq!(results[&2].outcome, ExtractOutcome::Unsupported);
    }

    #[tokio::test]
    async fn test_panic_degrades_to_failure() {
        let temp_dir = tempdir().unwrap();
        let files = write_files(
            temp_dir.path(),
            &["a.w", "b.boom", "c.w", "d.bad", "e.w"],
        );

        for limit in [1, 8] {
            let results =
                drain(pool(temp_dir.path(), limit).run(files.clone(), Cancellation::new())).await;

            assert_eq!(results.len(), 5);
            assert!(matches!(results[&2].outcome, ExtractOutcome::Failed(_)));
            assert!(results[&2].references().is_empty());
            assert!(matches!(results[&4].outcome, ExtractOutcome::Failed(_)));
            assert_eq!(results[&5].references().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let temp_dir = tempdir().unwrap();
        let files = write_files(temp_dir.path(), &["a.w", "b.w", "c.w", "d.w"]);
        let cancel = Cancellation::new();
        cancel.cancel();

        for limit in [2, 8] {
            let results = drain(pool(temp_dir.path(), limit).run(files.clone(), cancel.clone())).await;

            assert_eq!(results.len(), 4);
            assert!(results
                .values()
                .all(|r| r.outcome == ExtractOutcome::Cancelled));
        }
    }
}
