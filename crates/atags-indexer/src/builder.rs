//! Orchestration of an indexing run.
//!
//! A run moves through `Discover`, then definition and reference extraction
//! side by side, then `Finalize`. Discovery failures abort before the store
//! is touched; extraction failures only degrade the affected files; store
//! failures abort the run.

use crate::cancel::Cancellation;
use crate::catalog::{CatalogDiff, FileCatalog, IndexMode};
use crate::extract::{extract_batch, DefinitionProvider, ReferenceExtractor};
use crate::pool::{ExtractOutcome, WorkerPool, DEFAULT_JOBS};
use crate::records::{FileId, FileTask};
use crate::scanner::Listing;
use crate::storage::TagStore;
use crate::IndexerError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    ExtractDefinitions,
    ExtractReferences,
    Finalize,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discover => "discover",
            Stage::ExtractDefinitions => "extract-definitions",
            Stage::ExtractReferences => "extract-references",
            Stage::Finalize => "finalize",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Receives progress events of a run.
pub trait Diagnostics: Send + Sync {
    fn stage_started(&self, stage: Stage);

    fn file_skipped(&self, skipped: &SkippedFile);

    fn run_finished(&self, report: &RunReport);
}

/// Reports run events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn stage_started(&self, stage: Stage) {
        info!(%stage, "Stage started");
    }

    fn file_skipped(&self, skipped: &SkippedFile) {
        warn!(
            path = %skipped.path,
            stage = %skipped.stage,
            cause = %skipped.cause,
            "File skipped"
        );
    }

    fn run_finished(&self, report: &RunReport) {
        if report.is_complete() {
            info!(%report, "Index complete");
        } else {
            warn!(%report, "Index incomplete");
        }
    }
}

/// Run options.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub mode: IndexMode,
    /// Reference extraction workers
    pub jobs: usize,
    /// Collect per-stage wall-clock timings
    pub profile: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: IndexMode::Full,
            jobs: DEFAULT_JOBS,
            profile: false,
        }
    }
}

/// A file whose extraction did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    /// Extraction stage that gave up on the file
    pub stage: String,
    pub cause: String,
}

/// Wall-clock time per stage, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub discover_ms: u128,
    pub definitions_ms: u128,
    pub references_ms: u128,
    pub finalize_ms: u128,
    pub total_ms: u128,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: IndexMode,
    pub started_at: String,
    /// Files extracted (added or modified)
    pub files_attempted: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    /// Files no tokenizer handles
    pub files_unsupported: usize,
    pub references_written: usize,
    pub definitions_written: usize,
    pub skipped: Vec<SkippedFile>,
    /// Batch-level failure of definition extraction
    pub definition_failure: Option<String>,
    /// Files that lost their definitions to the batch failure
    pub definitions_unsent: usize,
    pub cancelled: bool,
    pub timings: Option<StageTimings>,
}

impl RunReport {
    fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            started_at: chrono::Utc::now().to_rfc3339(),
            files_attempted: 0,
            files_unchanged: 0,
            files_removed: 0,
            files_unsupported: 0,
            references_written: 0,
            definitions_written: 0,
            skipped: Vec::new(),
            definition_failure: None,
            definitions_unsent: 0,
            cancelled: false,
            timings: None,
        }
    }

    /// Whether every changed file was fully extracted.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.definition_failure.is_none() && !self.cancelled
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            IndexMode::Full => "full",
            IndexMode::Incremental => "incremental",
        };
        write!(
            f,
            "{} index: {} files extracted, {} unchanged, {} removed, {} references, {} definitions",
            mode,
            self.files_attempted,
            self.files_unchanged,
            self.files_removed,
            self.references_written,
            self.definitions_written
        )?;
        if !self.skipped.is_empty() {
            write!(f, ", {} skipped", self.skipped.len())?;
        }
        if let Some(failure) = &self.definition_failure {
            write!(
                f,
                ", definitions missing for {} files ({})",
                self.definitions_unsent, failure
            )?;
        }
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ReferenceStage {
    written: usize,
    unsupported: usize,
    skipped: Vec<SkippedFile>,
    stale: Vec<FileId>,
    elapsed_ms: u128,
}

#[derive(Debug, Default)]
struct DefinitionStage {
    written: usize,
    failure: Option<String>,
    unsent: usize,
    skipped: Vec<SkippedFile>,
    stale: Vec<FileId>,
    elapsed_ms: u128,
}

/// Builds or updates the tag store of one root.
pub struct IndexBuilder {
    root: PathBuf,
    store: Arc<TagStore>,
    pool: WorkerPool,
    definitions: Arc<dyn DefinitionProvider>,
    diagnostics: Arc<dyn Diagnostics>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(
        root: &Path,
        store: Arc<TagStore>,
        references: ReferenceExtractor,
        definitions: Arc<dyn DefinitionProvider>,
    ) -> Self {
        let options = BuildOptions::default();
        Self {
            root: root.to_path_buf(),
            store,
            pool: WorkerPool::new(Arc::new(references), options.jobs),
            definitions,
            diagnostics: Arc::new(TracingDiagnostics),
            options,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.pool = self.pool.with_limit(options.jobs);
        self.options = options;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    /// Index the files of `listing`.
    pub async fn run(
        &self,
        listing: &Listing,
        cancel: &Cancellation,
    ) -> Result<RunReport, IndexerError> {
        let started = Instant::now();
        let mut report = RunReport::new(self.options.mode);
        let mut timings = StageTimings::default();

        self.diagnostics.stage_started(Stage::Discover);
        let diff = self.discover(listing)?;
        timings.discover_ms = started.elapsed().as_millis();

        report.files_attempted = diff.changed.len();
        report.files_unchanged = diff.unchanged;
        report.files_removed = diff.removed.len();

        let tasks = diff.tasks();

        if !tasks.is_empty() {
            self.store.drop_secondary_indices()?;
        }

        self.diagnostics.stage_started(Stage::ExtractDefinitions);
        self.diagnostics.stage_started(Stage::ExtractReferences);
        let (definitions, references) = tokio::try_join!(
            self.extract_definitions(&tasks, cancel),
            self.extract_references(&tasks, cancel)
        )?;

        let finalize_started = Instant::now();
        self.diagnostics.stage_started(Stage::Finalize);

        if !tasks.is_empty() {
            self.store.rebuild_secondary_indices()?;
        }

        let mut stale = references.stale;
        stale.extend(definitions.stale);
        stale.sort_unstable();
        stale.dedup();
        self.store.mark_stale(&stale)?;
        self.store.finish_run()?;

        timings.definitions_ms = definitions.elapsed_ms;
        timings.references_ms = references.elapsed_ms;
        timings.finalize_ms = finalize_started.elapsed().as_millis();
        timings.total_ms = started.elapsed().as_millis();

        report.references_written = references.written;
        report.files_unsupported = references.unsupported;
        report.definitions_written = definitions.written;
        report.definition_failure = definitions.failure;
        report.definitions_unsent = definitions.unsent;
        report.skipped = references.skipped;
        report.skipped.extend(definitions.skipped);
        report.cancelled = cancel.is_cancelled();
        if self.options.profile {
            report.timings = Some(timings);
        }

        self.diagnostics.stage_started(Stage::Done);
        self.diagnostics.run_finished(&report);

        Ok(report)
    }

    /// Compute and persist the catalog diff.
    fn discover(&self, listing: &Listing) -> Result<CatalogDiff, IndexerError> {
        let catalog = FileCatalog::new(&self.root);

        let diff = match self.options.mode {
            IndexMode::Full => {
                let diff = catalog.diff(&listing.paths, None);
                self.store.reset()?;
                diff
            }
            IndexMode::Incremental => {
                let snapshot = self.store.snapshot()?;
                catalog.diff(&listing.paths, Some(&snapshot))
            }
        };

        catalog.persist(&self.store, &diff)?;
        Ok(diff)
    }

    async fn extract_definitions(
        &self,
        tasks: &[FileTask],
        cancel: &Cancellation,
    ) -> Result<DefinitionStage, IndexerError> {
        let started = Instant::now();
        let mut stage = DefinitionStage::default();

        let summary = extract_batch(
            self.definitions.as_ref(),
            &self.root,
            tasks,
            cancel,
            |task, definitions| {
                stage.written += self.store.replace_definitions(task.file_id, &definitions)?;
                Ok(())
            },
        )
        .await?;

        // Definitions of these files now reflect nothing rather than an
        // earlier version of the file.
        for task in &summary.unsent {
            self.store.replace_definitions(task.file_id, &[])?;
            stage.stale.push(task.file_id);
        }
        for task in &summary.cancelled {
            let skipped = SkippedFile {
                path: task.path.clone(),
                stage: Stage::ExtractDefinitions.to_string(),
                cause: "cancelled".to_string(),
            };
            self.diagnostics.file_skipped(&skipped);
            stage.skipped.push(skipped);
            stage.stale.push(task.file_id);
        }

        stage.failure = summary.failure;
        stage.unsent = summary.unsent.len();
        stage.elapsed_ms = started.elapsed().as_millis();
        Ok(stage)
    }

    async fn extract_references(
        &self,
        tasks: &[FileTask],
        cancel: &Cancellation,
    ) -> Result<ReferenceStage, IndexerError> {
        let started = Instant::now();
        let mut stage = ReferenceStage::default();
        let mut stream = self.pool.run(tasks.to_vec(), cancel.clone());

        while let Some(result) = stream.next().await {
            let cause = match &result.outcome {
                ExtractOutcome::Extracted(references) => {
                    stage.written += self.store.replace_references(result.file_id, references)?;
                    continue;
                }
                ExtractOutcome::Unsupported => {
                    self.store.replace_references(result.file_id, &[])?;
                    stage.unsupported += 1;
                    continue;
                }
                ExtractOutcome::Failed(cause) => {
                    self.store.replace_references(result.file_id, &[])?;
                    cause.clone()
                }
                ExtractOutcome::Cancelled => "cancelled".to_string(),
            };

            let skipped = SkippedFile {
                path: result.path,
                stage: Stage::ExtractReferences.to_string(),
                cause,
            };
            self.diagnostics.file_skipped(&skipped);
            stage.skipped.push(skipped);
            stage.stale.push(result.file_id);
        }

        stage.elapsed_ms = started.elapsed().as_millis();
        Ok(stage)
    }
}
