//! Definition extraction through an external line-protocol process.
//!
//! One process serves a whole batch. For every file the path is written as
//! a single line; the process answers with zero or more
//! `<symbol> <line> <path> <signature...>` lines followed by a terminator
//! line. Files are handled strictly in submission order.

use crate::cancel::Cancellation;
use crate::records::{DefinitionRecord, FileId, FileTask};
use crate::IndexerError;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Line that closes the response for one file.
pub const TERMINATOR: &str = "###terminator###";

/// Default definition program.
pub const DEFAULT_CTAGS_PROGRAM: &str = "ctags";

/// Default `--format` passed to the definition program.
pub const DEFAULT_CTAGS_FORMAT: u32 = 1;

/// How long a terminated process gets to exit before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// An open definition extraction session.
#[async_trait]
pub trait DefinitionSource: Send {
    /// Definitions found in `path`.
    async fn definitions(
        &mut self,
        path: &str,
        file_id: FileId,
    ) -> Result<Vec<DefinitionRecord>, IndexerError>;

    /// Release the session. Called exactly once, on every exit path.
    async fn shutdown(&mut self);
}

/// Opens definition sessions rooted at a directory.
#[async_trait]
pub trait DefinitionProvider: Send + Sync {
    async fn open(&self, root: &Path) -> Result<Box<dyn DefinitionSource>, IndexerError>;
}

/// Request/response framing over any pair of byte streams.
pub struct LineProtocol<R, W> {
    reader: R,
    writer: W,
    line: Vec<u8>,
}

impl<R, W> LineProtocol<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: Vec::new(),
        }
    }

    /// Submit one path and collect the definitions until the terminator.
    pub async fn request(
        &mut self,
        path: &str,
        file_id: FileId,
    ) -> Result<Vec<DefinitionRecord>, IndexerError> {
        let pattern = definition_pattern(path)?;

        let request = format!("{}\n", path);
        let sent = async {
            self.writer.write_all(request.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = sent {
            return Err(IndexerError::ProcessExited {
                path: path.to_string(),
                message: e.to_string(),
            });
        }

        let mut definitions = Vec::new();

        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| IndexerError::ProcessExited {
                    path: path.to_string(),
                    message: e.to_string(),
                })?;
            if read == 0 {
                return Err(IndexerError::ProcessExited {
                    path: path.to_string(),
                    message: "unexpected end of output".to_string(),
                });
            }

            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim_end_matches(['\n', '\r']);

            if text == TERMINATOR {
                break;
            }

            match parse_definition(&pattern, text, file_id) {
                Some(definition) => definitions.push(definition),
                None => debug!(path, line = text, "Discarded definition line"),
            }
        }

        Ok(definitions)
    }
}

/// Pattern for output lines that belong to `path`.
fn definition_pattern(path: &str) -> Result<Regex, IndexerError> {
    Ok(Regex::new(&format!(
        r"^(\S+)\s+(\d+)\s+{}\s+(.*)$",
        regex::escape(path)
    ))?)
}

fn parse_definition(pattern: &Regex, text: &str, file_id: FileId) -> Option<DefinitionRecord> {
    let captures = pattern.captures(text)?;
    let line = captures[2].parse().ok()?;
    Some(DefinitionRecord {
        symbol: captures[1].to_string(),
        file_id,
        line,
        signature: captures[3].to_string(),
    })
}

/// Launches `ctags` (or a compatible program) in filter mode.
#[derive(Debug, Clone)]
pub struct CtagsProvider {
    program: String,
    args: Vec<String>,
    grace: Duration,
}

impl CtagsProvider {
    pub fn new(program: impl Into<String>, format: u32) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "-xu".to_string(),
                "--filter".to_string(),
                format!("--filter-terminator={}\n", TERMINATOR),
                format!("--format={}", format),
            ],
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Run an arbitrary command speaking the same protocol.
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            grace: SHUTDOWN_GRACE,
        }
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Default for CtagsProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CTAGS_PROGRAM, DEFAULT_CTAGS_FORMAT)
    }
}

#[async_trait]
impl DefinitionProvider for CtagsProvider {
    async fn open(&self, root: &Path) -> Result<Box<dyn DefinitionSource>, IndexerError> {
        let spawn_error = |source: std::io::Error| IndexerError::ProcessSpawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin not captured",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdout not captured",
            ))
        })?;

        info!(program = %self.program, pid = ?child.id(), "Started definition process");

        Ok(Box::new(CtagsProcess {
            child,
            protocol: LineProtocol::new(BufReader::new(stdout), stdin),
            grace: self.grace,
        }))
    }
}

/// A running definition process.
pub struct CtagsProcess {
    child: Child,
    protocol: LineProtocol<BufReader<ChildStdout>, ChildStdin>,
    grace: Duration,
}

impl CtagsProcess {
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                return;
            }
        }

        let _ = self.child.start_kill();
    }
}

#[async_trait]
impl DefinitionSource for CtagsProcess {
    async fn definitions(
        &mut self,
        path: &str,
        file_id: FileId,
    ) -> Result<Vec<DefinitionRecord>, IndexerError> {
        self.protocol.request(path, file_id).await
    }

    async fn shutdown(&mut self) {
        self.terminate();

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Definition process exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for definition process"),
            Err(_) => {
                warn!("Definition process ignored termination, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}

/// What happened to a definition batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Files whose definitions were delivered
    pub completed: usize,
    /// Total definitions delivered
    pub definitions: usize,
    /// Files lost to a batch-level failure (including the one in flight)
    pub unsent: Vec<FileTask>,
    /// Files never submitted because the run was cancelled
    pub cancelled: Vec<FileTask>,
    /// Cause of the batch-level failure, if any
    pub failure: Option<String>,
}

impl BatchSummary {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.cancelled.is_empty()
    }
}

/// Run one batch, handing each file's definitions to `on_file` as soon as
/// they arrive.
///
/// Process failures end the batch and are reported in the summary; only
/// errors returned by `on_file` are propagated. The session is shut down on
/// every path.
pub async fn extract_batch<F>(
    provider: &dyn DefinitionProvider,
    root: &Path,
    files: &[FileTask],
    cancel: &Cancellation,
    mut on_file: F,
) -> Result<BatchSummary, IndexerError>
where
    F: FnMut(&FileTask, Vec<DefinitionRecord>) -> Result<(), IndexerError>,
{
    let mut summary = BatchSummary::default();

    if files.is_empty() {
        return Ok(summary);
    }

    let mut source = match provider.open(root).await {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, files = files.len(), "Definition extraction unavailable");
            summary.failure = Some(e.to_string());
            summary.unsent = files.to_vec();
            return Ok(summary);
        }
    };

    let mut sink_error = None;

    for (index, task) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = files[index..].to_vec();
            break;
        }

        match source.definitions(&task.path, task.file_id).await {
            Ok(definitions) => {
                let count = definitions.len();
                if let Err(e) = on_file(task, definitions) {
                    sink_error = Some(e);
                    break;
                }
                summary.completed += 1;
                summary.definitions += count;
            }
            Err(e) => {
                warn!(
                    path = %task.path,
                    remaining = files.len() - index,
                    error = %e,
                    "Definition batch failed"
                );
                summary.failure = Some(e.to_string());
                summary.unsent = files[index..].to_vec();
                break;
            }
        }
    }

    source.shutdown().await;

    if let Some(e) = sink_error {
        return Err(e);
    }

    info!(
        files = summary.completed,
        definitions = summary.definitions,
        unsent = summary.unsent.len(),
        cancelled = summary.cancelled.len(),
        "Definition batch finished"
    );

    Ok(summary)
}

/// Run one batch and collect the definitions per file id.
pub async fn collect_definitions(
    provider: &dyn DefinitionProvider,
    root: &Path,
    files: &[FileTask],
) -> Result<(HashMap<FileId, Vec<DefinitionRecord>>, BatchSummary), IndexerError> {
    let mut collected = HashMap::new();
    let summary = extract_batch(provider, root, files, &Cancellation::new(), |task, defs| {
        collected.insert(task.file_id, defs);
        Ok(())
    })
    .await?;
    Ok((collected, summary))
}
