//! Classifier Runner: spawns the model process and streams its results
//!
//! ## Protocol
//! The child is started as `<runtime> <script> -`. Stdin receives the local
//! paths of the batch, one per line, then EOF. Stdout carries one JSON value
//! per input file, in input order; a value may span several lines. Stderr is
//! kept (capped) for diagnostics only.
//!
//! ## Delivery
//! Results are yielded as soon as they parse. A work item is removed from the
//! queue only after the consumer has taken its result, i.e. on the following
//! `next()` call or at the end of the stream. A crash or kill in between
//! leaves the item queued, so every file is classified at least once.
//!
//! ## Timeouts
//! The whole batch gets `resolved_files * per_item_timeout`. Timeouts and
//! cancellation kill the child.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lumen_store::{FileStore, StoreError, WorkItem, WorkQueue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;

/// How often the read loop wakes up to check cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a finished process is polled for its exit status
const REAP_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for the stderr collector once the process is gone
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Default cap on captured stderr (64 KB)
const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("[Model {model}] classifier exceeded its {timeout:?} budget")]
    ProcessTimeout { model: String, timeout: Duration },

    #[error("Failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("[Model {model}] protocol violation: {message}")]
    ProcessProtocol { model: String, message: String },

    #[error("[Model {model}] cancelled")]
    Cancelled { model: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Execution flags forwarded to the model process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMode {
    /// No native acceleration; models are expected to run much slower
    pub pure_software: bool,
    pub gpu: bool,
    /// Pin the process to the first `n` cores
    pub cores: Option<usize>,
}

impl ExecutionMode {
    fn env(&self, model: &str) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("LUMEN_MODEL", model.to_string()),
            ("LUMEN_PURE_SOFTWARE", self.pure_software.to_string()),
            ("LUMEN_GPU", self.gpu.to_string()),
        ];
        if let Some(cores) = self.cores {
            vars.push(("LUMEN_CORES", cores.to_string()));
        }
        vars
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Interpreter or binary that runs the script (e.g. `python3`)
    pub runtime: PathBuf,
    pub script: PathBuf,
    pub mode: ExecutionMode,
    pub stderr_limit: usize,
}

impl RunnerConfig {
    pub fn new(runtime: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            script: script.into(),
            mode: ExecutionMode::default(),
            stderr_limit: DEFAULT_STDERR_LIMIT,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Binds a model process to the file store (for path resolution) and the
/// work queue (for acknowledgement).
pub struct ClassifierRunner {
    config: RunnerConfig,
    files: Arc<dyn FileStore>,
    queue: Arc<dyn WorkQueue>,
    cancel: CancellationToken,
}

impl ClassifierRunner {
    pub fn new(config: RunnerConfig, files: Arc<dyn FileStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            config,
            files,
            queue,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start one process for `items` and return the stream of its results.
    ///
    /// Items whose file can no longer be resolved to a local path are logged
    /// and dropped. If none resolve, no process is started.
    pub fn run(
        &self,
        model: &str,
        items: Vec<WorkItem>,
        per_item_timeout: Duration,
    ) -> Result<ClassifierStream> {
        let mut resolved = Vec::with_capacity(items.len());
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            match self.files.local_path(item.file_id) {
                Ok(Some(path)) => {
                    paths.push(path);
                    resolved.push(item);
                }
                Ok(None) => {
                    warn!("[Model {}] File {} no longer exists, skipping", model, item.file_id);
                }
                Err(e) => {
                    warn!(
                        "[Model {}] Could not resolve file {}: {}",
                        model, item.file_id, e
                    );
                }
            }
        }

        let mut stream = ClassifierStream {
            model: model.to_string(),
            items: resolved,
            queue: Arc::clone(&self.queue),
            cancel: self.cancel.clone(),
            budget: Duration::ZERO,
            deadline: Instant::now(),
            child: None,
            lines: None,
            stderr: None,
            buffer: String::new(),
            next_index: 0,
            unacked: None,
            done: false,
        };
        if stream.items.is_empty() {
            debug!("[Model {}] Nothing to classify", model);
            stream.done = true;
            return Ok(stream);
        }

        let count = u32::try_from(stream.items.len()).unwrap_or(u32::MAX);
        stream.budget = per_item_timeout.saturating_mul(count);

        let mut child = self.spawn(model)?;
        let started = Instant::now();
        stream.deadline = started
            .checked_add(stream.budget)
            .unwrap_or(started + Duration::from_secs(365 * 24 * 3600));
        info!(
            "[Model {}] Started classifier (pid={}) for {} files, budget {:?}",
            model,
            child.id(),
            stream.items.len(),
            stream.budget
        );

        if let Some(stdin) = child.stdin.take() {
            feed_paths(stdin, paths);
        }
        stream.lines = child.stdout.take().map(read_lines);
        stream.stderr = child
            .stderr
            .take()
            .map(|stderr| collect_stderr(stderr, self.config.stderr_limit));
        stream.child = Some(child);
        Ok(stream)
    }

    fn spawn(&self, model: &str) -> Result<Child> {
        if let Some(cores) = self.config.mode.cores.filter(|n| *n > 0) {
            if let Ok(taskset) = which::which("taskset") {
                let mut cmd = Command::new(taskset);
                cmd.arg("-c")
                    .arg(format!("0-{}", cores - 1))
                    .arg(&self.config.runtime);
                match self.spawn_with(cmd, model) {
                    Ok(child) => return Ok(child),
                    Err(e) => debug!("[Model {}] CPU pinning unavailable: {}", model, e),
                }
            }
        }
        self.spawn_with(Command::new(&self.config.runtime), model)
    }

    fn spawn_with(&self, mut cmd: Command, model: &str) -> Result<Child> {
        cmd.arg(&self.config.script)
            .arg("-")
            .envs(self.config.mode.env(model))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|source| RunnerError::ProcessLaunch {
            program: format!(
                "{} {}",
                self.config.runtime.display(),
                self.config.script.display()
            ),
            source,
        })
    }
}

fn feed_paths(mut stdin: impl Write + Send + 'static, paths: Vec<PathBuf>) {
    thread::spawn(move || {
        for path in paths {
            let line = format!("{}\n", path.display());
            if let Err(e) = stdin.write_all(line.as_bytes()) {
                debug!("Classifier stopped reading its input: {}", e);
                return;
            }
        }
        let _ = stdin.flush();
    });
}

fn read_lines(stdout: ChildStdout) -> Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn collect_stderr(stderr: ChildStderr, limit: usize) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut reader = stderr;
        let _ = (&mut reader).take(limit as u64).read_to_end(&mut captured);
        // Keep draining so the child never blocks on a full pipe
        let _ = io::copy(&mut reader, &mut io::sink());
        String::from_utf8_lossy(&captured).into_owned()
    })
}

/// Ordered results of one classifier process.
///
/// Yields `(item, value)` pairs in input order and ends with at most one
/// error. Dropping the stream kills the process if it is still running; an
/// item whose result was yielded but not yet acknowledged stays queued.
pub struct ClassifierStream {
    model: String,
    items: Vec<WorkItem>,
    queue: Arc<dyn WorkQueue>,
    cancel: CancellationToken,
    budget: Duration,
    deadline: Instant,
    child: Option<Child>,
    lines: Option<Receiver<io::Result<String>>>,
    stderr: Option<JoinHandle<String>>,
    buffer: String,
    next_index: usize,
    unacked: Option<WorkItem>,
    done: bool,
}

impl ClassifierStream {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Items that resolved to a local path, in the order sent to the process.
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    fn acknowledge(&mut self) {
        if let Some(item) = self.unacked.take() {
            match self.queue.remove(&item) {
                Ok(_) => debug!("[Model {}] Dequeued file {}", self.model, item.file_id),
                Err(e) => warn!(
                    "[Model {}] Failed to dequeue file {}: {}",
                    self.model, item.file_id, e
                ),
            }
        }
    }

    fn abort(&mut self, err: RunnerError) -> Option<Result<(WorkItem, Value)>> {
        self.kill();
        self.done = true;
        let stderr = self.take_stderr();
        if !stderr.is_empty() {
            error!("[Model {}] Classifier stderr:\n{}", self.model, stderr);
        }
        Some(Err(err))
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Captured stderr. Gives up if a leftover grandchild keeps the pipe open.
    fn take_stderr(&mut self) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        let give_up = Instant::now() + STDERR_GRACE;
        while !handle.is_finished() {
            if Instant::now() >= give_up {
                return String::new();
            }
            thread::sleep(REAP_INTERVAL);
        }
        handle.join().unwrap_or_default()
    }

    fn protocol_error(&self, message: String) -> RunnerError {
        RunnerError::ProcessProtocol {
            model: self.model.clone(),
            message,
        }
    }

    /// Stdout closed: reap the process and check the result count.
    fn finish(&mut self) -> Option<Result<(WorkItem, Value)>> {
        let status = match self.wait_for_exit() {
            Ok(status) => status,
            Err(err) => return self.abort(err),
        };
        self.done = true;
        let stderr = self.take_stderr();

        if !self.buffer.trim().is_empty() {
            debug!(
                "[Model {}] Discarding unparsable trailing output ({} bytes)",
                self.model,
                self.buffer.len()
            );
        }

        if self.next_index != self.items.len() {
            if !stderr.is_empty() {
                error!("[Model {}] Classifier stderr:\n{}", self.model, stderr);
            }
            return Some(Err(self.protocol_error(format!(
                "received {} results for {} files (exit status: {})",
                self.next_index,
                self.items.len(),
                describe(status)
            ))));
        }

        if status.map_or(false, |s| !s.success()) {
            warn!(
                "[Model {}] Classifier exited with {} after delivering all results",
                self.model,
                describe(status)
            );
        }
        if !stderr.is_empty() {
            debug!("[Model {}] Classifier stderr:\n{}", self.model, stderr);
        }
        info!(
            "[Model {}] Classifier finished, {} results",
            self.model, self.next_index
        );
        None
    }

    fn wait_for_exit(&mut self) -> Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        loop {
            if self.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled {
                    model: self.model.clone(),
                });
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.child = None;
                    return Ok(Some(status));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(RunnerError::ProcessProtocol {
                        model: self.model.clone(),
                        message: format!("could not reap process: {}", e),
                    })
                }
            }
            if Instant::now() >= self.deadline {
                return Err(RunnerError::ProcessTimeout {
                    model: self.model.clone(),
                    timeout: self.budget,
                });
            }
            thread::sleep(REAP_INTERVAL);
        }
    }
}

fn describe(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown".to_string(),
    }
}

impl Iterator for ClassifierStream {
    type Item = Result<(WorkItem, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.acknowledge();
        if self.done {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                let model = self.model.clone();
                return self.abort(RunnerError::Cancelled { model });
            }
            let now = Instant::now();
            if now >= self.deadline {
                warn!(
                    "[Model {}] Timed out after {:?}, killing classifier",
                    self.model, self.budget
                );
                let err = RunnerError::ProcessTimeout {
                    model: self.model.clone(),
                    timeout: self.budget,
                };
                return self.abort(err);
            }

            let Some(lines) = self.lines.as_ref() else {
                return self.finish();
            };
            let line = match lines.recv_timeout((self.deadline - now).min(POLL_INTERVAL)) {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    let err = self.protocol_error(format!("unreadable output: {}", e));
                    return self.abort(err);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.lines = None;
                    return self.finish();
                }
            };

            if self.buffer.is_empty() && line.trim().is_empty() {
                continue;
            }
            self.buffer.push_str(&line);
            let value = match serde_json::from_str::<Value>(&self.buffer) {
                Ok(value) => value,
                Err(_) => {
                    self.buffer.push('\n');
                    continue;
                }
            };
            self.buffer.clear();

            let Some(item) = self.items.get(self.next_index).cloned() else {
                let err = self.protocol_error(format!(
                    "more results than the {} files sent",
                    self.items.len()
                ));
                return self.abort(err);
            };
            self.next_index += 1;
            self.unacked = Some(item.clone());
            return Some(Ok((item, value)));
        }
    }
}

impl Drop for ClassifierStream {
    fn drop(&mut self) {
        if self.child.is_some() {
            debug!("[Model {}] Stream dropped early, killing classifier", self.model);
            self.kill();
        }
    }
}
