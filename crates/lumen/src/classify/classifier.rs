//! A model bound to the generic runner and a result interpreter.

use std::sync::Arc;
use std::time::Duration;

use lumen_store::{WorkItem, WorkQueue};
use lumen_worker::{ClassifierRunner, RunnerError};
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::interpret::{Prepared, ResultInterpreter};
use crate::classify::registry::ModelSpec;

/// What happened to one batch.
#[derive(Debug, Default, Serialize)]
pub struct ClassifyOutcome {
    /// Results persisted
    pub applied: usize,
    /// Results the interpreter could not persist
    pub rejected: usize,
    /// Items dequeued without inference
    pub skipped: usize,
    /// Items not sent because their file could not be resolved
    pub unresolved: usize,
    #[serde(skip)]
    pub error: Option<RunnerError>,
}

pub struct Classifier {
    spec: &'static ModelSpec,
    runner: ClassifierRunner,
    interpreter: Box<dyn ResultInterpreter>,
    queue: Arc<dyn WorkQueue>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(
        spec: &'static ModelSpec,
        runner: ClassifierRunner,
        interpreter: Box<dyn ResultInterpreter>,
        queue: Arc<dyn WorkQueue>,
        timeout: Duration,
    ) -> Self {
        Self {
            spec,
            runner,
            interpreter,
            queue,
            timeout,
        }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.spec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Classify `items`. Rows the interpreter rejects are logged and skipped
    /// (they leave the queue like any consumed result); a process failure
    /// ends the batch and is reported in the outcome.
    pub fn classify(&self, items: Vec<WorkItem>) -> ClassifyOutcome {
        let model = self.spec.name;
        let mut outcome = ClassifyOutcome::default();

        let prepared = match self.interpreter.prepare(items.clone()) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("[Model {}] Could not check preconditions, running all: {}", model, e);
                Prepared {
                    run: items,
                    skipped: Vec::new(),
                }
            }
        };
        for item in &prepared.skipped {
            match self.queue.remove(item) {
                Ok(_) => outcome.skipped += 1,
                Err(e) => warn!(
                    "[Model {}] Failed to dequeue skipped file {}: {}",
                    model, item.file_id, e
                ),
            }
        }
        if prepared.run.is_empty() {
            return outcome;
        }

        let requested = prepared.run.len();
        let stream = match self.runner.run(model, prepared.run, self.timeout) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[Model {}] {}", model, e);
                outcome.error = Some(e);
                return outcome;
            }
        };
        outcome.unresolved = requested - stream.items().len();

        for result in stream {
            match result {
                Ok((item, value)) => match self.interpreter.apply(&item, &value) {
                    Ok(()) => outcome.applied += 1,
                    Err(e) => {
                        warn!(
                            "[Model {}] Discarding result for file {}: {}",
                            model, item.file_id, e
                        );
                        outcome.rejected += 1;
                    }
                },
                Err(e) => {
                    warn!("[Model {}] Batch aborted: {}", model, e);
                    outcome.error = Some(e);
                }
            }
        }

        info!(
            "[Model {}] Batch done: {} applied, {} rejected, {} skipped",
            model, outcome.applied, outcome.rejected, outcome.skipped
        );
        outcome
    }
}
