//! One scheduled run of a model over its pending queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lumen_store::WorkQueue;
use serde::Serialize;
use tracing::info;

use crate::classify::classifier::Classifier;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items taken from the queue for this run
    pub batch: usize,
    pub applied: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub unresolved: usize,
    /// Queue depth after the run
    pub remaining: usize,
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub struct ClassificationJob {
    classifier: Classifier,
    queue: Arc<dyn WorkQueue>,
    batch_size: usize,
}

impl ClassificationJob {
    pub fn new(classifier: Classifier, queue: Arc<dyn WorkQueue>, batch_size: usize) -> Self {
        Self {
            classifier,
            queue,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model(&self) -> &'static str {
        self.classifier.spec().name
    }

    /// Classify up to one batch of the model's pending files.
    pub fn run(&self) -> Result<RunReport> {
        let model = self.model();
        let started_at = Utc::now();
        let items = self.queue.pending(model, self.batch_size)?;
        let batch = items.len();
        info!("[Model {}] Processing {} queued files", model, batch);

        let outcome = if items.is_empty() {
            Default::default()
        } else {
            self.classifier.classify(items)
        };

        Ok(RunReport {
            model: model.to_string(),
            started_at,
            finished_at: Utc::now(),
            batch,
            applied: outcome.applied,
            rejected: outcome.rejected,
            skipped: outcome.skipped,
            unresolved: outcome.unresolved,
            remaining: self.queue.count(model)?,
            error: outcome.error.map(|e| e.to_string()),
        })
    }
}
