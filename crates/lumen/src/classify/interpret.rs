//! Turning model output into persisted results.

use std::collections::BTreeSet;
use std::sync::Arc;

use lumen_store::{
    AccessResolver, BoundingBox, DetectionStore, FileId, NewDetection, TagStore, WorkItem,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{LumenError, Result};

/// Split of a batch before inference.
#[derive(Debug, Default, PartialEq)]
pub struct Prepared {
    /// Items to send to the model
    pub run: Vec<WorkItem>,
    /// Items that need no inference; they are dequeued as done
    pub skipped: Vec<WorkItem>,
}

pub trait ResultInterpreter: Send + Sync {
    fn prepare(&self, items: Vec<WorkItem>) -> Result<Prepared> {
        Ok(Prepared {
            run: items,
            skipped: Vec::new(),
        })
    }

    /// Persist the model's result for one file.
    fn apply(&self, item: &WorkItem, value: &Value) -> Result<()>;
}

fn invalid(file_id: FileId, message: impl Into<String>) -> LumenError {
    LumenError::InvalidResult {
        file_id: file_id.get(),
        message: message.into(),
    }
}

/// Stores the returned labels as tags. Models print `{"tags": [...]}`; a
/// bare list is accepted too.
pub struct TagInterpreter {
    tags: Arc<dyn TagStore>,
}

impl TagInterpreter {
    pub fn new(tags: Arc<dyn TagStore>) -> Self {
        Self { tags }
    }
}

impl ResultInterpreter for TagInterpreter {
    fn apply(&self, item: &WorkItem, value: &Value) -> Result<()> {
        let labels = match value {
            Value::Object(fields) => fields.get("tags").and_then(Value::as_array),
            Value::Array(labels) => Some(labels),
            _ => None,
        }
        .ok_or_else(|| invalid(item.file_id, "expected {\"tags\": [...]}"))?;
        let labels: Vec<String> = labels
            .iter()
            .filter_map(|l| l.as_str())
            .map(str::to_string)
            .collect();
        debug!(model = %item.model, file_id = %item.file_id, ?labels, "Tagging");
        if !labels.is_empty() {
            self.tags.assign_tags(item.file_id, &labels)?;
        }
        Ok(())
    }
}

/// Like [`TagInterpreter`], but files already carrying one of `skip_tags`
/// are not sent to the model.
pub struct LandmarkInterpreter {
    tagger: TagInterpreter,
    tags: Arc<dyn TagStore>,
    skip_tags: BTreeSet<String>,
}

impl LandmarkInterpreter {
    pub fn new(tags: Arc<dyn TagStore>, skip_tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            tagger: TagInterpreter::new(tags.clone()),
            tags,
            skip_tags: skip_tags.into_iter().collect(),
        }
    }
}

impl ResultInterpreter for LandmarkInterpreter {
    fn prepare(&self, items: Vec<WorkItem>) -> Result<Prepared> {
        if self.skip_tags.is_empty() {
            return Ok(Prepared {
                run: items,
                skipped: Vec::new(),
            });
        }
        let ids: Vec<FileId> = items.iter().map(|i| i.file_id).collect();
        let existing = self.tags.tags_for_files(&ids)?;
        let (skipped, run): (Vec<WorkItem>, Vec<WorkItem>) = items.into_iter().partition(|item| {
            existing
                .get(&item.file_id)
                .map_or(false, |tags| tags.iter().any(|t| self.skip_tags.contains(t)))
        });
        Ok(Prepared { run, skipped })
    }

    fn apply(&self, item: &WorkItem, value: &Value) -> Result<()> {
        self.tagger.apply(item, value)
    }
}

/// One face as reported by the face model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub score: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub vector: Vec<f32>,
}

/// Replaces the file's detections with one row per confident face per user
/// who can see the file.
pub struct FaceInterpreter {
    detections: Arc<dyn DetectionStore>,
    access: Arc<dyn AccessResolver>,
    min_score: f64,
}

impl FaceInterpreter {
    pub fn new(
        detections: Arc<dyn DetectionStore>,
        access: Arc<dyn AccessResolver>,
        min_score: f64,
    ) -> Self {
        Self {
            detections,
            access,
            min_score,
        }
    }
}

impl ResultInterpreter for FaceInterpreter {
    fn apply(&self, item: &WorkItem, value: &Value) -> Result<()> {
        let faces = Vec::<FaceResult>::deserialize(value)
            .map_err(|e| invalid(item.file_id, format!("bad face list: {}", e)))?;

        let removed = self.detections.delete_detections_for_file(item.file_id)?;
        let users = self.access.users_with_access(item.file_id)?;

        let mut inserted = 0;
        for face in faces.iter().filter(|f| f.score >= self.min_score) {
            for user in &users {
                self.detections.insert_detection(NewDetection {
                    file_id: item.file_id,
                    user_id: user.clone(),
                    bbox: BoundingBox {
                        x: face.x,
                        y: face.y,
                        width: face.width,
                        height: face.height,
                    },
                    vector: face.vector.clone(),
                })?;
                inserted += 1;
            }
        }
        debug!(
            file_id = %item.file_id,
            faces = faces.len(),
            removed,
            inserted,
            "Stored face detections"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::{FileId, MemoryStore, StorageId};
    use serde_json::json;

    fn item(model: &str, id: u64) -> WorkItem {
        WorkItem {
            model: model.to_string(),
            file_id: FileId::new(id),
            storage_id: StorageId::new(1),
            root_id: FileId::new(1),
            update: false,
        }
    }

    #[test]
    fn test_tags_assigned_from_tags_field() {
        let store = Arc::new(MemoryStore::new());
        let interpreter = TagInterpreter::new(store.clone());
        interpreter
            .apply(&item("imagenet", 5), &json!({"tags": ["cat", "animal"]}))
            .unwrap();
        let mut tags = store.tags_for_file(FileId::new(5)).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["animal", "cat"]);

        assert!(interpreter
            .apply(&item("imagenet", 5), &json!({"oops": true}))
            .is_err());
        assert!(interpreter
            .apply(&item("imagenet", 5), &json!({"tags": "cat"}))
            .is_err());
    }

    #[test]
    fn test_bare_label_list_is_accepted() {
        let store = Arc::new(MemoryStore::new());
        let interpreter = TagInterpreter::new(store.clone());
        interpreter.apply(&item("imagenet", 6), &json!(["dog"])).unwrap();
        assert_eq!(store.tags_for_file(FileId::new(6)).unwrap(), vec!["dog"]);
    }

    #[test]
    fn test_landmarks_skip_disqualified_files() {
        let store = Arc::new(MemoryStore::new());
        store.assign_tags(FileId::new(1), &["people".to_string()]).unwrap();
        store.assign_tags(FileId::new(2), &["building".to_string()]).unwrap();
        let interpreter = LandmarkInterpreter::new(store.clone(), vec!["people".to_string()]);

        let prepared = interpreter
            .prepare(vec![item("landmarks", 1), item("landmarks", 2), item("landmarks", 3)])
            .unwrap();
        let run: Vec<u64> = prepared.run.iter().map(|i| i.file_id.get()).collect();
        let skipped: Vec<u64> = prepared.skipped.iter().map(|i| i.file_id.get()).collect();
        assert_eq!(run, vec![2, 3]);
        assert_eq!(skipped, vec![1]);
    }
}
