//! Per-modality eligibility rules.

use std::collections::BTreeSet;

use lumen_store::{FileStore, Node, UserId};

use crate::config::ModalitySettings;
use crate::error::Result;
use crate::modality::Modality;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub modality: Modality,
    pub formats: BTreeSet<String>,
    pub ignore_markers: Vec<String>,
    /// Largest file size accepted in bytes; 0 accepts any size
    pub max_size: u64,
}

impl EligibilityFilter {
    pub fn new(
        modality: Modality,
        formats: impl IntoIterator<Item = impl Into<String>>,
        ignore_markers: impl IntoIterator<Item = impl Into<String>>,
        max_size: u64,
    ) -> Self {
        Self {
            modality,
            formats: formats.into_iter().map(Into::into).collect(),
            ignore_markers: ignore_markers.into_iter().map(Into::into).collect(),
            max_size,
        }
    }

    pub fn from_settings(settings: &ModalitySettings) -> Self {
        Self::new(
            settings.modality,
            settings.mime_types.iter().cloned(),
            settings.ignore_markers.iter().cloned(),
            settings.max_size,
        )
    }

    /// Whether `node` should be classified on behalf of `user`.
    ///
    /// Files reached through another user's shared mount are left to their
    /// owner's crawl.
    pub fn is_file_eligible(&self, user: &UserId, node: &Node) -> bool {
        if !node.is_file() {
            return false;
        }
        if node.shared_mount && &node.owner != user {
            return false;
        }
        if !self.formats.contains(&node.mime) {
            return false;
        }
        self.max_size == 0 || node.size <= self.max_size
    }

    /// Whether `folder` directly contains one of this modality's markers.
    pub fn is_directory_ignored(&self, files: &dyn FileStore, folder: &Node) -> Result<bool> {
        for marker in &self.ignore_markers {
            if files.child_exists(folder, marker)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn is_marker(&self, name: &str) -> bool {
        self.ignore_markers.iter().any(|m| m == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::{FileId, MemoryFileStore, NodeKind, StorageId};

    fn image_filter(max_size: u64) -> EligibilityFilter {
        EligibilityFilter::new(
            Modality::Image,
            ["image/jpeg", "image/png"],
            [".nomedia", ".noimage"],
            max_size,
        )
    }

    #[test]
    fn test_mime_and_size() {
        let files = MemoryFileStore::new();
        let alice = UserId::new("alice");
        let root = files.add_storage(&alice).unwrap();
        let small = files.add_file(&root, "a.jpg", "image/jpeg", 10).unwrap();
        let big = files.add_file(&root, "b.png", "image/png", 10_000).unwrap();
        let text = files.add_file(&root, "c.txt", "text/plain", 1).unwrap();

        let capped = image_filter(1_000);
        assert!(capped.is_file_eligible(&alice, &small));
        assert!(!capped.is_file_eligible(&alice, &big));
        assert!(!capped.is_file_eligible(&alice, &text));
        assert!(image_filter(0).is_file_eligible(&alice, &big));
    }

    #[test]
    fn test_foreign_shared_mount_is_ineligible() {
        let node = Node {
            id: FileId::new(7),
            storage_id: StorageId::new(1),
            root_id: FileId::new(1),
            owner: UserId::new("bob"),
            shared_mount: true,
            path: "shared/a.jpg".to_string(),
            kind: NodeKind::File,
            mime: "image/jpeg".to_string(),
            size: 1,
        };
        let filter = image_filter(0);
        assert!(!filter.is_file_eligible(&UserId::new("alice"), &node));
        assert!(filter.is_file_eligible(&UserId::new("bob"), &node));
    }

    #[test]
    fn test_directory_ignored_by_marker() {
        let files = MemoryFileStore::new();
        let root = files.add_storage(&UserId::new("alice")).unwrap();
        let private = files.add_dir(&root, "private").unwrap();
        files
            .add_file(&private, ".noimage", "application/octet-stream", 0)
            .unwrap();
        let music = files.add_dir(&root, "music").unwrap();
        files
            .add_file(&music, ".nomusic", "application/octet-stream", 0)
            .unwrap();

        let filter = image_filter(0);
        assert!(filter.is_directory_ignored(&files, &private).unwrap());
        assert!(!filter.is_directory_ignored(&files, &music).unwrap());
        assert!(!filter.is_directory_ignored(&files, &root).unwrap());
    }
}
