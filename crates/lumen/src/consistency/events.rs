//! File-system notifications fed to the maintainer.

use lumen_store::Node;
use serde::Serialize;

use crate::consistency::maintainer::ConsistencyMaintainer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FileEvent {
    Created(Node),
    /// Delivered while the node still exists
    Deleted(Node),
    Written(Node),
    BeforeMove(Node),
    AfterMove { source: Node, target: Node },
    ShareAccepted(Node),
    ShareRevoked(Node),
}

impl FileEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FileEvent::Created(_) => "created",
            FileEvent::Deleted(_) => "deleted",
            FileEvent::Written(_) => "written",
            FileEvent::BeforeMove(_) => "before_move",
            FileEvent::AfterMove { .. } => "after_move",
            FileEvent::ShareAccepted(_) => "share_accepted",
            FileEvent::ShareRevoked(_) => "share_revoked",
        }
    }
}

impl ConsistencyMaintainer {
    pub fn handle(&self, event: &FileEvent) {
        match event {
            FileEvent::Created(node) => self.node_created(node),
            FileEvent::Deleted(node) => self.node_deleted(node),
            FileEvent::Written(node) => self.node_written(node),
            FileEvent::BeforeMove(node) => self.before_move(node),
            FileEvent::AfterMove { source, target } => self.after_move(source, target),
            FileEvent::ShareAccepted(node) => self.share_accepted(node),
            FileEvent::ShareRevoked(node) => self.share_revoked(node),
        }
    }
}
