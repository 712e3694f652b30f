//! Keeps queues and detections in step with file-system changes.
//!
//! Two properties are maintained: every eligible, non-ignored file has one
//! work item per enabled model of its modality until it is classified, and a
//! file's face detections exist for exactly the users who can see it.
//! Handlers never fail; problems are logged and the event is dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use lumen_store::{
    parent_of, AccessResolver, DetectionStore, FileId, FileStore, Node, StoreError, UserId,
    WorkItem, WorkQueue,
};
use tracing::{debug, info, warn};

use crate::classify::registry;
use crate::config::LumenConfig;
use crate::context::Collaborators;
use crate::discovery::{EligibilityFilter, Finder, IgnoreCache, TreeCrawler};
use crate::error::Result;
use crate::modality::Modality;

/// One modality with at least one enabled model.
struct Watch {
    filter: EligibilityFilter,
    models: Vec<String>,
}

/// State captured by `before_move`, consumed by `after_move`.
#[derive(Debug, Clone, Default)]
struct MoveSnapshot {
    /// Ignore state per watch, in watch order
    ignored: Vec<bool>,
    users: HashMap<FileId, Vec<UserId>>,
}

pub struct ConsistencyMaintainer {
    files: Arc<dyn FileStore>,
    access: Arc<dyn AccessResolver>,
    queue: Arc<dyn WorkQueue>,
    detections: Arc<dyn DetectionStore>,
    watches: Vec<Watch>,
    ignore: IgnoreCache,
    moves: Mutex<HashMap<FileId, MoveSnapshot>>,
}

impl ConsistencyMaintainer {
    pub fn new(stores: &Collaborators, config: &LumenConfig) -> Result<Self> {
        let mut watches = Vec::new();
        for modality in Modality::ALL {
            let models: Vec<String> = config
                .enabled_models_for(modality)
                .iter()
                .map(|m| m.name.to_string())
                .collect();
            if models.is_empty() {
                continue;
            }
            let filter = EligibilityFilter::from_settings(&config.modality(modality)?);
            watches.push(Watch { filter, models });
        }
        Ok(Self {
            files: stores.files.clone(),
            access: stores.access.clone(),
            queue: stores.queue.clone(),
            detections: stores.detections.clone(),
            watches,
            ignore: IgnoreCache::new(stores.files.clone()),
            moves: Mutex::new(HashMap::new()),
        })
    }

    /// Modalities being maintained, in handling order.
    pub fn modalities(&self) -> Vec<Modality> {
        self.watches.iter().map(|w| w.filter.modality).collect()
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub fn node_created(&self, node: &Node) {
        let result = self.on_created(node);
        self.report("created", node, result);
    }

    /// Must be delivered while `node` still exists in the file store.
    pub fn node_deleted(&self, node: &Node) {
        let result = self.on_deleted(node);
        self.report("deleted", node, result);
    }

    pub fn node_written(&self, node: &Node) {
        let result = self.on_written(node);
        self.report("written", node, result);
    }

    pub fn before_move(&self, source: &Node) {
        let result = self.on_before_move(source);
        self.report("before_move", source, result);
    }

    /// `source` is the node as it was before the move, `target` as it is now.
    pub fn after_move(&self, source: &Node, target: &Node) {
        let result = self.on_after_move(source, target);
        self.report("after_move", target, result);
    }

    pub fn share_accepted(&self, node: &Node) {
        let result = self.reconcile_subtree(node);
        self.report("share_accepted", node, result);
    }

    pub fn share_revoked(&self, node: &Node) {
        let result = self.reconcile_subtree(node);
        self.report("share_revoked", node, result);
    }

    fn report(&self, event: &str, node: &Node, result: Result<()>) {
        match result {
            Ok(()) => debug!(event, file_id = %node.id, path = %node.path, "Handled file event"),
            Err(e) => warn!(
                event,
                file_id = %node.id,
                path = %node.path,
                error = %e,
                "Dropping file event after failure"
            ),
        }
    }

    // ========================================================================
    // Event logic
    // ========================================================================

    fn on_created(&self, node: &Node) -> Result<()> {
        if node.is_file() && self.is_any_marker(node.name()) {
            self.ignore.invalidate(node.storage_id)?;
            let Some(parent) = self.parent_node(node)? else {
                return Ok(());
            };
            for watch in self.watches.iter().filter(|w| w.filter.is_marker(node.name())) {
                let removed = self.unqueue_subtree(watch, &parent)?;
                info!(
                    modality = %watch.filter.modality,
                    path = %parent.path,
                    removed,
                    "Ignore marker added"
                );
            }
            return Ok(());
        }

        if node.is_dir() {
            // A new directory may arrive with markers already inside
            self.ignore.invalidate(node.storage_id)?;
            let finders = self.finders_where(|watch| {
                self.ignore
                    .has_ignored_ancestor(node.storage_id, &node.path, &watch.filter.ignore_markers)
                    .map(|ignored| !ignored)
            })?;
            if !finders.is_empty() {
                TreeCrawler::new(self.files.clone()).crawl(&node.owner, node, &finders);
            }
            return Ok(());
        }

        for watch in &self.watches {
            if watch.filter.is_file_eligible(&node.owner, node) && !self.is_ignored(watch, node)? {
                self.queue_file(watch, node, false)?;
            }
        }
        Ok(())
    }

    fn on_deleted(&self, node: &Node) -> Result<()> {
        if node.is_file() && self.is_any_marker(node.name()) {
            let Some(parent) = self.parent_node(node)? else {
                return self.ignore.invalidate(node.storage_id);
            };
            // The marker is still present, so markers are checked against the
            // store directly (skipping the one going away) rather than through
            // the cache, which would pick the stale marker up again.
            let finders = self.finders_where(|watch| {
                if !watch.filter.is_marker(node.name()) {
                    return Ok(false);
                }
                for marker in &watch.filter.ignore_markers {
                    if marker != node.name() && self.files.child_exists(&parent, marker)? {
                        return Ok(false);
                    }
                }
                self.ancestor_ignored(watch, &parent).map(|ignored| !ignored)
            })?;
            if !finders.is_empty() {
                let stats = TreeCrawler::new(self.files.clone()).crawl_contents(
                    &parent.owner,
                    &parent,
                    &finders,
                );
                info!(path = %parent.path, queued = stats.matches, "Ignore marker removed");
            }
            return self.ignore.invalidate(node.storage_id);
        }

        if node.is_dir() {
            self.ignore.invalidate(node.storage_id)?;
        }
        for file in self.subtree_files(node)? {
            let unqueued = self.queue.remove_all_for_file(file.id)?;
            let dropped = self.detections.delete_detections_for_file(file.id)?;
            if unqueued + dropped > 0 {
                debug!(file_id = %file.id, unqueued, dropped, "Forgot deleted file");
            }
        }
        Ok(())
    }

    fn on_written(&self, node: &Node) -> Result<()> {
        if !node.is_file() {
            return Ok(());
        }
        for watch in &self.watches {
            if watch.filter.is_file_eligible(&node.owner, node) && !self.is_ignored(watch, node)? {
                self.queue_file(watch, node, true)?;
            }
        }
        Ok(())
    }

    fn on_before_move(&self, source: &Node) -> Result<()> {
        let mut snapshot = MoveSnapshot::default();
        for watch in &self.watches {
            snapshot.ignored.push(self.is_ignored(watch, source)?);
        }
        for file in self.subtree_files(source)? {
            let users = self.access.users_with_access(file.id)?;
            snapshot.users.insert(file.id, users);
        }
        self.lock_moves()?.insert(source.id, snapshot);
        Ok(())
    }

    fn on_after_move(&self, source: &Node, target: &Node) -> Result<()> {
        let snapshot = self.lock_moves()?.remove(&target.id);
        if snapshot.is_none() {
            debug!(file_id = %target.id, "Move without a prior snapshot");
        }
        let snapshot = snapshot.unwrap_or_default();

        if target.is_file()
            && (self.is_any_marker(source.name()) || self.is_any_marker(target.name()))
        {
            return self.marker_moved(source, target);
        }

        if target.is_dir() {
            self.ignore.invalidate(source.storage_id)?;
            if target.storage_id != source.storage_id {
                self.ignore.invalidate(target.storage_id)?;
            }
        }
        let relocated = source.storage_id != target.storage_id || source.root_id != target.root_id;

        for (index, watch) in self.watches.iter().enumerate() {
            let was = snapshot.ignored.get(index).copied().unwrap_or(false);
            let now = self.is_ignored(watch, target)?;
            match (was, now) {
                (false, true) => {
                    let removed = self.unqueue_subtree(watch, target)?;
                    debug!(
                        modality = %watch.filter.modality,
                        removed,
                        "Moved into an ignored directory"
                    );
                }
                (true, false) => {
                    if target.is_dir() {
                        let finder = self.finder(watch);
                        TreeCrawler::new(self.files.clone()).crawl(
                            &target.owner,
                            target,
                            &[finder],
                        );
                    } else if watch.filter.is_file_eligible(&target.owner, target) {
                        self.queue_file(watch, target, false)?;
                    }
                }
                (false, false) if relocated => self.rekey_subtree(watch, target)?,
                _ => {}
            }
        }

        for file in self.subtree_files(target)? {
            let users = self.access.users_with_access(file.id)?;
            if let Some(before) = snapshot.users.get(&file.id) {
                let (gained, lost) = access_change(before, &users);
                if gained == 0 && lost == 0 {
                    continue;
                }
                debug!(file_id = %file.id, gained, lost, "Access changed by move");
            }
            self.reconcile_detections(&file, &users)?;
        }
        Ok(())
    }

    /// A marker renamed or moved: its old directory is released and its new
    /// one is ignored.
    fn marker_moved(&self, source: &Node, target: &Node) -> Result<()> {
        self.ignore.invalidate(source.storage_id)?;
        if target.storage_id != source.storage_id {
            self.ignore.invalidate(target.storage_id)?;
        }

        if let Some(old_parent) = self
            .files
            .node_by_path(source.storage_id, source.parent_path())?
        {
            let finders = self.finders_where(|watch| {
                if !watch.filter.is_marker(source.name()) {
                    return Ok(false);
                }
                self.is_ignored(watch, &old_parent).map(|ignored| !ignored)
            })?;
            if !finders.is_empty() {
                TreeCrawler::new(self.files.clone()).crawl_contents(
                    &old_parent.owner,
                    &old_parent,
                    &finders,
                );
            }
        }

        if let Some(new_parent) = self.parent_node(target)? {
            for watch in self.watches.iter().filter(|w| w.filter.is_marker(target.name())) {
                self.unqueue_subtree(watch, &new_parent)?;
            }
        }
        Ok(())
    }

    fn reconcile_subtree(&self, node: &Node) -> Result<()> {
        for file in self.subtree_files(node)? {
            let users = self.access.users_with_access(file.id)?;
            self.reconcile_detections(&file, &users)?;
        }
        Ok(())
    }

    /// Give every user in `users` the file's detections and drop everybody
    /// else's. Detections are copied from the owner when they hold them,
    /// from any other holder otherwise.
    fn reconcile_detections(&self, file: &Node, users: &[UserId]) -> Result<()> {
        let existing = self.detections.detections_for_file(file.id)?;
        if existing.is_empty() {
            return Ok(());
        }
        let holders: BTreeSet<&UserId> = existing.iter().map(|d| &d.user_id).collect();
        let source = if holders.contains(&file.owner) {
            file.owner.clone()
        } else {
            let preferred = holders.iter().find(|h| users.contains(**h));
            match preferred.or_else(|| holders.iter().next()) {
                Some(user) => (*user).clone(),
                None => return Ok(()),
            }
        };

        let mut copied = 0;
        for user in users.iter().filter(|u| !holders.contains(u)) {
            copied += self.detections.copy_detections(&source, user, file.id)?;
        }
        let pruned = self.detections.prune_detections_not_in(file.id, users)?;
        if copied + pruned > 0 {
            debug!(file_id = %file.id, copied, pruned, "Reconciled detections with access");
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_any_marker(&self, name: &str) -> bool {
        self.watches.iter().any(|w| w.filter.is_marker(name))
    }

    fn is_ignored(&self, watch: &Watch, node: &Node) -> Result<bool> {
        self.ignore.is_ignored(node, &watch.filter.ignore_markers)
    }

    /// Whether a strict ancestor of `dir` holds one of the watch's markers,
    /// read from the store without the cache.
    fn ancestor_ignored(&self, watch: &Watch, dir: &Node) -> Result<bool> {
        let mut path = dir.path.as_str();
        while !path.is_empty() {
            path = parent_of(path);
            if let Some(ancestor) = self.files.node_by_path(dir.storage_id, path)? {
                if watch.filter.is_directory_ignored(self.files.as_ref(), &ancestor)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn parent_node(&self, node: &Node) -> Result<Option<Node>> {
        Ok(self.files.node_by_path(node.storage_id, node.parent_path())?)
    }

    fn finder(&self, watch: &Watch) -> Finder {
        Finder::queueing(watch.filter.clone(), watch.models.clone(), self.queue.clone())
    }

    fn finders_where(&self, mut keep: impl FnMut(&Watch) -> Result<bool>) -> Result<Vec<Finder>> {
        let mut finders = Vec::new();
        for watch in &self.watches {
            if keep(watch)? {
                finders.push(self.finder(watch));
            }
        }
        Ok(finders)
    }

    fn queue_file(&self, watch: &Watch, node: &Node, update: bool) -> Result<()> {
        for model in &watch.models {
            let item = WorkItem::for_node(model, node, update);
            if update {
                self.queue.remove(&item)?;
            }
            if self.queue.insert(&item)? {
                debug!(model = %model, file_id = %node.id, update, "Queued");
            }
        }
        Ok(())
    }

    /// Drop the watch's work items below `node`. When the watch runs the face
    /// model, the face detections of its files go too.
    fn unqueue_subtree(&self, watch: &Watch, node: &Node) -> Result<usize> {
        let faces = watch.models.iter().any(|m| m == registry::FACES);
        let mut removed = 0;
        for file in self.subtree_files(node)? {
            for model in &watch.models {
                if self.queue.remove(&WorkItem::for_node(model, &file, false))? {
                    removed += 1;
                }
            }
            if faces && watch.filter.formats.contains(&file.mime) {
                let dropped = self.detections.delete_detections_for_file(file.id)?;
                if dropped > 0 {
                    debug!(file_id = %file.id, dropped, "Dropped detections of ignored file");
                }
            }
        }
        Ok(removed)
    }

    /// Refresh the location of queued items after a move across mounts.
    fn rekey_subtree(&self, watch: &Watch, node: &Node) -> Result<()> {
        for file in self.subtree_files(node)? {
            for model in &watch.models {
                if self.queue.contains(model, file.id)? {
                    let item = WorkItem::for_node(model, &file, false);
                    self.queue.remove(&item)?;
                    self.queue.insert(&item)?;
                }
            }
        }
        Ok(())
    }

    /// `node` itself if it is a file, every file below it otherwise.
    fn subtree_files(&self, node: &Node) -> Result<Vec<Node>> {
        if node.is_file() {
            return Ok(vec![node.clone()]);
        }
        let mut files = Vec::new();
        let mut pending = vec![node.clone()];
        while let Some(folder) = pending.pop() {
            for child in self.files.children(&folder)? {
                if child.is_dir() {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }
        Ok(files)
    }

    fn lock_moves(&self) -> Result<std::sync::MutexGuard<'_, HashMap<FileId, MoveSnapshot>>> {
        Ok(self.moves.lock().map_err(|_| StoreError::Poisoned)?)
    }
}

/// Users gained and lost between two access lists.
fn access_change(before: &[UserId], after: &[UserId]) -> (usize, usize) {
    let before: BTreeSet<&UserId> = before.iter().collect();
    let after: BTreeSet<&UserId> = after.iter().collect();
    (
        after.difference(&before).count(),
        before.difference(&after).count(),
    )
}
