//! Recursive discovery of eligible files.
//!
//! A crawl carries a set of [`Finder`]s down the tree. At every directory the
//! finders whose markers are present drop out for that subtree; once none is
//! left the subtree is not listed at all.

use std::sync::Arc;

use lumen_store::{FileStore, Node, UserId, WorkItem, WorkQueue};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::discovery::filter::EligibilityFilter;
use crate::error::Result;

type FoundCallback = Box<dyn Fn(&Node) -> Result<()> + Send + Sync>;

/// An eligibility filter plus what to do with each matching file.
pub struct Finder {
    pub filter: EligibilityFilter,
    on_found: FoundCallback,
}

impl Finder {
    pub fn new(
        filter: EligibilityFilter,
        on_found: impl Fn(&Node) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter,
            on_found: Box::new(on_found),
        }
    }

    /// Queue every matching file for each of `models`.
    pub fn queueing(
        filter: EligibilityFilter,
        models: Vec<String>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self::new(filter, move |node| {
            for model in &models {
                if queue.insert(&WorkItem::for_node(model, node, false))? {
                    debug!(model = %model, file_id = %node.id, path = %node.path, "Queued");
                }
            }
            Ok(())
        })
    }

    pub fn found(&self, node: &Node) -> Result<()> {
        (self.on_found)(node)
    }
}

impl std::fmt::Debug for Finder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finder")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub directories: usize,
    pub files: usize,
    /// (file, finder) pairs whose callback succeeded
    pub matches: usize,
    pub pruned: usize,
    pub errors: usize,
}

pub struct TreeCrawler {
    files: Arc<dyn FileStore>,
}

impl TreeCrawler {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    /// Walk `folder` and everything below it.
    pub fn crawl(&self, user: &UserId, folder: &Node, finders: &[Finder]) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let all: Vec<usize> = (0..finders.len()).collect();
        let active = self.interested(folder, finders, &all, &mut stats);
        if active.is_empty() {
            stats.pruned += 1;
        } else {
            self.walk(user, folder, finders, active, &mut stats);
        }
        info!(
            path = %folder.path,
            directories = stats.directories,
            files = stats.files,
            matches = stats.matches,
            "Crawl finished"
        );
        stats
    }

    /// Walk the contents of `folder` without checking `folder`'s own markers.
    pub fn crawl_contents(&self, user: &UserId, folder: &Node, finders: &[Finder]) -> CrawlStats {
        let mut stats = CrawlStats::default();
        self.walk(user, folder, finders, (0..finders.len()).collect(), &mut stats);
        stats
    }

    /// Finders among `candidates` that do not ignore `folder`.
    fn interested(
        &self,
        folder: &Node,
        finders: &[Finder],
        candidates: &[usize],
        stats: &mut CrawlStats,
    ) -> Vec<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&i| {
                match finders[i].filter.is_directory_ignored(self.files.as_ref(), folder) {
                    Ok(ignored) => !ignored,
                    Err(e) => {
                        warn!(path = %folder.path, error = %e, "Could not check ignore markers");
                        stats.errors += 1;
                        true
                    }
                }
            })
            .collect()
    }

    fn walk(
        &self,
        user: &UserId,
        root: &Node,
        finders: &[Finder],
        active: Vec<usize>,
        stats: &mut CrawlStats,
    ) {
        let mut pending = vec![(root.clone(), active)];
        while let Some((folder, active)) = pending.pop() {
            stats.directories += 1;
            let children = match self.files.children(&folder) {
                Ok(children) => children,
                Err(e) => {
                    warn!(path = %folder.path, error = %e, "Skipping unreadable directory");
                    stats.errors += 1;
                    continue;
                }
            };

            for child in children {
                if child.is_dir() {
                    let carried = self.interested(&child, finders, &active, stats);
                    if carried.is_empty() {
                        debug!(path = %child.path, "Every finder ignores this directory");
                        stats.pruned += 1;
                    } else {
                        pending.push((child, carried));
                    }
                    continue;
                }

                stats.files += 1;
                for &i in &active {
                    let finder = &finders[i];
                    if !finder.filter.is_file_eligible(user, &child) {
                        continue;
                    }
                    match finder.found(&child) {
                        Ok(()) => stats.matches += 1,
                        Err(e) => {
                            warn!(
                                path = %child.path,
                                modality = %finder.filter.modality,
                                error = %e,
                                "Handling discovered file failed"
                            );
                            stats.errors += 1;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LumenError;
    use crate::modality::Modality;
    use lumen_store::MemoryFileStore;
    use std::sync::Mutex;

    fn recording(
        modality: Modality,
        mime: &str,
        marker: &str,
    ) -> (Finder, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let filter = EligibilityFilter::new(modality, [mime], [".nomedia", marker], 0);
        let finder = Finder::new(filter, move |node| {
            sink.lock().unwrap().push(node.path.clone());
            Ok(())
        });
        (finder, seen)
    }

    #[test]
    fn test_marker_prunes_only_its_modality() {
        let files = Arc::new(MemoryFileStore::new());
        let alice = UserId::new("alice");
        let root = files.add_storage(&alice).unwrap();
        let mixed = files.add_dir(&root, "mixed").unwrap();
        files.add_file(&mixed, ".noimage", "application/octet-stream", 0).unwrap();
        files.add_file(&mixed, "a.jpg", "image/jpeg", 1).unwrap();
        files.add_file(&mixed, "b.mp3", "audio/mpeg", 1).unwrap();
        let hidden = files.add_dir(&root, "hidden").unwrap();
        files.add_file(&hidden, ".nomedia", "application/octet-stream", 0).unwrap();
        files.add_file(&hidden, "c.jpg", "image/jpeg", 1).unwrap();
        files.add_file(&root, "d.jpg", "image/jpeg", 1).unwrap();

        let (images, seen_images) = recording(Modality::Image, "image/jpeg", ".noimage");
        let (audio, seen_audio) = recording(Modality::Audio, "audio/mpeg", ".nomusic");
        let stats = TreeCrawler::new(files.clone()).crawl(&alice, &root, &[images, audio]);

        assert_eq!(*seen_images.lock().unwrap(), vec!["d.jpg".to_string()]);
        assert_eq!(*seen_audio.lock().unwrap(), vec!["mixed/b.mp3".to_string()]);
        assert_eq!(stats.pruned, 1);
    }

    #[test]
    fn test_failures_do_not_stop_the_crawl() {
        let files = Arc::new(MemoryFileStore::new());
        let alice = UserId::new("alice");
        let root = files.add_storage(&alice).unwrap();
        let locked = files.add_dir(&root, "locked").unwrap();
        files.add_file(&locked, "x.jpg", "image/jpeg", 1).unwrap();
        files.set_unreadable(locked.id).unwrap();
        files.add_file(&root, "a.jpg", "image/jpeg", 1).unwrap();
        files.add_file(&root, "b.jpg", "image/jpeg", 1).unwrap();

        let failing = Finder::new(
            EligibilityFilter::new(Modality::Image, ["image/jpeg"], [".noimage"], 0),
            |node| {
                if node.name() == "a.jpg" {
                    Err(LumenError::Config("boom".to_string()))
                } else {
                    Ok(())
                }
            },
        );
        let (other, seen) = recording(Modality::Image, "image/jpeg", ".noimage");
        let stats = TreeCrawler::new(files.clone()).crawl(&alice, &root, &[failing, other]);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        assert_eq!(stats.matches, 3);
        assert_eq!(stats.errors, 2);
    }
}
