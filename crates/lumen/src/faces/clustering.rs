//! Face clustering job
//!
//! Runs Chinese Whispers over one user's face detections and writes the
//! grouping back as clusters. Existing clusters are carried over so that
//! titles the user gave them survive re-clustering: a group takes over the
//! existing cluster that already holds most of its members.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lumen_cluster::{ChineseWhispers, WhisperParams};
use lumen_store::{ClusterAssignment, ClusterId, ClusterStore, Detection, DetectionStore, UserId};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterReport {
    pub user: String,
    pub detections: usize,
    pub groups: usize,
    pub created: usize,
    pub reused: usize,
    pub removed: usize,
    pub unclustered: usize,
}

pub struct FaceClusterer {
    detections: Arc<dyn DetectionStore>,
    clusters: Arc<dyn ClusterStore>,
    engine: ChineseWhispers,
}

impl FaceClusterer {
    pub fn new(
        detections: Arc<dyn DetectionStore>,
        clusters: Arc<dyn ClusterStore>,
        params: WhisperParams,
    ) -> Result<Self> {
        Ok(Self {
            detections,
            clusters,
            engine: ChineseWhispers::new(params)?,
        })
    }

    pub fn cluster_user(&self, user: &UserId) -> Result<ClusterReport> {
        let radius = self.engine.params().radius;
        let detections: Vec<Detection> = self
            .detections
            .detections_for_user(user)?
            .into_iter()
            .filter(|d| !d.cluster.is_rejected())
            .collect();
        let mut report = ClusterReport {
            user: user.to_string(),
            detections: detections.len(),
            ..ClusterReport::default()
        };

        let input: Vec<(usize, Vec<f32>)> = detections
            .iter()
            .enumerate()
            .map(|(i, d)| (i, d.vector.clone()))
            .collect();
        let labels = self.engine.cluster(&input)?;

        // Engine cluster number -> member positions, in first-seen order
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (position, cluster) in labels {
            if let Some(cluster) = cluster {
                groups.entry(cluster).or_default().push(position);
            }
        }
        report.groups = groups.len();

        let owned: BTreeSet<ClusterId> = self
            .clusters
            .clusters_for_user(user)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mut claimed = BTreeSet::new();
        let mut assignments = vec![ClusterAssignment::Unclustered; detections.len()];

        for members in groups.values() {
            let target = match pick_existing(&detections, members, &owned, &claimed) {
                Some(id) => {
                    report.reused += 1;
                    id
                }
                None => {
                    report.created += 1;
                    self.clusters.create_cluster(user, "")?.id
                }
            };
            claimed.insert(target);
            for &position in members {
                assignments[position] = ClusterAssignment::Member(target);
            }
        }

        for (detection, assignment) in detections.iter().zip(assignments) {
            if assignment == ClusterAssignment::Unclustered {
                report.unclustered += 1;
            }
            if detection.cluster == assignment && detection.threshold == radius {
                continue;
            }
            let mut updated = detection.clone();
            updated.cluster = assignment;
            updated.threshold = radius;
            self.detections.update_detection(&updated)?;
        }

        for cluster in self.clusters.clusters_for_user(user)? {
            if self.detections.detections_for_cluster(cluster.id)?.is_empty() {
                debug!(cluster_id = %cluster.id, "Removing empty cluster");
                self.clusters.delete_cluster(cluster.id)?;
                report.removed += 1;
            }
        }

        info!(
            user = %user,
            detections = report.detections,
            groups = report.groups,
            created = report.created,
            reused = report.reused,
            removed = report.removed,
            "Face clustering finished"
        );
        Ok(report)
    }
}

/// The unclaimed cluster of `owned` holding most of `members`; ties go to
/// the smallest id.
fn pick_existing(
    detections: &[Detection],
    members: &[usize],
    owned: &BTreeSet<ClusterId>,
    claimed: &BTreeSet<ClusterId>,
) -> Option<ClusterId> {
    let mut votes: BTreeMap<ClusterId, usize> = BTreeMap::new();
    for &position in members {
        if let Some(id) = detections[position].cluster.cluster_id() {
            if owned.contains(&id) && !claimed.contains(&id) {
                *votes.entry(id).or_default() += 1;
            }
        }
    }
    let mut best: Option<(ClusterId, usize)> = None;
    for (id, count) in votes {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((id, count));
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::{BoundingBox, DetectionId, FileId, MemoryStore, NewDetection};

    fn add(store: &MemoryStore, user: &UserId, file: u64, vector: Vec<f32>) {
        store
            .insert_detection(NewDetection {
                file_id: FileId::new(file),
                user_id: user.clone(),
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                },
                vector,
            })
            .unwrap();
    }

    fn clusterer(store: &Arc<MemoryStore>) -> FaceClusterer {
        FaceClusterer::new(store.clone(), store.clone(), WhisperParams::default()).unwrap()
    }

    #[test]
    fn test_pick_existing_prefers_majority_then_smallest_id() {
        let mk = |cluster: ClusterAssignment| Detection {
            id: DetectionId::new(1),
            file_id: FileId::new(1),
            user_id: UserId::new("a"),
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            },
            vector: vec![],
            cluster,
            threshold: 0.0,
        };
        let c = |n: u64| ClusterAssignment::Member(ClusterId::new(n));
        let detections = vec![
            mk(c(4)),
            mk(c(2)),
            mk(c(4)),
            mk(c(2)),
            mk(ClusterAssignment::Unclustered),
        ];
        let owned: BTreeSet<ClusterId> = [2, 4].into_iter().map(ClusterId::new).collect();

        let tie = pick_existing(&detections, &[0, 1, 2, 3, 4], &owned, &BTreeSet::new());
        assert_eq!(tie, Some(ClusterId::new(2)));

        let majority = pick_existing(&detections, &[0, 1, 2], &owned, &BTreeSet::new());
        assert_eq!(majority, Some(ClusterId::new(4)));

        let claimed: BTreeSet<ClusterId> = [ClusterId::new(2)].into_iter().collect();
        assert_eq!(pick_existing(&detections, &[1, 3], &owned, &claimed), None);
    }

    #[test]
    fn test_reclustering_keeps_titles() {
        let store = Arc::new(MemoryStore::new());
        let alice = UserId::new("alice");
        for i in 0..4 {
            add(&store, &alice, i, vec![0.0, 0.01 * i as f32]);
        }
        add(&store, &alice, 10, vec![7.0, 7.0]);

        let first = clusterer(&store).cluster_user(&alice).unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.unclustered, 1);

        let cluster = store.clusters_for_user(&alice).unwrap().remove(0);
        store.rename_cluster(cluster.id, "Grandma").unwrap();
        add(&store, &alice, 5, vec![0.0, 0.05]);

        let second = clusterer(&store).cluster_user(&alice).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.reused, 1);
        let members = store.detections_for_cluster(cluster.id).unwrap();
        assert_eq!(members.len(), 5);
        assert!(members.iter().all(|d| d.threshold == 0.5));
        assert_eq!(store.cluster(cluster.id).unwrap().unwrap().title, "Grandma");
    }

    #[test]
    fn test_rejected_detections_are_left_alone_and_empty_clusters_removed() {
        let store = Arc::new(MemoryStore::new());
        let alice = UserId::new("alice");
        add(&store, &alice, 1, vec![0.0]);
        let stale = store.create_cluster(&alice, "Old").unwrap();
        let mut detection = store.detections_for_user(&alice).unwrap().remove(0);
        detection.cluster = ClusterAssignment::Rejected;
        store.update_detection(&detection).unwrap();

        let report = clusterer(&store).cluster_user(&alice).unwrap();
        assert_eq!(report.detections, 0);
        assert_eq!(report.removed, 1);
        assert!(store.cluster(stale.id).unwrap().is_none());
        let after = store.detection(detection.id).unwrap().unwrap();
        assert!(after.cluster.is_rejected());
    }
}
