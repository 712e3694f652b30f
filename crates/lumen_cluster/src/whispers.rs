//! Chinese Whispers clustering.
//!
//! 1. Link every vertex to all other vectors within `radius`.
//! 2. Vertices with fewer than `min_neighbors` links are noise: they get no
//!    cluster and take no part in the rounds. Every other vertex starts in a
//!    cluster of its own, numbered in input order.
//! 3. For `rounds` rounds, visit vertices in input order; each adopts the
//!    cluster held by most of its neighbors. Updates are visible to vertices
//!    visited later in the same round. Ties go to the cluster met first when
//!    walking the neighbor list in ascending index order.
//!
//! The result depends only on the input order, so identical input always
//! yields identical output.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ball_tree::BallTree;
use crate::error::{ClusterError, Result};
use crate::metric::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperParams {
    pub metric: Metric,
    /// Largest distance at which two vectors are linked
    pub radius: f64,
    /// Links needed (self excluded) to take part in clustering
    pub min_neighbors: usize,
    pub rounds: usize,
}

impl Default for WhisperParams {
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            radius: 0.5,
            min_neighbors: 2,
            rounds: 25,
        }
    }
}

/// Clustering state of one input vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhisperVertex<L> {
    pub label: L,
    /// None for noise
    pub cluster: Option<usize>,
    /// Linked vertex indices, ascending; empty for noise
    pub neighbors: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ChineseWhispers {
    params: WhisperParams,
}

impl ChineseWhispers {
    pub fn new(params: WhisperParams) -> Result<Self> {
        if !params.radius.is_finite() || params.radius < 0.0 {
            return Err(ClusterError::InvalidParameter(format!(
                "radius must be a non-negative number, got {}",
                params.radius
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &WhisperParams {
        &self.params
    }

    /// Cluster `(label, vector)` pairs. The output keeps input order; cluster
    /// numbers are only meaningful within one call.
    pub fn cluster<L: Clone>(&self, input: &[(L, Vec<f32>)]) -> Result<Vec<(L, Option<usize>)>> {
        let vertices = self.run(input)?;
        Ok(vertices.into_iter().map(|v| (v.label, v.cluster)).collect())
    }

    /// Like [`cluster`](Self::cluster) but returns the full vertex state.
    pub fn run<L: Clone>(&self, input: &[(L, Vec<f32>)]) -> Result<Vec<WhisperVertex<L>>> {
        let vectors: Vec<Vec<f32>> = input.iter().map(|(_, v)| v.clone()).collect();
        check_dimensions(&vectors)?;

        let mut vertices = self.build_graph(input, &vectors);
        for round in 0..self.params.rounds {
            let changed = self.whisper(&mut vertices);
            if changed == 0 {
                debug!(round, "Chinese Whispers converged");
                break;
            }
        }
        Ok(vertices)
    }

    fn build_graph<L: Clone>(
        &self,
        input: &[(L, Vec<f32>)],
        vectors: &[Vec<f32>],
    ) -> Vec<WhisperVertex<L>> {
        let tree = BallTree::build(vectors, self.params.metric);
        let mut next_cluster = 0;
        input
            .iter()
            .enumerate()
            .map(|(index, (label, vector))| {
                let mut neighbors = tree.within(vector, self.params.radius);
                neighbors.retain(|&n| n != index);
                if neighbors.len() < self.params.min_neighbors {
                    return WhisperVertex {
                        label: label.clone(),
                        cluster: None,
                        neighbors: Vec::new(),
                    };
                }
                let cluster = next_cluster;
                next_cluster += 1;
                WhisperVertex {
                    label: label.clone(),
                    cluster: Some(cluster),
                    neighbors,
                }
            })
            .collect()
    }

    /// One round. Returns how many vertices changed cluster.
    fn whisper<L>(&self, vertices: &mut [WhisperVertex<L>]) -> usize {
        let mut changed = 0;
        for index in 0..vertices.len() {
            let Some(current) = vertices[index].cluster else {
                continue;
            };
            // (cluster, votes) in first-encountered order
            let mut tally: Vec<(usize, usize)> = Vec::new();
            for &n in &vertices[index].neighbors {
                let Some(cluster) = vertices[n].cluster else {
                    continue;
                };
                match tally.iter_mut().find(|(c, _)| *c == cluster) {
                    Some((_, votes)) => *votes += 1,
                    None => tally.push((cluster, 1)),
                }
            }
            let mut winner: Option<(usize, usize)> = None;
            for (cluster, votes) in tally {
                if winner.map_or(true, |(_, best)| votes > best) {
                    winner = Some((cluster, votes));
                }
            }
            if let Some((cluster, _)) = winner {
                if cluster != current {
                    vertices[index].cluster = Some(cluster);
                    changed += 1;
                }
            }
        }
        changed
    }
}

fn check_dimensions(vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let expected = first.len();
    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != expected {
            return Err(ClusterError::DimensionMismatch {
                index,
                expected,
                found: vector.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(radius: f64, min_neighbors: usize) -> ChineseWhispers {
        ChineseWhispers::new(WhisperParams {
            radius,
            min_neighbors,
            ..WhisperParams::default()
        })
        .unwrap()
    }

    #[test]
    fn test_noise_vertices_have_no_neighbors() {
        let input = vec![
            ("a", vec![0.0, 0.0]),
            ("b", vec![0.1, 0.0]),
            ("c", vec![0.0, 0.1]),
            ("far", vec![9.0, 9.0]),
        ];
        let vertices = engine(0.5, 2).run(&input).unwrap();
        assert_eq!(vertices[0].neighbors, vec![1, 2]);
        assert_eq!(vertices[3].cluster, None);
        assert!(vertices[3].neighbors.is_empty());
    }

    #[test]
    fn test_tie_goes_to_first_neighbor_in_index_order() {
        // Vertex 0 links to 1 and 2, which are too far apart to link to each
        // other; each of them has exactly one clustered neighbor.
        let input = vec![
            (0, vec![0.0]),
            (1, vec![-0.4]),
            (2, vec![0.4]),
        ];
        let vertices = engine(0.5, 1).run(&input).unwrap();
        // Round one: 0 adopts 1's cluster over 2's, then 2 follows 0.
        assert_eq!(vertices[0].cluster, Some(1));
        assert_eq!(vertices[1].cluster, Some(1));
        assert_eq!(vertices[2].cluster, Some(1));
    }

    #[test]
    fn test_negative_radius_rejected() {
        let err = ChineseWhispers::new(WhisperParams {
            radius: -1.0,
            ..WhisperParams::default()
        })
        .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidParameter(_)));
    }

    #[test]
    fn test_empty_input() {
        let input: Vec<(u32, Vec<f32>)> = Vec::new();
        assert!(engine(0.5, 2).cluster(&input).unwrap().is_empty());
    }
}
