//! Ball tree for fixed-radius neighbor queries.
//!
//! Every node covers a contiguous slice of `order` and stores a center and
//! the largest distance from it to any covered point. A query skips a node
//! when `d(query, center) - node.radius > r`, which is sound for any metric
//! obeying the triangle inequality.

use crate::metric::Metric;

const LEAF_SIZE: usize = 16;
const PRUNE_SLACK: f64 = 1e-6;

#[derive(Debug)]
struct BallNode {
    center: Vec<f32>,
    radius: f64,
    start: usize,
    end: usize,
    children: Option<(usize, usize)>,
}

#[derive(Debug)]
pub struct BallTree<'a> {
    points: &'a [Vec<f32>],
    metric: Metric,
    order: Vec<usize>,
    nodes: Vec<BallNode>,
}

impl<'a> BallTree<'a> {
    /// Index `points`. All points must have the same dimensionality.
    pub fn build(points: &'a [Vec<f32>], metric: Metric) -> Self {
        let mut tree = Self {
            points,
            metric,
            order: (0..points.len()).collect(),
            nodes: Vec::new(),
        };
        if !points.is_empty() {
            tree.build_node(0, points.len());
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let center = self.centroid(start, end);
        let radius = self.order[start..end]
            .iter()
            .map(|&i| self.metric.distance(&center, &self.points[i]))
            .fold(0.0, f64::max);

        let id = self.nodes.len();
        self.nodes.push(BallNode {
            center,
            radius,
            start,
            end,
            children: None,
        });

        if end - start > LEAF_SIZE {
            let axis = self.widest_axis(start, end);
            let points = self.points;
            self.order[start..end].sort_by(|&a, &b| {
                points[a][axis]
                    .partial_cmp(&points[b][axis])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });
            let mid = start + (end - start) / 2;
            let left = self.build_node(start, mid);
            let right = self.build_node(mid, end);
            self.nodes[id].children = Some((left, right));
        }
        id
    }

    fn centroid(&self, start: usize, end: usize) -> Vec<f32> {
        let dims = self.points[self.order[start]].len();
        let mut sum = vec![0.0f64; dims];
        for &i in &self.order[start..end] {
            for (acc, x) in sum.iter_mut().zip(&self.points[i]) {
                *acc += f64::from(*x);
            }
        }
        let n = (end - start) as f64;
        sum.into_iter().map(|s| (s / n) as f32).collect()
    }

    fn widest_axis(&self, start: usize, end: usize) -> usize {
        let dims = self.points[self.order[start]].len();
        let mut best = (0, f32::NEG_INFINITY);
        for axis in 0..dims {
            let (lo, hi) = self.order[start..end].iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &i| {
                    let x = self.points[i][axis];
                    (lo.min(x), hi.max(x))
                },
            );
            if hi - lo > best.1 {
                best = (axis, hi - lo);
            }
        }
        best.0
    }

    /// Indices of all points within `radius` of `query` (inclusive), sorted
    /// ascending.
    pub fn within(&self, query: &[f32], radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            // Slack absorbs rounding in the bound; leaves re-check exactly
            if self.metric.distance(query, &node.center) - node.radius > radius + PRUNE_SLACK {
                continue;
            }
            match node.children {
                Some((left, right)) => {
                    stack.push(left);
                    stack.push(right);
                }
                None => found.extend(
                    self.order[node.start..node.end]
                        .iter()
                        .copied()
                        .filter(|&i| self.metric.distance(query, &self.points[i]) <= radius),
                ),
            }
        }
        found.sort_unstable();
        found
    }
}
