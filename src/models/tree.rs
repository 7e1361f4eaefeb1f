//! Regression tree over gradient/hessian statistics
//!
//! One builder serves both learners. Each row carries a gradient `g` and a
//! hessian `h`; a leaf's weight is `-T(G) / (H + lambda)` where `T` is L1
//! soft-thresholding by `alpha`, and a split's gain is the improvement of
//! `T(G)^2 / (H + lambda)` over the parent. With `g = -y`, `h = 1` and no
//! regularization this is the plain variance-reduction tree with mean leaves.

use serde::{Deserialize, Serialize};

use crate::storage::FeatureMatrix;

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

/// Growth limits and regularization of one tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    /// Maximum depth (root is depth 0).
    pub max_depth: usize,
    /// Minimum rows a node needs to be split.
    pub min_samples_split: usize,
    /// Minimum rows in each child.
    pub min_samples_leaf: usize,
    /// Minimum hessian sum in each child.
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// L1 regularization on leaf weights.
    pub alpha: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: 0.0,
            lambda: 0.0,
            alpha: 0.0,
        }
    }
}

/// A tree node: internal if `value` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Feature compared at this node.
    pub feature: usize,
    /// Rows with `x[feature] <= threshold` go left.
    pub threshold: f64,
    /// Index of the left child.
    pub left: usize,
    /// Index of the right child.
    pub right: usize,
    /// Leaf weight.
    pub value: Option<f64>,
}

impl Node {
    const fn leaf(value: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(value),
        }
    }
}

/// Binary regression tree, nodes stored depth-first from the root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl Stats {
    const ZERO: Self = Self {
        grad: 0.0,
        hess: 0.0,
        count: 0,
    };

    fn add(&mut self, grad: f64, hess: f64) {
        self.grad += grad;
        self.hess += hess;
        self.count += 1;
    }

    fn minus(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

struct Candidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

struct Builder<'a> {
    x: &'a FeatureMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a TreeParams,
    nodes: Vec<Node>,
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

impl Builder<'_> {
    fn stats(&self, rows: &[usize]) -> Stats {
        let mut stats = Stats::ZERO;
        for &r in rows {
            stats.add(self.grad[r], self.hess[r]);
        }
        stats
    }

    fn score(&self, stats: Stats) -> f64 {
        let g = soft_threshold(stats.grad, self.params.alpha);
        let denom = stats.hess + self.params.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        g * g / denom
    }

    fn weight(&self, stats: Stats) -> f64 {
        let denom = stats.hess + self.params.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -soft_threshold(stats.grad, self.params.alpha) / denom
    }

    fn child_ok(&self, stats: Stats) -> bool {
        stats.count >= self.params.min_samples_leaf.max(1)
            && stats.hess >= self.params.min_child_weight
    }

    fn best_split(&self, rows: &[usize], total: Stats) -> Option<Candidate> {
        let parent = self.score(total);
        let mut best: Option<Candidate> = None;
        let mut order = rows.to_vec();

        for feature in 0..self.x.n_features() {
            order.sort_by(|&a, &b| self.x.get(a, feature).total_cmp(&self.x.get(b, feature)));

            let mut left = Stats::ZERO;
            for pair in order.windows(2) {
                let (row, next) = (pair[0], pair[1]);
                left.add(self.grad[row], self.hess[row]);

                let (value, next_value) = (self.x.get(row, feature), self.x.get(next, feature));
                if value == next_value {
                    continue;
                }
                let right = total.minus(left);
                if !self.child_ok(left) || !self.child_ok(right) {
                    continue;
                }

                let gain = self.score(left) + self.score(right) - parent;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate {
                        gain,
                        feature,
                        threshold: value + (next_value - value) / 2.0,
                    });
                }
            }
        }
        best
    }

    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let total = self.stats(rows);
        let index = self.nodes.len();
        self.nodes.push(Node::leaf(self.weight(total)));

        if depth >= self.params.max_depth || rows.len() < self.params.min_samples_split.max(2) {
            return index;
        }
        let Some(split) = self.best_split(rows, total) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x.get(r, split.feature) <= split.threshold);

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[index] = Node {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            value: None,
        };
        index
    }
}

impl RegressionTree {
    /// Fit a tree on `rows` of `x` (duplicates allowed, for bootstrap samples).
    #[must_use]
    pub fn fit(
        x: &FeatureMatrix,
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        params: &TreeParams,
    ) -> Self {
        let mut builder = Builder {
            x,
            grad,
            hess,
            params,
            nodes: Vec::new(),
        };
        builder.grow(rows, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Fit a mean-leaf tree on targets `y` (squared error, no regularization).
    #[must_use]
    pub fn fit_targets(x: &FeatureMatrix, y: &[f64], rows: &[usize], params: &TreeParams) -> Self {
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; y.len()];
        let params = TreeParams {
            lambda: 0.0,
            alpha: 0.0,
            min_child_weight: 0.0,
            ..*params
        };
        Self::fit(x, &grad, &hess, rows, &params)
    }

    /// Leaf weight reached by `row`.
    #[must_use]
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if let Some(value) = node.value {
                return value;
            }
            idx = if row.get(node.feature).copied().unwrap_or(0.0) <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth of the deepest leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if node.value.is_none() => {
                    1 + walk(nodes, node.left).max(walk(nodes, node.right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}
