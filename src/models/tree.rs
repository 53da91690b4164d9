//! Regression trees shared by the forest and boosting families

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::FeatureTable;

/// Tree node. Children always sit after their parent in the node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Growth limits for [`RegressionTree::fit`].
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Grow<'a, R> {
    params: TreeParams,
    x: &'a FeatureTable,
    target: &'a [f64],
    leaf_value: &'a dyn Fn(&[usize]) -> f64,
    importances: &'a mut [f64],
    rng: &'a mut R,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree minimizing squared error of `target` over `rows`.
    ///
    /// Leaves take their value from `leaf_value`; each split adds its
    /// error reduction to `importances[feature]`.
    pub fn fit<R: Rng>(
        params: TreeParams,
        x: &FeatureTable,
        target: &[f64],
        rows: &[usize],
        leaf_value: &dyn Fn(&[usize]) -> f64,
        importances: &mut [f64],
        rng: &mut R,
    ) -> Self {
        let mut grow = Grow {
            params,
            x,
            target,
            leaf_value,
            importances,
            rng,
            nodes: Vec::new(),
        };
        grow.node(rows, 0);
        Self { nodes: grow.nodes }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return f64::NAN,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check node references so `predict` can neither loop nor index out of
    /// bounds.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("leaf {i} has a non-finite value"));
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {i} has invalid child {child}"));
                        }
                    }
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

impl<R: Rng> Grow<'_, R> {
    fn node(&mut self, rows: &[usize], depth: usize) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: (self.leaf_value)(rows),
        });

        if depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return idx;
        }
        let Some(best) = self.best_split(rows) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.x.row(r)[best.feature] <= best.threshold);
        self.importances[best.feature] += best.gain;

        let left = self.node(&left_rows, depth + 1);
        let right = self.node(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let mut features: Vec<usize> = (0..self.x.n_features()).collect();
        if let Some(k) = self.params.max_features {
            features.shuffle(&mut *self.rng);
            features.truncate(k.max(1));
        }
        features
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<BestSplit> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = rows.len() as f64;
        let total: f64 = rows.iter().map(|&r| self.target[r]).sum();
        let total_sq: f64 = rows.iter().map(|&r| self.target[r].powi(2)).sum();
        let parent_sse = total_sq - total * total / n;

        let mut best: Option<BestSplit> = None;
        for feature in self.candidate_features() {
            let mut pairs: Vec<(f64, f64)> = rows
                .iter()
                .map(|&r| (self.x.row(r)[feature], self.target[r]))
                .collect();
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 0..pairs.len() - 1 {
                left_sum += pairs[i].1;
                left_sq += pairs[i].1.powi(2);
                let left_n = (i + 1) as f64;
                let right_n = n - left_n;
                if i + 1 < min_leaf || pairs.len() - (i + 1) < min_leaf {
                    continue;
                }
                if pairs[i].0 == pairs[i + 1].0 {
                    continue;
                }
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);
                let gain = parent_sse - sse;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (pairs[i].0 + pairs[i + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}
