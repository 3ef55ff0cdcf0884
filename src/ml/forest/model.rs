use serde::{Deserialize, Serialize};

use crate::ml::classifier::{Classifier, TreeStructures};
use crate::telemetry::CLASS_COUNT;

/// Distribution returned when no tree yields a usable leaf.
pub const FALLBACK_PROBABILITIES: [f64; CLASS_COUNT] = [0.34, 0.33, 0.33];

/// One decision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Route to `left` when `row[feature] <= threshold`, else to `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node holding (weighted) class counts or probabilities.
    Leaf { values: [f64; CLASS_COUNT] },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// A single tree; node 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf values reached by `row`, or `None` for a malformed tree.
    pub fn leaf_values(&self, row: &[f64]) -> Option<&[f64; CLASS_COUNT]> {
        let mut idx = 0usize;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                Node::Leaf { values } => return Some(values),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }

    /// Normalized class distribution for `row`; all zeros for empty or unreachable leaves.
    pub fn predict_proba(&self, row: &[f64]) -> [f64; CLASS_COUNT] {
        let Some(values) = self.leaf_values(row) else {
            return [0.0; CLASS_COUNT];
        };
        let total: f64 = values.iter().sum();
        if total <= 0.0 {
            return [0.0; CLASS_COUNT];
        }
        values.map(|v| v / total)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Length of the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize, budget: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) if budget > 0 => {
                    1 + walk(nodes, *left, budget - 1).max(walk(nodes, *right, budget - 1))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0, self.nodes.len())
    }
}

/// Ordered collection of trees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<Tree>,
}

impl ForestModel {
    pub fn node_count(&self) -> usize {
        self.trees.iter().map(|tree| tree.nodes.len()).sum()
    }

    /// Average of the per-tree distributions, renormalized.
    pub fn predict_proba(&self, row: &[f64]) -> [f64; CLASS_COUNT] {
        let mut acc = [0.0; CLASS_COUNT];
        for tree in &self.trees {
            for (slot, p) in acc.iter_mut().zip(tree.predict_proba(row)) {
                *slot += p;
            }
        }
        let total: f64 = acc.iter().sum();
        if total <= 0.0 {
            return FALLBACK_PROBABILITIES;
        }
        acc.map(|v| v / total)
    }
}

/// Tree ensemble classifier over the telemetry classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionForest {
    forest: ForestModel,
}

impl DecisionForest {
    pub fn new(forest: ForestModel) -> Self {
        Self { forest }
    }
}

impl Classifier for DecisionForest {
    fn n_classes(&self) -> usize {
        CLASS_COUNT
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        self.forest.predict_proba(row).to_vec()
    }
}

impl TreeStructures for DecisionForest {
    fn forest(&self) -> &ForestModel {
        &self.forest
    }
}
