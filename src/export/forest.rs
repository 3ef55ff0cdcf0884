//! Flat text format for decision forests.
//!
//! ```text
//! n_trees <count>
//! tree <node_count>
//! <index> <feature_index> <threshold> <left_child> <right_child> <p0> <p1> <p2>
//! ```
//!
//! Leaves carry `feature_index = -1`, both children `-1` and threshold `-2.000000`. Internal
//! rows carry placeholder probabilities.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::ml::forest::{FALLBACK_PROBABILITIES, ForestModel, Node, Tree};
use crate::telemetry::CLASS_COUNT;

const LEAF_THRESHOLD: f64 = -2.0;
const NORMALIZE_EPS: f64 = 1e-9;

/// One serialized node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub index: usize,
    pub feature_index: i64,
    pub threshold: f64,
    pub left_child: i64,
    pub right_child: i64,
    pub probabilities: [f64; CLASS_COUNT],
}

impl NodeRow {
    /// Flatten a node; `tree` and `index` are only used for the empty-leaf warning.
    pub fn from_node(tree: usize, index: usize, node: &Node) -> Self {
        match node {
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => Self {
                index,
                feature_index: *feature as i64,
                threshold: *threshold,
                left_child: *left as i64,
                right_child: *right as i64,
                probabilities: FALLBACK_PROBABILITIES,
            },
            Node::Leaf { values } => {
                let total: f64 = values.iter().sum();
                if total <= 0.0 {
                    warn!(tree, node = index, "Empty leaf during forest export");
                }
                Self {
                    index,
                    feature_index: -1,
                    threshold: LEAF_THRESHOLD,
                    left_child: -1,
                    right_child: -1,
                    probabilities: values.map(|v| v / (total + NORMALIZE_EPS)),
                }
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_index < 0 || (self.left_child < 0 && self.right_child < 0)
    }
}

impl fmt::Display for NodeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.6} {} {}",
            self.index, self.feature_index, self.threshold, self.left_child, self.right_child
        )?;
        for p in self.probabilities {
            write!(f, " {p:.6}")?;
        }
        Ok(())
    }
}

/// Serialize the forest, trees and nodes in the order received.
pub fn export_forest(model: &ForestModel) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_forest(model, &mut out);
    out
}

/// Stream the forest text into `writer`.
pub fn write_forest<W: fmt::Write>(model: &ForestModel, writer: &mut W) -> fmt::Result {
    writeln!(writer, "n_trees {}", model.trees.len())?;
    for (tree_idx, tree) in model.trees.iter().enumerate() {
        writeln!(writer, "tree {}", tree.nodes.len())?;
        for (idx, node) in tree.nodes.iter().enumerate() {
            writeln!(writer, "{}", NodeRow::from_node(tree_idx, idx, node))?;
        }
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ForestFormatError {
    #[error("unexpected end of input (expected {expected})")]
    UnexpectedEof { expected: &'static str },
    #[error("expected `{expected}`, found `{found}`")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },
    #[error("invalid {what} `{token}`")]
    InvalidNumber { what: &'static str, token: String },
    #[error("tree {tree}: node row {position} carries index {found}")]
    NodeIndex {
        tree: usize,
        position: usize,
        found: usize,
    },
    #[error("tree {tree}: node {node} references child {child} outside 0..{node_count}")]
    ChildOutOfRange {
        tree: usize,
        node: usize,
        child: i64,
        node_count: usize,
    },
    #[error("tree {tree}: node {node} has feature {feature} but missing children")]
    HalfLeaf {
        tree: usize,
        node: usize,
        feature: i64,
    },
    #[error("trailing data after last tree: `{0}`")]
    TrailingData(String),
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self, expected: &'static str) -> Result<&'a str, ForestFormatError> {
        self.inner
            .next()
            .ok_or(ForestFormatError::UnexpectedEof { expected })
    }

    fn keyword(&mut self, keyword: &'static str) -> Result<(), ForestFormatError> {
        let token = self.next(keyword)?;
        if token == keyword {
            Ok(())
        } else {
            Err(ForestFormatError::UnexpectedToken {
                expected: keyword,
                found: token.to_string(),
            })
        }
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &'static str) -> Result<T, ForestFormatError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| ForestFormatError::InvalidNumber {
            what,
            token: token.to_string(),
        })
    }
}

/// Read a forest written by [`export_forest`].
///
/// Leaf rows become [`Node::Leaf`] with the stored probabilities; the placeholder
/// probabilities of internal rows are discarded.
pub fn parse_forest(input: &str) -> Result<ForestModel, ForestFormatError> {
    let mut tokens = Tokens {
        inner: input.split_whitespace(),
    };
    tokens.keyword("n_trees")?;
    let n_trees: usize = tokens.parse("tree count")?;
    let mut trees = Vec::with_capacity(n_trees.min(1024));
    for tree_idx in 0..n_trees {
        tokens.keyword("tree")?;
        let node_count: usize = tokens.parse("node count")?;
        let mut rows = Vec::with_capacity(node_count.min(1 << 16));
        for position in 0..node_count {
            let row = NodeRow {
                index: tokens.parse("node index")?,
                feature_index: tokens.parse("feature index")?,
                threshold: tokens.parse("threshold")?,
                left_child: tokens.parse("left child")?,
                right_child: tokens.parse("right child")?,
                probabilities: [
                    tokens.parse("probability")?,
                    tokens.parse("probability")?,
                    tokens.parse("probability")?,
                ],
            };
            if row.index != position {
                return Err(ForestFormatError::NodeIndex {
                    tree: tree_idx,
                    position,
                    found: row.index,
                });
            }
            rows.push(row);
        }
        let nodes = rows
            .iter()
            .map(|row| node_from_row(tree_idx, row, node_count))
            .collect::<Result<Vec<_>, _>>()?;
        trees.push(Tree { nodes });
    }
    if let Some(extra) = tokens.inner.next() {
        return Err(ForestFormatError::TrailingData(extra.to_string()));
    }
    Ok(ForestModel { trees })
}

fn node_from_row(tree: usize, row: &NodeRow, node_count: usize) -> Result<Node, ForestFormatError> {
    if row.is_leaf() {
        return Ok(Node::Leaf {
            values: row.probabilities,
        });
    }
    let child = |child: i64| -> Result<usize, ForestFormatError> {
        if child < 0 {
            return Err(ForestFormatError::HalfLeaf {
                tree,
                node: row.index,
                feature: row.feature_index,
            });
        }
        usize::try_from(child)
            .ok()
            .filter(|&c| c < node_count)
            .ok_or(ForestFormatError::ChildOutOfRange {
                tree,
                node: row.index,
                child,
                node_count,
            })
    };
    Ok(Node::Split {
        feature: row.feature_index as usize,
        threshold: row.threshold,
        left: child(row.left_child)?,
        right: child(row.right_child)?,
    })
}
