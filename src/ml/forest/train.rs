use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{DecisionForest, ForestModel, Node, Tree};
use crate::ml::classifier::{TrainError, Trainer, validate_training_rows};
use crate::telemetry::CLASS_COUNT;

/// Forest hyperparameters.
///
/// Config keys (TOML): `n_trees`, `max_depth`, `min_samples_leaf`, `min_samples_split`,
/// `class_weights`, `max_features`, `bootstrap`, `seed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestOptions {
    pub n_trees: usize,
    pub max_depth: usize,
    /// Minimum number of distinct rows on each side of a split.
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    /// Per-class sample weights (benign, cyber, fault).
    pub class_weights: [f64; CLASS_COUNT],
    /// Features considered per split; `None` means `sqrt(n_features)`.
    pub max_features: Option<usize>,
    /// Draw a bootstrap resample per tree.
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            n_trees: 64,
            max_depth: 8,
            min_samples_leaf: 5,
            min_samples_split: 2,
            class_weights: [1.0, 2.0, 2.0],
            max_features: None,
            bootstrap: true,
            seed: 0,
        }
    }
}

impl ForestOptions {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.n_trees == 0 {
            return Err(TrainError::InvalidOptions("n_trees must be >= 1".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(TrainError::InvalidOptions(
                "min_samples_leaf must be >= 1".into(),
            ));
        }
        if self
            .class_weights
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
            || self.class_weights.iter().all(|w| *w == 0.0)
        {
            return Err(TrainError::InvalidOptions(format!(
                "class_weights must be non-negative with at least one > 0 (got {:?})",
                self.class_weights
            )));
        }
        if self.max_features == Some(0) {
            return Err(TrainError::InvalidOptions("max_features must be >= 1".into()));
        }
        Ok(())
    }

    fn features_per_split(&self, dim: usize) -> usize {
        let default = (dim as f64).sqrt().floor().max(1.0) as usize;
        self.max_features.unwrap_or(default).clamp(1, dim.max(1))
    }
}

/// [`Trainer`] producing [`DecisionForest`] models.
#[derive(Debug, Clone, Default)]
pub struct ForestTrainer {
    pub options: ForestOptions,
}

impl ForestTrainer {
    pub fn new(options: ForestOptions) -> Self {
        Self { options }
    }
}

impl Trainer for ForestTrainer {
    type Model = DecisionForest;

    fn fit<R: AsRef<[f64]> + Sync>(
        &self,
        x: &[R],
        y: &[usize],
    ) -> Result<DecisionForest, TrainError> {
        train_forest(x, y, &self.options)
    }
}

/// Train a bagged CART forest with gini splits and class-weighted samples.
///
/// Each tree gets its own seed drawn from `options.seed`, so results only depend on the
/// options and the rows.
pub fn train_forest<R: AsRef<[f64]>>(
    x: &[R],
    y: &[usize],
    options: &ForestOptions,
) -> Result<DecisionForest, TrainError> {
    options.validate()?;
    let dim = validate_training_rows(x, y, CLASS_COUNT)?;
    let rows: Vec<&[f64]> = x.iter().map(|row| row.as_ref()).collect();

    let mut seeder = StdRng::seed_from_u64(options.seed);
    let mut trees = Vec::with_capacity(options.n_trees);
    for _ in 0..options.n_trees {
        let mut rng = StdRng::seed_from_u64(seeder.random::<u64>());
        let weights = sample_weights(y, options, &mut rng);
        let mut builder = TreeBuilder {
            x: &rows,
            y,
            weights: &weights,
            options,
            features_per_split: options.features_per_split(dim),
            dim,
            rng,
            nodes: Vec::new(),
        };
        let mut in_bag: Vec<usize> = (0..rows.len()).filter(|&i| weights[i] > 0.0).collect();
        builder.build(&mut in_bag, 0);
        trees.push(Tree {
            nodes: builder.nodes,
        });
    }
    debug!(
        trees = trees.len(),
        rows = rows.len(),
        nodes = trees.iter().map(|t| t.nodes.len()).sum::<usize>(),
        "trained forest"
    );
    Ok(DecisionForest::new(ForestModel { trees }))
}

/// Bootstrap multiplicity times class weight, per row.
fn sample_weights(y: &[usize], options: &ForestOptions, rng: &mut StdRng) -> Vec<f64> {
    let n = y.len();
    let mut counts = vec![0u32; n];
    if options.bootstrap {
        for _ in 0..n {
            counts[rng.random_range(0..n)] += 1;
        }
    } else {
        counts.fill(1);
    }
    counts
        .iter()
        .zip(y)
        .map(|(&count, &label)| f64::from(count) * options.class_weights[label])
        .collect()
}

struct TreeBuilder<'a> {
    x: &'a [&'a [f64]],
    y: &'a [usize],
    weights: &'a [f64],
    options: &'a ForestOptions,
    features_per_split: usize,
    dim: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `rows` in pre-order and return its root index.
    fn build(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let idx = self.nodes.len();
        let values = self.class_totals(rows);
        self.nodes.push(Node::Leaf { values });

        let min_leaf = self.options.min_samples_leaf;
        if depth >= self.options.max_depth
            || rows.len() < self.options.min_samples_split.max(2 * min_leaf)
            || is_pure(&values)
        {
            return idx;
        }
        let Some(split) = self.best_split(rows) else {
            return idx;
        };

        let mid = partition(rows, |row| self.x[row][split.feature] <= split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn class_totals(&self, rows: &[usize]) -> [f64; CLASS_COUNT] {
        let mut totals = [0.0; CLASS_COUNT];
        for &row in rows {
            totals[self.y[row]] += self.weights[row];
        }
        totals
    }

    /// Search a random feature subset; keep looking past it until some valid split exists.
    fn best_split(&mut self, rows: &[usize]) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.dim).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<SplitCandidate> = None;
        let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(rows.len());
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.features_per_split && best.is_some() {
                break;
            }
            sorted.clear();
            sorted.extend(rows.iter().map(|&row| (self.x[row][feature], row)));
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
            if let Some(candidate) = self.best_threshold(feature, &sorted)
                && best.is_none_or(|current| candidate.score < current.score)
            {
                best = Some(candidate);
            }
        }
        best
    }

    fn best_threshold(&self, feature: usize, sorted: &[(f64, usize)]) -> Option<SplitCandidate> {
        let min_leaf = self.options.min_samples_leaf;
        let n = sorted.len();
        let mut right = [0.0; CLASS_COUNT];
        for &(_, row) in sorted {
            right[self.y[row]] += self.weights[row];
        }
        let mut left = [0.0; CLASS_COUNT];

        let mut best: Option<SplitCandidate> = None;
        for i in 0..n.saturating_sub(1) {
            let (value, row) = sorted[i];
            let weight = self.weights[row];
            left[self.y[row]] += weight;
            right[self.y[row]] -= weight;

            let left_len = i + 1;
            if left_len < min_leaf || n - left_len < min_leaf {
                continue;
            }
            let next = sorted[i + 1].0;
            if next <= value {
                continue;
            }
            let score = weighted_gini(&left) + weighted_gini(&right);
            if best.is_none_or(|current| score < current.score) {
                let mid = value + (next - value) / 2.0;
                let threshold = if mid < next { mid } else { value };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    score,
                });
            }
        }
        best
    }
}

/// `total * gini(counts)`.
fn weighted_gini(counts: &[f64; CLASS_COUNT]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let sum_sq: f64 = counts.iter().map(|c| c * c).sum();
    total - sum_sq / total
}

fn is_pure(values: &[f64; CLASS_COUNT]) -> bool {
    values.iter().filter(|&&v| v > 0.0).count() <= 1
}

/// Reorder `rows` so that rows matching `pred` come first; returns their count.
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(rows[i]) {
            rows.swap(mid, i);
            mid += 1;
        }
    }
    mid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::{Classifier, TreeStructures};

    fn two_blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let jitter = (i % 7) as f64 * 0.1;
            x.push(vec![jitter, 5.0 - jitter]);
            y.push(0);
            x.push(vec![3.0 + jitter, 1.0 + jitter]);
            y.push(1);
            x.push(vec![6.0 + jitter, jitter]);
            y.push(2);
        }
        (x, y)
    }

    fn small_options() -> ForestOptions {
        ForestOptions {
            n_trees: 8,
            max_depth: 4,
            min_samples_leaf: 2,
            seed: 3,
            ..ForestOptions::default()
        }
    }

    #[test]
    fn forest_separates_clusters() {
        let (x, y) = two_blobs();
        let forest = train_forest(&x, &y, &small_options()).unwrap();
        assert_eq!(forest.predict_class(&[0.2, 4.8]), 0);
        assert_eq!(forest.predict_class(&[3.3, 1.3]), 1);
        assert_eq!(forest.predict_class(&[6.2, 0.2]), 2);
        let proba = forest.predict_proba(&[3.3, 1.3]);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn training_is_deterministic() {
        let (x, y) = two_blobs();
        let a = train_forest(&x, &y, &small_options()).unwrap();
        let b = train_forest(&x, &y, &small_options()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trees_respect_depth_and_leaf_size() {
        let (x, y) = two_blobs();
        let options = ForestOptions {
            max_depth: 2,
            min_samples_leaf: 10,
            bootstrap: false,
            ..small_options()
        };
        let forest = train_forest(&x, &y, &options).unwrap();
        assert_eq!(forest.forest().trees.len(), 8);
        for tree in &forest.forest().trees {
            assert!(tree.depth() <= 2);
            for node in &tree.nodes {
                if let Node::Leaf { values } = node {
                    // Without bootstrap every row weighs its class weight (1 or 2).
                    let rows: f64 = values[0] + values[1] / 2.0 + values[2] / 2.0;
                    assert!(rows >= 10.0, "leaf with {rows} rows");
                }
            }
        }
    }

    #[test]
    fn class_weights_scale_leaf_values() {
        let x = vec![vec![0.0]; 4];
        let y = vec![0, 0, 1, 2];
        let options = ForestOptions {
            n_trees: 1,
            bootstrap: false,
            ..ForestOptions::default()
        };
        let forest = train_forest(&x, &y, &options).unwrap();
        let tree = &forest.forest().trees[0];
        assert_eq!(tree.nodes, vec![Node::Leaf { values: [2.0, 2.0, 2.0] }]);
    }

    #[test]
    fn trainer_rejects_bad_input() {
        let trainer = ForestTrainer::new(small_options());
        let empty: Vec<Vec<f64>> = Vec::new();
        assert_eq!(trainer.fit(&empty, &[]), Err(TrainError::EmptyDataset));
        let bad = ForestOptions {
            n_trees: 0,
            ..ForestOptions::default()
        };
        assert!(matches!(
            train_forest(&[vec![1.0]], &[0], &bad),
            Err(TrainError::InvalidOptions(_))
        ));
    }

    #[test]
    fn partition_moves_matches_first() {
        let mut rows = vec![5, 2, 8, 1, 9];
        let mid = partition(&mut rows, |r| r < 5);
        assert_eq!(mid, 2);
        let mut head = rows[..mid].to_vec();
        head.sort();
        assert_eq!(head, vec![1, 2]);
    }
}
