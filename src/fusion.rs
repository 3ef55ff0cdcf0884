//! Stacking fusion: out-of-fold ensemble probabilities combined with the rule score and a
//! novelty flag into one risk probability.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::export::{CombinerFormatError, CombinerModel};
use crate::ml::classifier::{TrainError, Trainer};
use crate::ml::cross_val::FoldFit;
use crate::ml::logreg::{LogisticOptions, LogisticTrainer};
use crate::telemetry::{GuardBits, Label};

/// Max class probability below which a row counts as novel.
pub const NOVELTY_THRESHOLD: f64 = 0.5;

/// Combiner fitting options.
///
/// Config keys (TOML): `l2`, `max_iter`, `tolerance`, `class_weights`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerOptions {
    /// L2 penalty on the three weights.
    pub l2: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    /// Sample weights for non-cyber and cyber rows.
    pub class_weights: [f64; 2],
}

impl Default for CombinerOptions {
    fn default() -> Self {
        let solver = LogisticOptions::default();
        Self {
            l2: solver.l2,
            max_iter: solver.max_iter,
            tolerance: solver.tolerance,
            class_weights: [1.0, 3.0],
        }
    }
}

impl CombinerOptions {
    pub fn trainer(&self) -> LogisticTrainer {
        LogisticTrainer {
            options: LogisticOptions {
                l2: self.l2,
                max_iter: self.max_iter,
                tolerance: self.tolerance,
            },
            class_weights: self.class_weights,
        }
    }
}

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("training row {row} received no out-of-fold prediction")]
    MissingOutOfFold { row: usize },
    #[error("fold {fold} references row {row} outside 0..{rows}")]
    RowOutOfRange { fold: usize, row: usize, rows: usize },
    #[error("expected {expected} rows, got {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("combiner fit failed: {0}")]
    Train(#[from] TrainError),
    #[error(transparent)]
    Combiner(#[from] CombinerFormatError),
}

/// Per-row probabilities produced by models that never saw the row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfFoldTable {
    rows: Vec<Vec<f64>>,
}

impl OutOfFoldTable {
    /// Scatter the fold predictions back to training-row positions.
    ///
    /// Rows predicted by several folds (repeated shuffle splits) get the mean; a row no
    /// fold predicted is an error.
    pub fn assemble<M>(n_rows: usize, fits: &[FoldFit<M>]) -> Result<Self, FusionError> {
        let mut sums: Vec<Vec<f64>> = vec![Vec::new(); n_rows];
        let mut hits = vec![0u32; n_rows];
        for fit in fits {
            for (&row, proba) in fit.validation.iter().zip(&fit.probabilities) {
                let Some(slot) = sums.get_mut(row) else {
                    return Err(FusionError::RowOutOfRange {
                        fold: fit.fold,
                        row,
                        rows: n_rows,
                    });
                };
                if slot.is_empty() {
                    slot.resize(proba.len(), 0.0);
                }
                for (acc, p) in slot.iter_mut().zip(proba) {
                    *acc += p;
                }
                hits[row] += 1;
            }
        }
        if let Some(row) = hits.iter().position(|&count| count == 0) {
            return Err(FusionError::MissingOutOfFold { row });
        }
        for (slot, &count) in sums.iter_mut().zip(&hits) {
            if count > 1 {
                let scale = f64::from(count);
                slot.iter_mut().for_each(|p| *p /= scale);
            }
        }
        Ok(Self { rows: sums })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.rows[idx]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}

/// `[p_cyber, rule_score, novelty]` for one row.
///
/// The rule score always comes from the guard bitmask, never from the stored feature slot.
pub fn meta_features(probabilities: &[f64], guard_bits: GuardBits) -> [f64; 3] {
    let p_cyber = probabilities
        .get(Label::Cyber.index())
        .copied()
        .unwrap_or(0.0);
    let max = probabilities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let novelty = if max < NOVELTY_THRESHOLD { 1.0 } else { 0.0 };
    [p_cyber, guard_bits.rule_score(), novelty]
}

/// Fit the combiner on out-of-fold meta-features against `label == Cyber`.
pub fn fit_combiner(
    oof: &OutOfFoldTable,
    guard_bits: &[GuardBits],
    labels: &[Label],
    options: &CombinerOptions,
) -> Result<CombinerModel, FusionError> {
    for found in [guard_bits.len(), labels.len()] {
        if found != oof.len() {
            return Err(FusionError::LengthMismatch {
                expected: oof.len(),
                found,
            });
        }
    }
    let meta: Vec<[f64; 3]> = oof
        .rows()
        .iter()
        .zip(guard_bits)
        .map(|(proba, &bits)| meta_features(proba, bits))
        .collect();
    let targets: Vec<usize> = labels
        .iter()
        .map(|&label| usize::from(label == Label::Cyber))
        .collect();
    let logistic = options.trainer().fit(&meta, &targets)?;
    let combiner = CombinerModel::from_logistic(&logistic)?;
    info!(
        w_pcyber = combiner.w_pcyber,
        w_rule = combiner.w_rule,
        w_novelty = combiner.w_novelty,
        bias = combiner.bias,
        "Fitted risk combiner"
    );
    Ok(combiner)
}
