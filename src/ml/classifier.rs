//! Trait seams between the pipeline and the model implementations.
//!
//! The stacking and export code only talk to models through [`Trainer`], [`Classifier`] and
//! [`TreeStructures`], so a different ensemble can back the pipeline without touching fusion
//! or export logic.

use thiserror::Error;

use super::forest::ForestModel;

/// A fitted model producing class probabilities.
pub trait Classifier: Send + Sync {
    /// Number of classes in each probability row.
    fn n_classes(&self) -> usize;

    /// Class probabilities for one feature row; the values sum to 1.
    fn predict_proba(&self, row: &[f64]) -> Vec<f64>;

    /// Probabilities for many rows, in input order.
    fn predict_proba_batch<R: AsRef<[f64]>>(&self, rows: &[R]) -> Vec<Vec<f64>>
    where
        Self: Sized,
    {
        rows.iter()
            .map(|row| self.predict_proba(row.as_ref()))
            .collect()
    }

    /// Most probable class index.
    fn predict_class(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row))
    }
}

/// Fits a fresh model from labeled rows.
pub trait Trainer: Sync {
    type Model: Classifier;

    fn fit<R: AsRef<[f64]> + Sync>(&self, x: &[R], y: &[usize]) -> Result<Self::Model, TrainError>;
}

/// Models that expose the decision trees they were built from.
pub trait TreeStructures {
    fn forest(&self) -> &ForestModel;
}

#[derive(Debug, Error, PartialEq)]
pub enum TrainError {
    #[error("empty training set")]
    EmptyDataset,
    #[error("mismatched training inputs ({rows} rows) and labels ({labels})")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("inconsistent row length {found} at row {row} (expected {expected})")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },
    #[error("non-finite value at row {row}")]
    NonFinite { row: usize },
    #[error("training targets contain a single class")]
    SingleClass,
    #[error("invalid training options: {0}")]
    InvalidOptions(String),
    #[error("solver failed: {0}")]
    Solver(String),
}

/// Check shape, label range and finiteness; returns the row width.
pub fn validate_training_rows<R: AsRef<[f64]>>(
    x: &[R],
    y: &[usize],
    n_classes: usize,
) -> Result<usize, TrainError> {
    if x.len() != y.len() {
        return Err(TrainError::LengthMismatch {
            rows: x.len(),
            labels: y.len(),
        });
    }
    let Some(first) = x.first() else {
        return Err(TrainError::EmptyDataset);
    };
    let dim = first.as_ref().len();
    for (row, values) in x.iter().enumerate() {
        let values = values.as_ref();
        if values.len() != dim {
            return Err(TrainError::RowLength {
                row,
                expected: dim,
                found: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TrainError::NonFinite { row });
        }
    }
    if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
        return Err(TrainError::LabelOutOfRange {
            label,
            classes: n_classes,
        });
    }
    Ok(dim)
}

/// Index of the largest value (first one wins on ties).
pub fn argmax(values: &[f64]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}
