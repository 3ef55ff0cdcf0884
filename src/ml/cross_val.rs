//! Per-fold model fitting over a [`FoldPlan`].

use std::panic;

use tracing::debug;

use crate::ml::classifier::{Classifier, TrainError, Trainer};
use crate::split::{Fold, FoldPlan};

/// A model trained on one fold plus its predictions for that fold's validation rows.
#[derive(Debug, Clone)]
pub struct FoldFit<M> {
    pub fold: usize,
    pub model: M,
    /// Validation row indices (into the rows passed to [`fit_folds`]).
    pub validation: Vec<usize>,
    /// Probability rows aligned with `validation`.
    pub probabilities: Vec<Vec<f64>>,
}

/// Fit one fresh model per fold on that fold's training rows only.
///
/// With `parallel` each fold runs on its own scoped thread; results are always returned in
/// fold order and the first failing fold (in fold order) aborts the whole call.
pub fn fit_folds<T, R>(
    trainer: &T,
    x: &[R],
    y: &[usize],
    plan: &FoldPlan,
    parallel: bool,
) -> Result<Vec<FoldFit<T::Model>>, TrainError>
where
    T: Trainer,
    T::Model: Send,
    R: AsRef<[f64]> + Sync,
{
    if x.len() != y.len() {
        return Err(TrainError::LengthMismatch {
            rows: x.len(),
            labels: y.len(),
        });
    }
    let results: Vec<Result<FoldFit<T::Model>, TrainError>> = if parallel && plan.len() > 1 {
        std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .folds
                .iter()
                .enumerate()
                .map(|(idx, fold)| scope.spawn(move || fit_fold(trainer, x, y, idx, fold)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        })
    } else {
        plan.folds
            .iter()
            .enumerate()
            .map(|(idx, fold)| fit_fold(trainer, x, y, idx, fold))
            .collect()
    };
    results.into_iter().collect()
}

fn fit_fold<T, R>(
    trainer: &T,
    x: &[R],
    y: &[usize],
    idx: usize,
    fold: &Fold,
) -> Result<FoldFit<T::Model>, TrainError>
where
    T: Trainer,
    R: AsRef<[f64]> + Sync,
{
    let train_x: Vec<&[f64]> = fold.train.iter().map(|&row| x[row].as_ref()).collect();
    let train_y: Vec<usize> = fold.train.iter().map(|&row| y[row]).collect();
    let model = trainer.fit(&train_x, &train_y)?;
    let probabilities = fold
        .validation
        .iter()
        .map(|&row| model.predict_proba(x[row].as_ref()))
        .collect();
    debug!(
        fold = idx,
        train_rows = fold.train.len(),
        validation_rows = fold.validation.len(),
        "fitted fold model"
    );
    Ok(FoldFit {
        fold: idx,
        model,
        validation: fold.validation.clone(),
        probabilities,
    })
}
