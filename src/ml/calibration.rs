//! Sigmoid (Platt) calibration of per-fold models.
//!
//! Each fold model is calibrated on its own validation rows, one-vs-rest per class. At
//! prediction time the calibrated class scores are normalized per fold and averaged across
//! folds.

use tracing::debug;

use crate::ml::classifier::{Classifier, TrainError};
use crate::ml::cross_val::FoldFit;
use crate::ml::logreg::{LogisticModel, LogisticOptions, train_logistic};

/// One-dimensional sigmoid mapping a raw class score to a calibrated probability.
#[derive(Debug, Clone, PartialEq)]
pub struct PlattScaler {
    model: LogisticModel,
}

impl PlattScaler {
    /// Fit on raw scores against binary outcomes using Platt's smoothed targets.
    pub fn fit(scores: &[f64], positive: &[bool]) -> Result<Self, TrainError> {
        let n_pos = positive.iter().filter(|&&p| p).count() as f64;
        let n_neg = positive.len() as f64 - n_pos;
        let hi = (n_pos + 1.0) / (n_pos + 2.0);
        let lo = 1.0 / (n_neg + 2.0);
        let targets: Vec<f64> = positive.iter().map(|&p| if p { hi } else { lo }).collect();
        let rows: Vec<[f64; 1]> = scores.iter().map(|&s| [s]).collect();
        let weights = vec![1.0; rows.len()];
        let options = LogisticOptions {
            l2: 0.0,
            ..LogisticOptions::default()
        };
        let model = train_logistic(&rows, &targets, &weights, &options)?;
        Ok(Self { model })
    }

    pub fn slope(&self) -> f64 {
        self.model.weights[0]
    }

    pub fn intercept(&self) -> f64 {
        self.model.bias
    }

    pub fn transform(&self, score: f64) -> f64 {
        self.model.probability(&[score])
    }
}

#[derive(Debug, Clone)]
struct CalibratedFold<M> {
    model: M,
    scalers: Vec<PlattScaler>,
}

/// Fold models with per-class sigmoid calibration, averaged at prediction time.
#[derive(Debug, Clone)]
pub struct CalibratedClassifier<M> {
    folds: Vec<CalibratedFold<M>>,
    n_classes: usize,
}

impl<M: Classifier> CalibratedClassifier<M> {
    /// Calibrate already fitted fold models on their validation predictions.
    ///
    /// `y` holds the labels of the rows the folds index into.
    pub fn from_folds(fits: Vec<FoldFit<M>>, y: &[usize]) -> Result<Self, TrainError> {
        let Some(first) = fits.first() else {
            return Err(TrainError::EmptyDataset);
        };
        let n_classes = first.model.n_classes();
        let mut folds = Vec::with_capacity(fits.len());
        for fit in fits {
            if fit.validation.is_empty() {
                return Err(TrainError::EmptyDataset);
            }
            let labels: Vec<usize> = fit.validation.iter().map(|&row| y[row]).collect();
            let mut scalers = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                let scores: Vec<f64> = fit
                    .probabilities
                    .iter()
                    .map(|row| row.get(class).copied().unwrap_or(0.0))
                    .collect();
                let positive: Vec<bool> = labels.iter().map(|&label| label == class).collect();
                scalers.push(PlattScaler::fit(&scores, &positive)?);
            }
            debug!(fold = fit.fold, "calibrated fold model");
            folds.push(CalibratedFold {
                model: fit.model,
                scalers,
            });
        }
        Ok(Self { folds, n_classes })
    }

    pub fn fold_count(&self) -> usize {
        self.folds.len()
    }
}

impl<M: Classifier> Classifier for CalibratedClassifier<M> {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut acc = vec![0.0; self.n_classes];
        for fold in &self.folds {
            let raw = fold.model.predict_proba(row);
            let mut calibrated: Vec<f64> = fold
                .scalers
                .iter()
                .enumerate()
                .map(|(class, scaler)| scaler.transform(raw.get(class).copied().unwrap_or(0.0)))
                .collect();
            let total: f64 = calibrated.iter().sum();
            if total > 0.0 {
                calibrated.iter_mut().for_each(|p| *p /= total);
            } else {
                calibrated.fill(1.0 / self.n_classes as f64);
            }
            for (slot, p) in acc.iter_mut().zip(calibrated) {
                *slot += p;
            }
        }
        let folds = self.folds.len().max(1) as f64;
        acc.iter_mut().for_each(|p| *p /= folds);
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Fixed(Vec<f64>);

    impl Classifier for Fixed {
        fn n_classes(&self) -> usize {
            self.0.len()
        }

        fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
            // Score class 1 by the first feature.
            let p = row[0].clamp(0.0, 1.0);
            vec![1.0 - p, p]
        }
    }

    #[test]
    fn platt_scaler_is_monotone_in_score() {
        let scores = [0.1, 0.2, 0.3, 0.6, 0.7, 0.9, 0.4, 0.8];
        let positive = [false, false, false, true, true, true, false, true];
        let scaler = PlattScaler::fit(&scores, &positive).unwrap();
        assert!(scaler.slope() > 0.0);
        assert!(scaler.transform(0.9) > scaler.transform(0.1));
        let p = scaler.transform(0.5);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn platt_scaler_handles_single_outcome() {
        let scaler = PlattScaler::fit(&[0.2, 0.4, 0.6], &[false, false, false]).unwrap();
        assert!(scaler.intercept().is_finite());
        assert!(scaler.transform(0.5) < 0.5);
    }

    #[test]
    fn calibrated_rows_sum_to_one() {
        let y = vec![0, 0, 1, 1, 0, 1];
        let fits: Vec<FoldFit<Fixed>> = (0..2)
            .map(|fold| {
                let validation: Vec<usize> = (0..6).filter(|row| row % 2 == fold).collect();
                let probabilities = validation
                    .iter()
                    .map(|&row| {
                        let p = if y[row] == 1 { 0.8 } else { 0.3 };
                        vec![1.0 - p, p]
                    })
                    .collect();
                FoldFit {
                    fold,
                    model: Fixed(vec![0.5, 0.5]),
                    validation,
                    probabilities,
                }
            })
            .collect();
        let calibrated = CalibratedClassifier::from_folds(fits, &y).unwrap();
        assert_eq!(calibrated.fold_count(), 2);
        for x in [0.0, 0.3, 0.8, 1.0] {
            let proba = calibrated.predict_proba(&[x]);
            assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert!(calibrated.predict_proba(&[0.9])[1] > calibrated.predict_proba(&[0.1])[1]);
    }

    #[test]
    fn empty_fold_list_is_rejected() {
        let fits: Vec<FoldFit<Fixed>> = Vec::new();
        assert_eq!(
            CalibratedClassifier::from_folds(fits, &[]).unwrap_err(),
            TrainError::EmptyDataset
        );
    }
}
