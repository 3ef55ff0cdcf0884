//! Binary logistic regression used by the risk combiner and Platt scaling.

use serde::{Deserialize, Serialize};

use crate::ml::classifier::Classifier;

mod train;
pub use train::{LogisticOptions, LogisticTrainer, train_logistic};

/// Fitted binary logistic model: `p = sigmoid(w . x + b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticModel {
    /// Validate the parameter values.
    pub fn validate(&self) -> Result<(), String> {
        if self.weights.is_empty() {
            return Err("No weights defined".to_string());
        }
        if self.weights.iter().any(|w| !w.is_finite()) || !self.bias.is_finite() {
            return Err("weights and bias must be finite".to_string());
        }
        Ok(())
    }

    /// Linear score before the sigmoid. Missing features count as 0.
    pub fn decision(&self, row: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(row)
            .fold(self.bias, |acc, (w, x)| acc + w * x)
    }

    /// Probability of the positive class.
    pub fn probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.decision(row))
    }
}

impl Classifier for LogisticModel {
    fn n_classes(&self) -> usize {
        2
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let p = self.probability(row);
        vec![1.0 - p, p]
    }
}

/// Logistic function, stable for large |z|.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
