use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LogisticModel, sigmoid};
use crate::ml::classifier::{TrainError, Trainer, validate_training_rows};

const RIDGE: f64 = 1e-10;
const MAX_HALVINGS: usize = 40;
const ARMIJO: f64 = 1e-4;

/// Solver options for the binary logistic model.
///
/// Config keys (TOML): `l2`, `max_iter`, `tolerance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticOptions {
    /// L2 penalty on the weights (the bias is never penalized).
    pub l2: f64,
    /// Newton iteration cap.
    pub max_iter: usize,
    /// Stop once half the squared Newton decrement drops below this.
    pub tolerance: f64,
}

impl Default for LogisticOptions {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iter: 500,
            tolerance: 1e-8,
        }
    }
}

impl LogisticOptions {
    pub fn validate(&self) -> Result<(), TrainError> {
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(TrainError::InvalidOptions(format!(
                "l2 must be >= 0 (got {})",
                self.l2
            )));
        }
        if self.max_iter == 0 {
            return Err(TrainError::InvalidOptions("max_iter must be >= 1".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(TrainError::InvalidOptions(format!(
                "tolerance must be > 0 (got {})",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// [`Trainer`] for hard 0/1 labels with per-class sample weights.
#[derive(Debug, Clone)]
pub struct LogisticTrainer {
    pub options: LogisticOptions,
    /// Weight applied to rows of class 0 and class 1.
    pub class_weights: [f64; 2],
}

impl Default for LogisticTrainer {
    fn default() -> Self {
        Self {
            options: LogisticOptions::default(),
            class_weights: [1.0, 1.0],
        }
    }
}

impl Trainer for LogisticTrainer {
    type Model = LogisticModel;

    fn fit<R: AsRef<[f64]> + Sync>(
        &self,
        x: &[R],
        y: &[usize],
    ) -> Result<LogisticModel, TrainError> {
        validate_training_rows(x, y, 2)?;
        let positives = y.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(TrainError::SingleClass);
        }
        let targets: Vec<f64> = y.iter().map(|&label| label as f64).collect();
        let weights: Vec<f64> = y.iter().map(|&label| self.class_weights[label]).collect();
        train_logistic(x, &targets, &weights, &self.options)
    }
}

/// Fit a weighted logistic model on soft targets in `[0, 1]`.
///
/// Minimizes `sum_i s_i * logloss(t_i, sigmoid(w.x_i + b)) + l2/2 * |w|^2` with damped Newton
/// steps. Hitting `max_iter` logs a warning and returns the last iterate.
pub fn train_logistic<R: AsRef<[f64]>>(
    x: &[R],
    targets: &[f64],
    sample_weights: &[f64],
    options: &LogisticOptions,
) -> Result<LogisticModel, TrainError> {
    options.validate()?;
    if sample_weights.len() != x.len() || targets.len() != x.len() {
        return Err(TrainError::LengthMismatch {
            rows: x.len(),
            labels: targets.len().min(sample_weights.len()),
        });
    }
    let zeros = vec![0usize; x.len()];
    let dim = validate_training_rows(x, &zeros, 1)?;
    if let Some(bad) = targets
        .iter()
        .position(|t| !t.is_finite() || !(0.0..=1.0).contains(t))
    {
        return Err(TrainError::InvalidOptions(format!(
            "target at row {bad} outside [0, 1]"
        )));
    }
    if sample_weights.iter().any(|s| !s.is_finite() || *s < 0.0)
        || sample_weights.iter().sum::<f64>() <= 0.0
    {
        return Err(TrainError::InvalidOptions(
            "sample weights must be non-negative with a positive total".into(),
        ));
    }

    let problem = Problem {
        x,
        targets,
        weights: sample_weights,
        l2: options.l2,
        dim,
    };
    // Parameter layout: weights followed by the bias.
    let mut theta = vec![0.0; dim + 1];
    let mut loss = problem.loss(&theta);
    for iter in 0..options.max_iter {
        let (grad, hessian) = problem.gradient_hessian(&theta);
        let Some(step) = solve(hessian, grad.iter().map(|g| -g).collect()) else {
            return Err(TrainError::Solver("singular Hessian".into()));
        };
        let slope: f64 = grad.iter().zip(&step).map(|(g, d)| g * d).sum();
        if -slope / 2.0 <= options.tolerance {
            debug!(iterations = iter, loss, "logistic solver converged");
            return finish(theta, dim);
        }

        let mut scale = 1.0;
        let mut accepted = false;
        for _ in 0..MAX_HALVINGS {
            let candidate: Vec<f64> = theta
                .iter()
                .zip(&step)
                .map(|(t, d)| t + scale * d)
                .collect();
            let candidate_loss = problem.loss(&candidate);
            if candidate_loss <= loss + ARMIJO * scale * slope {
                theta = candidate;
                loss = candidate_loss;
                accepted = true;
                break;
            }
            scale *= 0.5;
        }
        if !accepted {
            // No descent left at machine precision.
            debug!(iterations = iter, loss, "logistic line search stalled");
            return finish(theta, dim);
        }
    }
    warn!(
        max_iter = options.max_iter,
        loss, "logistic solver did not converge; using last iterate"
    );
    finish(theta, dim)
}

fn finish(mut theta: Vec<f64>, dim: usize) -> Result<LogisticModel, TrainError> {
    let bias = theta.pop().unwrap_or(0.0);
    debug_assert_eq!(theta.len(), dim);
    let model = LogisticModel {
        weights: theta,
        bias,
    };
    model.validate().map_err(TrainError::Solver)?;
    Ok(model)
}

struct Problem<'a, R> {
    x: &'a [R],
    targets: &'a [f64],
    weights: &'a [f64],
    l2: f64,
    dim: usize,
}

impl<R: AsRef<[f64]>> Problem<'_, R> {
    fn linear(&self, theta: &[f64], row: &[f64]) -> f64 {
        row.iter()
            .zip(theta)
            .fold(theta[self.dim], |acc, (x, w)| acc + w * x)
    }

    fn loss(&self, theta: &[f64]) -> f64 {
        let data: f64 = self
            .x
            .iter()
            .zip(self.targets)
            .zip(self.weights)
            .map(|((row, &t), &s)| {
                let z = self.linear(theta, row.as_ref());
                s * (softplus(z) - t * z)
            })
            .sum();
        let penalty: f64 = theta[..self.dim].iter().map(|w| w * w).sum();
        data + 0.5 * self.l2 * penalty
    }

    /// Gradient and row-major Hessian over `(weights, bias)`.
    fn gradient_hessian(&self, theta: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = self.dim + 1;
        let mut grad = vec![0.0; n];
        let mut hessian = vec![0.0; n * n];
        let mut feat = vec![0.0; n];
        for ((row, &t), &s) in self.x.iter().zip(self.targets).zip(self.weights) {
            if s == 0.0 {
                continue;
            }
            let row = row.as_ref();
            feat[..self.dim].copy_from_slice(row);
            feat[self.dim] = 1.0;
            let p = sigmoid(self.linear(theta, row));
            let residual = s * (p - t);
            let curvature = s * p * (1.0 - p);
            for i in 0..n {
                grad[i] += residual * feat[i];
                let base = i * n;
                for j in i..n {
                    hessian[base + j] += curvature * feat[i] * feat[j];
                }
            }
        }
        for i in 0..n {
            for j in 0..i {
                hessian[i * n + j] = hessian[j * n + i];
            }
            hessian[i * n + i] += RIDGE;
        }
        for i in 0..self.dim {
            grad[i] += self.l2 * theta[i];
            hessian[i * n + i] += self.l2;
        }
        (grad, hessian)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r1, &r2| a[r1 * n + col].abs().total_cmp(&a[r2 * n + col].abs()))?;
        if a[pivot * n + col].abs() < f64::MIN_POSITIVE {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[row * n + col] / a[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row * n + k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row * n + row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
