//! Evaluation metrics for classification models.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Build from parallel truth/prediction slices; out-of-range pairs are ignored.
    pub fn from_predictions(n_classes: usize, truth: &[usize], predicted: &[usize]) -> Self {
        let mut cm = Self::new(n_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            cm.add(t, p);
        }
        cm
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    /// Total number of true examples for the class.
    pub support: u32,
}

impl PerClassStats {
    pub fn f1(&self) -> f64 {
        f1_score(self.precision, self.recall)
    }
}

/// One row of a per-class report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetric {
    pub class_id: String,
    pub support: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Serializable per-class report plus overall accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub per_class: Vec<ClassMetric>,
    pub accuracy: f64,
    pub support: u32,
}

impl ClassReport {
    pub fn from_confusion(cm: &ConfusionMatrix, class_names: &[&str]) -> Self {
        let per_class = precision_recall_by_class(cm)
            .into_iter()
            .enumerate()
            .map(|(idx, stats)| ClassMetric {
                class_id: class_names
                    .get(idx)
                    .map(|name| (*name).to_string())
                    .unwrap_or_else(|| idx.to_string()),
                support: stats.support,
                precision: stats.precision,
                recall: stats.recall,
                f1: stats.f1(),
            })
            .collect::<Vec<_>>();
        let support = per_class.iter().map(|row| row.support).sum();
        Self {
            per_class,
            accuracy: accuracy(cm),
            support,
        }
    }

    /// Fixed-width text table.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:>10} {:>9} {:>9} {:>9} {:>9}\n",
            "", "precision", "recall", "f1-score", "support"
        );
        for row in &self.per_class {
            out.push_str(&format!(
                "{:>10} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
                row.class_id, row.precision, row.recall, row.f1, row.support
            ));
        }
        out.push_str(&format!(
            "{:>10} {:>9} {:>9} {:>9.2} {:>9}\n",
            "accuracy", "", "", self.accuracy, self.support
        ));
        out
    }
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = f64::from(cm.get(class_idx, class_idx));
        let mut fp = 0f64;
        let mut fn_ = 0f64;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += f64::from(v);
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += f64::from(cm.get(i, class_idx));
            }
        }
        stats.push(PerClassStats {
            precision: ratio(tp, tp + fp),
            recall: ratio(tp, tp + fn_),
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let mut correct = 0u64;
    let mut total = 0u64;
    for truth in 0..cm.n_classes {
        for predicted in 0..cm.n_classes {
            let v = u64::from(cm.get(truth, predicted));
            total += v;
            if truth == predicted {
                correct += v;
            }
        }
    }
    ratio(correct as f64, total as f64)
}

/// Harmonic mean of precision and recall; 0 when both are 0.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}

/// Precision, recall and F1 of binary predictions (zero division yields 0).
pub fn binary_precision_recall_f1(truth: &[bool], predicted: &[bool]) -> (f64, f64, f64) {
    let mut tp = 0u64;
    let mut fp = 0u64;
    let mut fn_ = 0u64;
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t, p) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = ratio(tp as f64, (tp + fp) as f64);
    let recall = ratio(tp as f64, (tp + fn_) as f64);
    (precision, recall, f1_score(precision, recall))
}

/// Area under the ROC curve from scores, using average ranks for ties.
///
/// Returns `None` when `truth` contains only one class.
pub fn roc_auc(truth: &[bool], scores: &[f64]) -> Option<f64> {
    let n = truth.len().min(scores.len());
    let n_pos = truth[..n].iter().filter(|&&t| t).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; tied block [start, end) shares the mean rank.
        let avg_rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            if truth[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        start = end;
    }
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}
