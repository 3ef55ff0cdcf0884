//! Held-out evaluation of the fused risk score and per-class reports.

use serde::{Deserialize, Serialize};

use crate::export::CombinerModel;
use crate::fusion::meta_features;
use crate::ml::classifier::Classifier;
use crate::ml::metrics::{ClassReport, ConfusionMatrix, binary_precision_recall_f1, roc_auc};
use crate::telemetry::{CLASS_COUNT, Label, Sample};

/// Risk at or above this value flags a row as cyber.
pub const RISK_THRESHOLD: f64 = 0.5;

/// Binary metrics of the fused risk score, positive class cyber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub risk_precision: f64,
    pub risk_recall: f64,
    pub risk_f1: f64,
    /// `None` when the held-out rows contain a single class.
    pub risk_auc: Option<f64>,
}

/// Score held-out samples with `primary` + `combiner` and compare against `label == Cyber`.
pub fn evaluate_risk<C: Classifier>(
    samples: &[Sample],
    primary: &C,
    combiner: &CombinerModel,
) -> RiskMetrics {
    let scores: Vec<f64> = samples
        .iter()
        .map(|sample| {
            let proba = primary.predict_proba(sample.features.as_ref());
            combiner.score(&meta_features(&proba, sample.features.guard_bits()))
        })
        .collect();
    let truth: Vec<bool> = samples
        .iter()
        .map(|sample| sample.label == Label::Cyber)
        .collect();
    let predicted: Vec<bool> = scores.iter().map(|&s| s >= RISK_THRESHOLD).collect();
    let (risk_precision, risk_recall, risk_f1) = binary_precision_recall_f1(&truth, &predicted);
    RiskMetrics {
        risk_precision,
        risk_recall,
        risk_f1,
        risk_auc: roc_auc(&truth, &scores),
    }
}

/// Per-class precision/recall/F1 of `model`'s argmax predictions.
pub fn class_report<C: Classifier>(model: &C, samples: &[Sample]) -> ClassReport {
    let mut cm = ConfusionMatrix::new(CLASS_COUNT);
    for sample in samples {
        cm.add(
            sample.label.index(),
            model.predict_class(sample.features.as_ref()),
        );
    }
    let names = Label::ALL.map(Label::name);
    ClassReport::from_confusion(&cm, &names)
}
