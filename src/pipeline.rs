//! One batch training run: generate, split, fit, fuse, export, evaluate.

use std::panic;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, PipelineConfig};
use crate::evaluate::{RiskMetrics, class_report, evaluate_risk};
use crate::export::{CombinerModel, ExportError, commit_artifacts, export_forest};
use crate::fusion::{FusionError, OutOfFoldTable, fit_combiner};
use crate::ml::calibration::CalibratedClassifier;
use crate::ml::classifier::{TrainError, Trainer, TreeStructures};
use crate::ml::cross_val::fit_folds;
use crate::ml::forest::ForestTrainer;
use crate::ml::metrics::ClassReport;
use crate::split::{FoldStrategy, SplitError, plan_folds, train_test_split};
use crate::telemetry::{
    FeatureVector, GeneratorError, GuardBits, Label, Sample, class_indices, generate, group_ids,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("model training failed: {0}")]
    Train(#[from] TrainError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub train_groups: usize,
    pub test_groups: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub fold_strategy: FoldStrategy,
    pub forest_trees: usize,
    pub forest_nodes: usize,
    pub combiner: CombinerModel,
    pub risk: RiskMetrics,
    /// Calibrated fold ensemble on the held-out groups.
    pub class_report: ClassReport,
    pub forest_path: PathBuf,
    pub combiner_path: PathBuf,
}

fn distinct_groups(samples: &[Sample]) -> usize {
    let mut groups = group_ids(samples);
    groups.sort_unstable();
    groups.dedup();
    groups.len()
}

/// Run the whole pipeline. Nothing is written unless every fit succeeds.
pub fn run(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    config.validate()?;
    let seed = config.seed();

    let samples = generate(&config.generator)?;
    info!(
        samples = samples.len(),
        groups = config.generator.group_count,
        "Generated telemetry"
    );

    let split = train_test_split(&group_ids(&samples), config.split.test_fraction, seed)?;
    let train: Vec<Sample> = split.train.iter().map(|&row| samples[row]).collect();
    let test: Vec<Sample> = split.test.iter().map(|&row| samples[row]).collect();
    let train_groups = distinct_groups(&train);
    let test_groups = distinct_groups(&test);
    info!(
        train_samples = train.len(),
        test_samples = test.len(),
        train_groups,
        test_groups,
        "Split telemetry by group"
    );

    let x_train: Vec<FeatureVector> = train.iter().map(|sample| sample.features).collect();
    let y_train = class_indices(&train);
    let plan = plan_folds(&group_ids(&train), &config.split, seed)?;
    info!(strategy = ?plan.strategy, folds = plan.len(), "Planned folds");

    let trainer = ForestTrainer::new(config.forest.clone());
    let parallel = config.output.parallel;
    let (primary, fits) = if parallel {
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| trainer.fit(&x_train, &y_train));
            let fits = fit_folds(&trainer, &x_train, &y_train, &plan, true);
            let primary = match handle.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            };
            (primary, fits)
        })
    } else {
        (
            trainer.fit(&x_train, &y_train),
            fit_folds(&trainer, &x_train, &y_train, &plan, false),
        )
    };
    let primary = primary?;
    let fits = fits?;
    info!(
        trees = primary.forest().trees.len(),
        nodes = primary.forest().node_count(),
        "Trained primary forest"
    );

    let oof = OutOfFoldTable::assemble(x_train.len(), &fits)?;
    let guard_bits: Vec<GuardBits> = train.iter().map(|s| s.features.guard_bits()).collect();
    let labels: Vec<Label> = train.iter().map(|sample| sample.label).collect();
    let combiner = fit_combiner(&oof, &guard_bits, &labels, &config.combiner)?;

    let calibrated = CalibratedClassifier::from_folds(fits, &y_train)?;
    let report = class_report(&calibrated, &test);
    info!(
        folds = calibrated.fold_count(),
        accuracy = report.accuracy,
        "Calibrated fold ensemble"
    );

    let forest_text = export_forest(primary.forest());
    let combiner_text = combiner.to_config_string();
    commit_artifacts(&[
        (config.output.forest_path.as_path(), forest_text.as_str()),
        (config.output.combiner_path.as_path(), combiner_text.as_str()),
    ])?;

    let risk = evaluate_risk(&test, &primary, &combiner);
    info!(
        precision = risk.risk_precision,
        recall = risk.risk_recall,
        f1 = risk.risk_f1,
        auc = ?risk.risk_auc,
        "Evaluated risk fusion"
    );

    Ok(PipelineReport {
        train_groups,
        test_groups,
        train_samples: train.len(),
        test_samples: test.len(),
        fold_strategy: plan.strategy,
        forest_trees: primary.forest().trees.len(),
        forest_nodes: primary.forest().node_count(),
        combiner,
        risk,
        class_report: report,
        forest_path: config.output.forest_path.clone(),
        combiner_path: config.output.combiner_path.clone(),
    })
}
