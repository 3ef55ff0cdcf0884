//! Machine learning building blocks: the trainer/classifier seam, the forest and logistic
//! implementations, fold fitting, calibration and metrics.

pub mod calibration;
pub mod classifier;
pub mod cross_val;
pub mod forest;
pub mod logreg;
pub mod metrics;

pub use classifier::{Classifier, TrainError, Trainer, TreeStructures};
