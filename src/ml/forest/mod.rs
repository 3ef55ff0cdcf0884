//! Bagged decision-tree ensemble over telemetry feature vectors.

mod model;
mod train;

pub use model::{DecisionForest, FALLBACK_PROBABILITIES, ForestModel, Node, Tree};
pub use train::{ForestOptions, ForestTrainer, train_forest};
