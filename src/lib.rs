//! Library exports for reuse in the binaries, benchmarks and tests.
/// Per-user application directories.
pub mod app_dirs;
/// TOML run configuration.
pub mod config;
/// Scoring frames with exported artifacts.
pub mod detect;
/// Held-out risk and per-class evaluation.
pub mod evaluate;
/// Text artifact formats and atomic commits.
pub mod export;
/// Out-of-fold meta features and the risk combiner.
pub mod fusion;
/// Tracing setup.
pub mod logging;
/// Classifiers, trainers and metrics.
pub mod ml;
/// The batch training run.
pub mod pipeline;
/// Group-aware splits and folds.
pub mod split;
/// Synthetic telemetry and its CSV form.
pub mod telemetry;
