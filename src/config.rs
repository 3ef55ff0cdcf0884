//! TOML configuration for a training run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fusion::CombinerOptions;
use crate::ml::classifier::TrainError;
use crate::ml::forest::ForestOptions;
use crate::split::{SplitError, SplitOptions};
use crate::telemetry::{GeneratorConfig, GeneratorError};

/// Errors that may occur while loading or validating the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid generator settings: {0}")]
    Generator(#[from] GeneratorError),
    #[error("Invalid split settings: {0}")]
    Split(#[from] SplitError),
    #[error("Invalid model settings: {0}")]
    Model(#[from] TrainError),
}

/// Where artifacts go and how folds are fitted.
///
/// Config keys (TOML): `forest_path`, `combiner_path`, `parallel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub forest_path: PathBuf,
    pub combiner_path: PathBuf,
    /// Fit fold models on scoped worker threads.
    pub parallel: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            forest_path: PathBuf::from("exported_forest.model"),
            combiner_path: PathBuf::from("exported_calibrator.cfg"),
            parallel: true,
        }
    }
}

/// Full run configuration. An empty file yields the defaults.
///
/// Config keys (TOML): `generator`, `split`, `forest`, `combiner`, `output`.
///
/// The generator seed also keys the train/test split and the fold fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    pub split: SplitOptions,
    pub forest: ForestOptions,
    pub combiner: CombinerOptions,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from disk; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Seed shared by the generator, the splits and the forest.
    pub fn seed(&self) -> u64 {
        self.generator.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.generator.seed = seed;
        self.forest.seed = seed;
    }

    /// Check every section before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generator.validate()?;
        self.split.validate()?;
        self.forest.validate()?;
        self.combiner.trainer().options.validate()?;
        if self
            .combiner
            .class_weights
            .iter()
            .any(|w| !w.is_finite() || *w <= 0.0)
        {
            return Err(TrainError::InvalidOptions(format!(
                "combiner class_weights must be > 0 (got {:?})",
                self.combiner.class_weights
            ))
            .into());
        }
        Ok(())
    }
}
