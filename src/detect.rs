//! Scores telemetry frames with exported artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::export::{CombinerFormatError, CombinerModel, ForestFormatError, parse_forest};
use crate::fusion::meta_features;
use crate::ml::forest::ForestModel;
use crate::telemetry::Label;
use crate::telemetry::csv::TelemetryFrame;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid forest file {path}: {source}")]
    Forest {
        path: PathBuf,
        source: ForestFormatError,
    },
    #[error("Invalid combiner file {path}: {source}")]
    Combiner {
        path: PathBuf,
        source: CombinerFormatError,
    },
}

/// Result of scoring one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub ts: f64,
    pub risk: f64,
    pub class: Label,
    /// Guards that fired, see [`crate::telemetry::GuardBits::reason`].
    pub reason: String,
    pub p_cyber: f64,
    pub novelty: bool,
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3},{:.6},{},{},pcy={:.6},nov={}",
            self.ts,
            self.risk,
            self.class.index(),
            self.reason,
            self.p_cyber,
            if self.novelty { "y" } else { "n" }
        )
    }
}

/// Forest plus combiner, as loaded from the exported files.
#[derive(Debug, Clone)]
pub struct Detector {
    forest: ForestModel,
    combiner: CombinerModel,
}

impl Detector {
    pub fn new(forest: ForestModel, combiner: CombinerModel) -> Self {
        Self { forest, combiner }
    }

    pub fn load(forest_path: &Path, combiner_path: &Path) -> Result<Self, DetectError> {
        let forest_text = read(forest_path)?;
        let forest = parse_forest(&forest_text).map_err(|source| DetectError::Forest {
            path: forest_path.to_path_buf(),
            source,
        })?;
        let combiner_text = read(combiner_path)?;
        let combiner =
            CombinerModel::parse(&combiner_text).map_err(|source| DetectError::Combiner {
                path: combiner_path.to_path_buf(),
                source,
            })?;
        Ok(Self { forest, combiner })
    }

    pub fn forest(&self) -> &ForestModel {
        &self.forest
    }

    pub fn combiner(&self) -> &CombinerModel {
        &self.combiner
    }

    pub fn score(&self, frame: &TelemetryFrame) -> Detection {
        let proba = self.forest.predict_proba(frame.features.as_ref());
        let meta = meta_features(&proba, frame.guard_bits);
        Detection {
            ts: frame.ts,
            risk: self.combiner.score(&meta),
            class: strict_argmax(&proba),
            reason: frame.guard_bits.reason(),
            p_cyber: meta[0],
            novelty: meta[2] > 0.5,
        }
    }
}

/// Class whose probability beats both others; ties fall back to benign.
fn strict_argmax(p: &[f64; 3]) -> Label {
    if p[1] > p[0] && p[1] > p[2] {
        Label::Cyber
    } else if p[2] > p[0] && p[2] > p[1] {
        Label::Fault
    } else {
        Label::Benign
    }
}

fn read(path: &Path) -> Result<String, DetectError> {
    std::fs::read_to_string(path).map_err(|source| DetectError::Read {
        path: path.to_path_buf(),
        source,
    })
}
