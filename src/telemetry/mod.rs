//! Telemetry feature schema and the synthetic sample generator.
//!
//! The schema is fixed: 16 telemetry fields, a reserved `rule_score` slot and the
//! `guard_violation_bits` bitmask, in the order published by [`FEATURE_NAMES`].

pub mod csv;
pub mod generator;

use serde::{Deserialize, Serialize};

pub use generator::{GeneratorConfig, GeneratorError, generate};

/// Number of values in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 18;

/// Number of classes in the label space.
pub const CLASS_COUNT: usize = 3;

/// Index of the reserved rule confidence slot.
pub const RULE_SCORE_INDEX: usize = 16;

/// Index of the guard violation bitmask.
pub const GUARD_BITS_INDEX: usize = 17;

/// Ordered feature names of the published schema.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "bytes_per_s",
    "pkts_per_s",
    "iat_p50_ms",
    "iat_p95_ms",
    "retrans_pct",
    "ttl_var",
    "win_var",
    "flow_delta",
    "fivetuple_changes",
    "opcode",
    "subsystem",
    "mode",
    "param_bucket",
    "seq_gap",
    "resp_delay_ms",
    "ack_flag_rate",
    "rule_score",
    "guard_violation_bits",
];

/// Indices holding integer-domain values.
pub const DISCRETE_INDICES: [usize; 6] = [8, 9, 10, 11, 12, 17];

/// Feature indices carried by the CSV stream (`rule_score` is recomputed by consumers).
pub const CSV_EXPORT_INDICES: [usize; 17] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, GUARD_BITS_INDEX,
];

/// Three-class ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Benign = 0,
    Cyber = 1,
    Fault = 2,
}

impl Label {
    /// All labels in class-index order.
    pub const ALL: [Label; CLASS_COUNT] = [Label::Benign, Label::Cyber, Label::Fault];

    /// Class index used by classifiers.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Benign => "benign",
            Label::Cyber => "cyber",
            Label::Fault => "fault",
        }
    }
}

/// Rule-engine hits encoded as a small bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardBits(pub u32);

impl GuardBits {
    pub const PARAM: u32 = 0b0001;
    pub const RATE: u32 = 0b0010;
    pub const REPLAY: u32 = 0b0100;
    pub const MODE: u32 = 0b1000;

    /// Recover the bitmask from the float slot of a feature vector.
    ///
    /// Negative or non-finite values map to an empty mask.
    pub fn from_feature(value: f64) -> Self {
        if value.is_finite() && value >= 0.0 {
            Self(value.round() as u32)
        } else {
            Self(0)
        }
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Bounded rule confidence: `min(1, popcount / 4)`.
    pub fn rule_score(self) -> f64 {
        (f64::from(self.count()) / 4.0).min(1.0)
    }

    /// Human-readable list of the guards that fired.
    pub fn reason(self) -> String {
        if self.0 == 0 {
            return "no-rule-hit".to_string();
        }
        let mut out = String::from("rules:");
        for (bit, name) in [
            (Self::PARAM, "param"),
            (Self::RATE, "rate"),
            (Self::REPLAY, "replay"),
            (Self::MODE, "mode"),
        ] {
            if self.0 & bit != 0 {
                out.push_str(name);
                out.push(' ');
            }
        }
        out
    }
}

/// Fixed-length telemetry feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn guard_bits(&self) -> GuardBits {
        GuardBits::from_feature(self.0[GUARD_BITS_INDEX])
    }

    /// Value stored in the reserved `rule_score` slot.
    pub fn stored_rule_score(&self) -> f64 {
        self.0[RULE_SCORE_INDEX]
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// One generated row: features, effective label and traffic group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: FeatureVector,
    pub label: Label,
    pub group: u32,
}

/// Group ids aligned with `samples`.
pub fn group_ids(samples: &[Sample]) -> Vec<u32> {
    samples.iter().map(|sample| sample.group).collect()
}

/// Class indices aligned with `samples`.
pub fn class_indices(samples: &[Sample]) -> Vec<usize> {
    samples.iter().map(|sample| sample.label.index()).collect()
}
