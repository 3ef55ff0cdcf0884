//! Deterministic synthetic telemetry generator.
//!
//! Samples are produced per traffic group: every group draws a base label, then each of its
//! samples draws the base telemetry fields, receives label-conditioned perturbations, an
//! optional label-noise override and guard bits derived from the effective label.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{CLASS_COUNT, FEATURE_COUNT, FeatureVector, GUARD_BITS_INDEX, GuardBits, Label};
use super::{RULE_SCORE_INDEX, Sample};

/// Generator settings.
///
/// Config keys (TOML): `group_count`, `samples_per_group`, `label_probabilities`,
/// `label_noise_probability`, `seed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of traffic groups to simulate.
    pub group_count: usize,
    /// Inclusive `(min, max)` sample count per group.
    pub samples_per_group: (usize, usize),
    /// Base label distribution over benign / cyber / fault.
    pub label_probabilities: [f64; CLASS_COUNT],
    /// Per-sample probability of replacing the label with a uniform draw.
    pub label_noise_probability: f64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            group_count: 240,
            samples_per_group: (8, 24),
            label_probabilities: [0.68, 0.22, 0.10],
            label_noise_probability: 0.05,
            seed: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid samples_per_group range ({min}, {max}); expected 1 <= min <= max")]
    InvalidSampleRange { min: usize, max: usize },
    #[error("label probabilities must be non-negative and sum to 1 (got {0:?})")]
    InvalidLabelProbabilities([f64; CLASS_COUNT]),
    #[error("invalid label noise probability {0} (expected 0..=1)")]
    InvalidLabelNoise(f64),
}

impl GeneratorConfig {
    /// Reject configurations that cannot produce a meaningful dataset.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        let (min, max) = self.samples_per_group;
        if min == 0 || min > max {
            return Err(GeneratorError::InvalidSampleRange { min, max });
        }
        let probs = self.label_probabilities;
        let sum: f64 = probs.iter().sum();
        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(GeneratorError::InvalidLabelProbabilities(probs));
        }
        let noise = self.label_noise_probability;
        if !(0.0..=1.0).contains(&noise) {
            return Err(GeneratorError::InvalidLabelNoise(noise));
        }
        Ok(())
    }
}

/// Gaussian draw parameters and hard clamp interval for one base field.
#[derive(Debug, Clone, Copy)]
struct FieldDraw {
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
}

const fn field(mean: f64, std: f64, min: f64, max: f64) -> FieldDraw {
    FieldDraw {
        mean,
        std,
        min,
        max,
    }
}

const INF: f64 = f64::INFINITY;

const BASE_FIELDS: [FieldDraw; 16] = [
    field(2.1e5, 5.8e4, 5e4, INF),
    field(155.0, 28.0, 5.0, INF),
    field(11.0, 3.0, 1.0, INF),
    field(21.0, 6.0, 3.0, INF),
    field(0.018, 0.012, 0.0, 0.6),
    field(1.1, 0.35, 0.05, INF),
    field(2.1, 0.6, 0.05, INF),
    field(0.0, 1.1, -INF, INF),
    field(0.2, 0.6, 0.0, 8.0),
    field(24.0, 10.0, 1.0, 60.0),
    field(3.0, 1.2, 1.0, 8.0),
    field(2.0, 0.6, 1.0, 5.0),
    field(3.0, 2.5, 0.0, 10.0),
    field(0.0, 1.3, -INF, INF),
    field(70.0, 35.0, 5.0, INF),
    field(0.45, 0.22, 0.0, 1.0),
];

/// Final integer domains for the snapped discrete fields.
const DISCRETE_RANGES: [(usize, f64, f64); 5] = [
    (8, 0.0, 12.0),
    (9, 1.0, 60.0),
    (10, 1.0, 12.0),
    (11, 1.0, 6.0),
    (12, 0.0, 15.0),
];

/// Inclusive interval every generated value falls in, per feature index.
pub const FEATURE_BOUNDS: [(f64, f64); FEATURE_COUNT] = [
    (2e4, 6e5),
    (0.0, 400.0),
    (1.0, INF),
    (3.0, INF),
    (0.0, 0.95),
    (0.05, INF),
    (0.02, 6.0),
    (-INF, INF),
    (0.0, 12.0),
    (1.0, 60.0),
    (1.0, 12.0),
    (1.0, 6.0),
    (0.0, 15.0),
    (-INF, INF),
    (5.0, INF),
    (0.0, 1.0),
    (0.0, 1.0),
    (0.0, 15.0),
];

/// Generate the full sample table for `config`.
///
/// Identical configs (seed included) always yield identical tables. Samples of a group are
/// contiguous and group ids follow generation order.
pub fn generate(config: &GeneratorConfig) -> Result<Vec<Sample>, GeneratorError> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let label_dist = WeightedIndex::new(config.label_probabilities)
        .map_err(|_| GeneratorError::InvalidLabelProbabilities(config.label_probabilities))?;

    let base_labels: Vec<Label> = (0..config.group_count)
        .map(|_| Label::ALL[label_dist.sample(&mut rng)])
        .collect();

    let (min, max) = config.samples_per_group;
    let mut samples = Vec::new();
    for (group_id, &base_label) in base_labels.iter().enumerate() {
        let count = rng.random_range(min..=max);
        for _ in 0..count {
            let (features, label) =
                draw_sample(base_label, config.label_noise_probability, &mut rng);
            samples.push(Sample {
                features,
                label,
                group: group_id as u32,
            });
        }
    }
    debug!(
        groups = config.group_count,
        samples = samples.len(),
        seed = config.seed,
        "generated telemetry samples"
    );
    Ok(samples)
}

fn draw_sample<R: Rng + ?Sized>(
    base_label: Label,
    label_noise: f64,
    rng: &mut R,
) -> (FeatureVector, Label) {
    let mut x = draw_base_features(rng);
    apply_label_perturbations(&mut x, base_label, rng);
    apply_shared_jitter(&mut x, rng);

    let mut label = base_label;
    if rng.random::<f64>() < label_noise {
        label = Label::ALL[rng.random_range(0..CLASS_COUNT)];
    }

    let bits = guard_bits_for(label, rng);
    x[GUARD_BITS_INDEX] = f64::from(bits.0);
    x[RULE_SCORE_INDEX] = bits.rule_score();

    for (idx, lo, hi) in DISCRETE_RANGES {
        x[idx] = x[idx].clamp(lo, hi).round_ties_even();
    }
    (FeatureVector(x), label)
}

fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    mean + std * z
}

fn draw_base_features<R: Rng + ?Sized>(rng: &mut R) -> [f64; FEATURE_COUNT] {
    let mut x = [0.0; FEATURE_COUNT];
    for (slot, draw) in x.iter_mut().zip(BASE_FIELDS.iter()) {
        *slot = gaussian(rng, draw.mean, draw.std).clamp(draw.min, draw.max);
    }
    x
}

fn perturb<R: Rng + ?Sized>(
    x: &mut [f64; FEATURE_COUNT],
    idx: usize,
    mean: f64,
    std: f64,
    (lo, hi): (f64, f64),
    rng: &mut R,
) {
    x[idx] = (x[idx] + gaussian(rng, mean, std)).clamp(lo, hi);
}

fn apply_label_perturbations<R: Rng + ?Sized>(
    x: &mut [f64; FEATURE_COUNT],
    label: Label,
    rng: &mut R,
) {
    match label {
        Label::Cyber => {
            perturb(x, 4, 0.055, 0.03, (0.0, 0.95), rng);
            perturb(x, 8, 1.4, 0.9, (0.0, 12.0), rng);
            perturb(x, 14, 40.0, 80.0, (10.0, 800.0), rng);
            perturb(x, 15, 0.18, 0.15, (0.0, 1.0), rng);
        }
        Label::Fault => {
            perturb(x, 2, 6.0, 3.0, (1.0, 40.0), rng);
            perturb(x, 3, 12.0, 5.0, (5.0, 90.0), rng);
            perturb(x, 13, 3.2, 1.8, (-INF, INF), rng);
            perturb(x, 14, 420.0, 240.0, (30.0, 1600.0), rng);
        }
        Label::Benign => {
            perturb(x, 7, 0.0, 0.6, (-INF, INF), rng);
            perturb(x, 14, -10.0, 50.0, (5.0, INF), rng);
        }
    }
}

/// Label-independent jitter on byte rate, packet rate and window variance.
fn apply_shared_jitter<R: Rng + ?Sized>(x: &mut [f64; FEATURE_COUNT], rng: &mut R) {
    perturb(x, 0, 0.0, 2.7e4, (2e4, 6e5), rng);
    perturb(x, 1, 0.0, 18.0, (0.0, 400.0), rng);
    perturb(x, 6, 0.0, 0.45, (0.02, 6.0), rng);
}

fn guard_bits_for<R: Rng + ?Sized>(label: Label, rng: &mut R) -> GuardBits {
    let mut hit = |p: f64| rng.random::<f64>() < p;
    let mut bits = 0u32;
    match label {
        Label::Cyber => {
            if hit(0.65) {
                bits |= GuardBits::RATE;
            }
            if hit(0.40) {
                bits |= GuardBits::PARAM;
            }
            if hit(0.18) {
                bits |= GuardBits::REPLAY;
            }
        }
        Label::Fault => {
            if hit(0.35) {
                bits |= GuardBits::PARAM;
            }
            if hit(0.20) {
                bits |= GuardBits::REPLAY;
            }
        }
        // Rare nuisance hits only.
        Label::Benign => {
            if hit(0.06) {
                bits |= GuardBits::PARAM;
            }
        }
    }
    GuardBits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::DISCRETE_INDICES;
    use std::collections::BTreeMap;

    fn small_config(seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            group_count: 40,
            samples_per_group: (3, 9),
            seed,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate(&small_config(7)).unwrap();
        let b = generate(&small_config(7)).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.group, y.group);
            for (u, v) in x.features.values().iter().zip(y.features.values()) {
                assert_eq!(u.to_bits(), v.to_bits());
            }
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let a = generate(&small_config(1)).unwrap();
        let b = generate(&small_config(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn four_benign_groups_of_two() {
        let config = GeneratorConfig {
            group_count: 4,
            samples_per_group: (2, 2),
            label_probabilities: [1.0, 0.0, 0.0],
            label_noise_probability: 0.0,
            seed: 1,
        };
        let samples = generate(&config).unwrap();
        assert_eq!(samples.len(), 8);
        assert!(samples.iter().all(|s| s.label == Label::Benign));
        let mut counts = BTreeMap::new();
        for sample in &samples {
            *counts.entry(sample.group).or_insert(0) += 1;
        }
        assert_eq!(counts, BTreeMap::from([(0, 2), (1, 2), (2, 2), (3, 2)]));
    }

    #[test]
    fn values_stay_within_documented_bounds() {
        let samples = generate(&GeneratorConfig::default()).unwrap();
        for sample in &samples {
            for (idx, value) in sample.features.values().iter().enumerate() {
                let (lo, hi) = FEATURE_BOUNDS[idx];
                assert!(
                    *value >= lo && *value <= hi,
                    "feature {idx} = {value} outside [{lo}, {hi}]"
                );
            }
            for idx in DISCRETE_INDICES {
                let value = sample.features.values()[idx];
                assert_eq!(value, value.trunc(), "feature {idx} not integral: {value}");
            }
        }
    }

    #[test]
    fn rule_score_matches_guard_bits() {
        let samples = generate(&GeneratorConfig::default()).unwrap();
        for sample in &samples {
            let bits = sample.features.guard_bits();
            let expected = (f64::from(bits.0.count_ones()) / 4.0).min(1.0);
            assert_eq!(sample.features.stored_rule_score(), expected);
        }
    }

    #[test]
    fn groups_are_contiguous_and_ordered() {
        let samples = generate(&small_config(3)).unwrap();
        for pair in samples.windows(2) {
            assert!(pair[1].group == pair[0].group || pair[1].group == pair[0].group + 1);
        }
        assert_eq!(samples.first().map(|s| s.group), Some(0));
    }

    #[test]
    fn noiseless_groups_share_their_label() {
        let config = GeneratorConfig {
            label_noise_probability: 0.0,
            ..small_config(11)
        };
        let samples = generate(&config).unwrap();
        let mut by_group: BTreeMap<u32, Label> = BTreeMap::new();
        for sample in &samples {
            let label = *by_group.entry(sample.group).or_insert(sample.label);
            assert_eq!(label, sample.label);
        }
    }

    #[test]
    fn benign_guard_hits_are_rare() {
        let config = GeneratorConfig {
            group_count: 200,
            samples_per_group: (10, 10),
            label_probabilities: [1.0, 0.0, 0.0],
            label_noise_probability: 0.0,
            seed: 5,
        };
        let samples = generate(&config).unwrap();
        let hits = samples
            .iter()
            .filter(|s| s.features.guard_bits().0 != 0)
            .count();
        let rate = hits as f64 / samples.len() as f64;
        assert!(rate < 0.09, "benign hit rate {rate}");
        assert!(samples.iter().all(|s| s.features.guard_bits().0 <= GuardBits::PARAM));
    }

    #[test]
    fn cyber_samples_hit_more_guards_than_benign() {
        let config = GeneratorConfig {
            label_noise_probability: 0.0,
            ..GeneratorConfig::default()
        };
        let samples = generate(&config).unwrap();
        let mean_hits = |label: Label| {
            let rows: Vec<_> = samples.iter().filter(|s| s.label == label).collect();
            rows.iter()
                .map(|s| f64::from(s.features.guard_bits().count()))
                .sum::<f64>()
                / rows.len().max(1) as f64
        };
        assert!(mean_hits(Label::Cyber) > mean_hits(Label::Benign) * 5.0);
    }

    #[test]
    fn rejects_invalid_configs() {
        let empty_range = GeneratorConfig {
            samples_per_group: (5, 2),
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            generate(&empty_range),
            Err(GeneratorError::InvalidSampleRange { min: 5, max: 2 })
        ));

        let bad_probs = GeneratorConfig {
            label_probabilities: [0.5, 0.2, 0.2],
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            generate(&bad_probs),
            Err(GeneratorError::InvalidLabelProbabilities(_))
        ));

        let bad_noise = GeneratorConfig {
            label_noise_probability: 1.5,
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            generate(&bad_noise),
            Err(GeneratorError::InvalidLabelNoise(_))
        ));
    }

    #[test]
    fn zero_groups_yield_empty_table() {
        let config = GeneratorConfig {
            group_count: 0,
            ..GeneratorConfig::default()
        };
        assert!(generate(&config).unwrap().is_empty());
    }

    #[test]
    fn extreme_sample_range_does_not_overflow() {
        let config = GeneratorConfig {
            group_count: 0,
            samples_per_group: (usize::MAX, usize::MAX),
            ..GeneratorConfig::default()
        };
        assert!(generate(&config).unwrap().is_empty());
    }
}
