//! Group-aware train/test splitting and fold planning.
//!
//! Every split works at group granularity: a traffic group is never divided between the two
//! sides of a split. Group order is decided by a keyed hash of the seed and the group id, so
//! assignments are reproducible and independent of row order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Fold planning settings.
///
/// Config keys (TOML): `test_fraction`, `folds`, `fallback_repeats`, `fallback_test_fraction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    /// Fraction of groups held out for testing.
    pub test_fraction: f64,
    /// Requested k for group k-fold (clamped to the number of training groups).
    pub folds: usize,
    /// Shuffle-split repeats used when k-fold is impossible.
    pub fallback_repeats: usize,
    /// Held-out group fraction per fallback repeat.
    pub fallback_test_fraction: f64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.25,
            folds: 5,
            fallback_repeats: 3,
            fallback_test_fraction: 0.25,
        }
    }
}

impl SplitOptions {
    pub fn validate(&self) -> Result<(), SplitError> {
        validate_fraction(self.test_fraction)?;
        validate_fraction(self.fallback_test_fraction)?;
        if self.folds < 2 {
            return Err(SplitError::InvalidFoldCount(self.folds));
        }
        if self.fallback_repeats == 0 {
            return Err(SplitError::InvalidRepeatCount);
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    #[error("need at least 2 distinct groups, found {found}")]
    TooFewGroups { found: usize },
    #[error("invalid split fraction {0} (expected 0 < fraction < 1)")]
    InvalidFraction(f64),
    #[error("invalid fold count {0} (expected >= 2)")]
    InvalidFoldCount(usize),
    #[error("invalid shuffle-split repeat count 0 (expected >= 1)")]
    InvalidRepeatCount,
}

/// Row indices of a train/test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// One fold: rows to fit on and rows to predict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FoldStrategy {
    GroupKFold { k: usize },
    ShuffleSplit { repeats: usize },
}

/// Folds over the training rows plus the strategy that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldPlan {
    pub strategy: FoldStrategy,
    pub folds: Vec<Fold>,
}

impl FoldPlan {
    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }
}

fn validate_fraction(fraction: f64) -> Result<(), SplitError> {
    if fraction.is_finite() && fraction > 0.0 && fraction < 1.0 {
        Ok(())
    } else {
        Err(SplitError::InvalidFraction(fraction))
    }
}

fn group_members(groups: &[u32]) -> BTreeMap<u32, Vec<usize>> {
    let mut members: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (row, &group) in groups.iter().enumerate() {
        members.entry(group).or_default().push(row);
    }
    members
}

fn group_key(seed: u64, repeat: Option<usize>, group: u32) -> u128 {
    let material = match repeat {
        Some(repeat) => format!("{seed}|{repeat}|{group}"),
        None => format!("{seed}|{group}"),
    };
    let hash = blake3::hash(material.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[0..16]);
    u128::from_le_bytes(bytes)
}

/// Groups in seeded pseudo-random order.
fn shuffled_groups<'a>(
    groups: impl Iterator<Item = &'a u32>,
    seed: u64,
    repeat: Option<usize>,
) -> Vec<u32> {
    let mut keyed: Vec<(u128, u32)> = groups
        .map(|&group| (group_key(seed, repeat, group), group))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, group)| group).collect()
}

fn partition_rows(groups: &[u32], held_out: &BTreeSet<u32>) -> (Vec<usize>, Vec<usize>) {
    let mut kept = Vec::new();
    let mut out = Vec::new();
    for (row, group) in groups.iter().enumerate() {
        if held_out.contains(group) {
            out.push(row);
        } else {
            kept.push(row);
        }
    }
    (kept, out)
}

/// Split rows into train/test so that no group appears on both sides.
///
/// The fraction is honored at group granularity: `ceil(test_fraction * n_groups)` groups
/// (at least one, leaving at least one for training) are held out.
pub fn train_test_split(
    groups: &[u32],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit, SplitError> {
    validate_fraction(test_fraction)?;
    let members = group_members(groups);
    let n_groups = members.len();
    if n_groups < 2 {
        return Err(SplitError::TooFewGroups { found: n_groups });
    }
    let n_test = ((n_groups as f64 * test_fraction).ceil() as usize).clamp(1, n_groups - 1);
    let held_out: BTreeSet<u32> = shuffled_groups(members.keys(), seed, None)
        .into_iter()
        .take(n_test)
        .collect();
    let (train, test) = partition_rows(groups, &held_out);
    Ok(TrainTestSplit { train, test })
}

/// Partition the groups into `k` buckets of roughly equal sample count.
///
/// `k` is clamped to the number of distinct groups. Groups are placed largest first into the
/// currently lightest bucket; fold `i` validates on bucket `i` and trains on the rest.
pub fn group_k_fold(groups: &[u32], k: usize) -> Result<Vec<Fold>, SplitError> {
    if k < 2 {
        return Err(SplitError::InvalidFoldCount(k));
    }
    let members = group_members(groups);
    let n_groups = members.len();
    if n_groups < 2 {
        return Err(SplitError::TooFewGroups { found: n_groups });
    }
    let k = k.min(n_groups);

    let mut by_size: Vec<(u32, usize)> = members
        .iter()
        .map(|(&group, rows)| (group, rows.len()))
        .collect();
    by_size.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut loads = vec![0usize; k];
    let mut bucket_of: BTreeMap<u32, usize> = BTreeMap::new();
    for (group, size) in by_size {
        let mut lightest = 0;
        for (bucket, &load) in loads.iter().enumerate() {
            if load < loads[lightest] {
                lightest = bucket;
            }
        }
        loads[lightest] += size;
        bucket_of.insert(group, lightest);
    }

    let mut folds: Vec<Fold> = (0..k)
        .map(|_| Fold {
            train: Vec::new(),
            validation: Vec::new(),
        })
        .collect();
    for (row, group) in groups.iter().enumerate() {
        let bucket = bucket_of[group];
        for (idx, fold) in folds.iter_mut().enumerate() {
            if idx == bucket {
                fold.validation.push(row);
            } else {
                fold.train.push(row);
            }
        }
    }
    Ok(folds)
}

/// Repeated randomized group hold-out splits.
///
/// Unlike [`group_k_fold`] a single group is accepted; its only fold then has an empty
/// training side rather than a leaking one.
pub fn group_shuffle_split(
    groups: &[u32],
    repeats: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<Fold>, SplitError> {
    validate_fraction(test_fraction)?;
    if repeats == 0 {
        return Err(SplitError::InvalidRepeatCount);
    }
    let members = group_members(groups);
    let n_groups = members.len();
    if n_groups == 0 {
        return Err(SplitError::TooFewGroups { found: 0 });
    }
    let n_test = ((n_groups as f64 * test_fraction).ceil() as usize).clamp(1, n_groups);
    let folds = (0..repeats)
        .map(|repeat| {
            let held_out: BTreeSet<u32> = shuffled_groups(members.keys(), seed, Some(repeat))
                .into_iter()
                .take(n_test)
                .collect();
            let (train, validation) = partition_rows(groups, &held_out);
            Fold { train, validation }
        })
        .collect();
    Ok(folds)
}

/// Build the fold plan for the training rows.
///
/// Group k-fold is used whenever at least two groups exist; otherwise the plan falls back
/// to repeated group shuffle splits.
pub fn plan_folds(
    groups: &[u32],
    options: &SplitOptions,
    seed: u64,
) -> Result<FoldPlan, SplitError> {
    match group_k_fold(groups, options.folds) {
        Ok(folds) => Ok(FoldPlan {
            strategy: FoldStrategy::GroupKFold { k: folds.len() },
            folds,
        }),
        Err(SplitError::TooFewGroups { found }) => {
            warn!(
                groups = found,
                repeats = options.fallback_repeats,
                "Too few groups for k-fold; using group shuffle splits"
            );
            let folds = group_shuffle_split(
                groups,
                options.fallback_repeats,
                options.fallback_test_fraction,
                seed,
            )?;
            Ok(FoldPlan {
                strategy: FoldStrategy::ShuffleSplit {
                    repeats: folds.len(),
                },
                folds,
            })
        }
        Err(err) => Err(err),
    }
}
