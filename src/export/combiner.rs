//! Risk combiner weights and their `key value` file format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::logreg::{LogisticModel, sigmoid};

/// Linear model over `(p_cyber, rule_score, novelty)` feeding a sigmoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinerModel {
    pub w_pcyber: f64,
    pub w_rule: f64,
    pub w_novelty: f64,
    pub bias: f64,
}

impl Default for CombinerModel {
    fn default() -> Self {
        Self {
            w_pcyber: 2.5,
            w_rule: 1.5,
            w_novelty: 1.0,
            bias: -1.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CombinerFormatError {
    #[error("line {line}: missing value for `{key}`")]
    MissingValue { line: usize, key: String },
    #[error("line {line}: invalid value `{value}` for `{key}`")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
    #[error("expected 3 combiner weights, found {0}")]
    WeightCount(usize),
}

impl CombinerModel {
    /// Take the weights of a logistic model fitted on the three meta-features.
    pub fn from_logistic(model: &LogisticModel) -> Result<Self, CombinerFormatError> {
        let [w_pcyber, w_rule, w_novelty] = model.weights[..] else {
            return Err(CombinerFormatError::WeightCount(model.weights.len()));
        };
        Ok(Self {
            w_pcyber,
            w_rule,
            w_novelty,
            bias: model.bias,
        })
    }

    /// Pre-sigmoid score.
    pub fn logit(&self, meta: &[f64; 3]) -> f64 {
        self.w_pcyber * meta[0] + self.w_rule * meta[1] + self.w_novelty * meta[2] + self.bias
    }

    /// Risk probability in `[0, 1]`.
    pub fn score(&self, meta: &[f64; 3]) -> f64 {
        sigmoid(self.logit(meta))
    }

    /// One `key value` line per parameter, floats in shortest round-trip form.
    pub fn to_config_string(&self) -> String {
        format!(
            "w_pcyber {}\nw_rule {}\nw_novelty {}\nbias {}\n",
            self.w_pcyber, self.w_rule, self.w_novelty, self.bias
        )
    }

    /// Parse the `key value` format. Unknown keys are ignored and missing keys keep their
    /// defaults; blank lines and `#` comments are skipped.
    pub fn parse(input: &str) -> Result<Self, CombinerFormatError> {
        let mut model = Self::default();
        for (idx, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let slot = match key {
                "w_pcyber" => &mut model.w_pcyber,
                "w_rule" => &mut model.w_rule,
                "w_novelty" => &mut model.w_novelty,
                "bias" => &mut model.bias,
                _ => continue,
            };
            let Some(value) = parts.next() else {
                return Err(CombinerFormatError::MissingValue {
                    line: idx + 1,
                    key: key.to_string(),
                });
            };
            *slot = value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CombinerFormatError::InvalidValue {
                    line: idx + 1,
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_weights_give_expected_risk() {
        let model = CombinerModel {
            w_pcyber: 2.0,
            w_rule: 1.0,
            w_novelty: 0.5,
            bias: -1.0,
        };
        let meta = [0.9, 1.0, 0.0];
        assert!((model.logit(&meta) - 1.8).abs() < 1e-12);
        assert!((model.score(&meta) - 0.858).abs() < 1e-3);
    }

    #[test]
    fn config_text_round_trips_exactly() {
        let model = CombinerModel {
            w_pcyber: 0.1 + 0.2,
            w_rule: -0.1,
            w_novelty: 1e-17,
            bias: -2.0000000000000004,
        };
        let text = model.to_config_string();
        assert!(text.starts_with("w_pcyber 0.30000000000000004\n"));
        assert_eq!(CombinerModel::parse(&text).unwrap(), model);
    }

    #[test]
    fn parse_keeps_defaults_and_ignores_unknown_keys() {
        let model = CombinerModel::parse("# weights\nw_rule 0.25\nextra 9\n\n").unwrap();
        assert_eq!(
            model,
            CombinerModel {
                w_rule: 0.25,
                ..CombinerModel::default()
            }
        );
    }

    #[test]
    fn parse_reports_bad_values() {
        assert_eq!(
            CombinerModel::parse("bias"),
            Err(CombinerFormatError::MissingValue {
                line: 1,
                key: "bias".into()
            })
        );
        assert!(matches!(
            CombinerModel::parse("w_pcyber 1\nw_rule nan"),
            Err(CombinerFormatError::InvalidValue { line: 2, .. })
        ));
    }

    #[test]
    fn logistic_weights_map_in_order() {
        let logistic = LogisticModel {
            weights: vec![1.0, 2.0, 3.0],
            bias: 4.0,
        };
        let model = CombinerModel::from_logistic(&logistic).unwrap();
        assert_eq!(
            (model.w_pcyber, model.w_rule, model.w_novelty, model.bias),
            (1.0, 2.0, 3.0, 4.0)
        );
        let short = LogisticModel {
            weights: vec![1.0],
            bias: 0.0,
        };
        assert_eq!(
            CombinerModel::from_logistic(&short),
            Err(CombinerFormatError::WeightCount(1))
        );
    }
}
