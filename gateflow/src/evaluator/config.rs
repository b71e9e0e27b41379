//! Typed evaluation configuration: metrics, slices and thresholds.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A metric the evaluator knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Fraction of rows whose thresholded prediction equals the label.
    BinaryAccuracy,
    /// True positives over predicted positives.
    Precision,
    /// True positives over actual positives.
    Recall,
    /// Area under the ROC curve.
    Auc,
    /// Number of rows in the slice.
    ExampleCount,
    /// Mean of the label.
    MeanLabel,
    /// Mean predicted probability.
    MeanPrediction,
}

impl MetricKind {
    /// Every metric, in canonical order.
    pub const ALL: [Self; 7] = [
        Self::BinaryAccuracy,
        Self::Precision,
        Self::Recall,
        Self::Auc,
        Self::ExampleCount,
        Self::MeanLabel,
        Self::MeanPrediction,
    ];

    /// The configuration name of the metric.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryAccuracy => "binary_accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::Auc => "auc",
            Self::ExampleCount => "example_count",
            Self::MeanLabel => "mean_label",
            Self::MeanPrediction => "mean_prediction",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subset of evaluation rows; an empty filter selects every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlicingSpec {
    /// Column name to required rendered value.
    #[serde(default)]
    pub feature_values: BTreeMap<String, String>,
}

impl SlicingSpec {
    /// The whole dataset.
    #[must_use]
    pub fn overall() -> Self {
        Self::default()
    }

    /// Adds a `column == value` filter.
    #[must_use]
    pub fn with_feature(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.feature_values.insert(column.into(), value.into());
        self
    }

    /// Returns true for the whole-dataset slice.
    #[must_use]
    pub fn is_overall(&self) -> bool {
        self.feature_values.is_empty()
    }
}

impl fmt::Display for SlicingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_overall() {
            return f.write_str("overall");
        }
        let parts: Vec<String> = self
            .feature_values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// How a metric value is judged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ThresholdPolicy {
    /// `lower_bound <= value <= upper_bound`; either bound may be absent.
    Absolute {
        /// Inclusive lower bound.
        #[serde(default)]
        lower_bound: Option<f64>,
        /// Inclusive upper bound.
        #[serde(default)]
        upper_bound: Option<f64>,
    },
    /// `min_delta <= value - baseline <= max_delta`; passes when there is no baseline.
    RelativeToBaseline {
        /// Inclusive minimum improvement.
        #[serde(default)]
        min_delta: Option<f64>,
        /// Inclusive maximum change.
        #[serde(default)]
        max_delta: Option<f64>,
    },
}

impl ThresholdPolicy {
    /// An absolute lower bound.
    #[must_use]
    pub fn at_least(lower_bound: f64) -> Self {
        Self::Absolute {
            lower_bound: Some(lower_bound),
            upper_bound: None,
        }
    }

    /// A relative lower bound on the change against the baseline.
    #[must_use]
    pub fn min_change(min_delta: f64) -> Self {
        Self::RelativeToBaseline {
            min_delta: Some(min_delta),
            max_delta: None,
        }
    }

    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match *self {
            Self::Absolute {
                lower_bound,
                upper_bound,
            } => (lower_bound, upper_bound),
            Self::RelativeToBaseline { min_delta, max_delta } => (min_delta, max_delta),
        }
    }
}

/// A threshold on one metric over some slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricThreshold {
    /// The metric checked.
    pub metric: MetricKind,
    /// Slices the threshold applies to; empty means every evaluated slice.
    #[serde(default)]
    pub slices: Vec<SlicingSpec>,
    /// The comparison.
    pub policy: ThresholdPolicy,
}

impl MetricThreshold {
    /// Creates a threshold applying to every evaluated slice.
    #[must_use]
    pub fn new(metric: MetricKind, policy: ThresholdPolicy) -> Self {
        Self {
            metric,
            slices: Vec::new(),
            policy,
        }
    }

    /// Restricts the threshold to one slice (may be repeated).
    #[must_use]
    pub fn on_slice(mut self, slice: SlicingSpec) -> Self {
        self.slices.push(slice);
        self
    }
}

fn default_label_key() -> String {
    "Class".to_string()
}

fn default_slicing_specs() -> Vec<SlicingSpec> {
    vec![SlicingSpec::overall()]
}

fn default_thresholds() -> Vec<MetricThreshold> {
    vec![MetricThreshold::new(
        MetricKind::BinaryAccuracy,
        ThresholdPolicy::at_least(0.6),
    )]
}

fn default_decision_threshold() -> f64 {
    0.5
}

/// Everything the evaluator needs to judge a candidate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    /// Label column name.
    #[serde(default = "default_label_key")]
    pub label_key: String,
    /// Slices to compute metrics on.
    #[serde(default = "default_slicing_specs")]
    pub slicing_specs: Vec<SlicingSpec>,
    /// Thresholds that must all pass for a blessing.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<MetricThreshold>,
    /// Probability at or above which a prediction counts as positive.
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            label_key: default_label_key(),
            slicing_specs: default_slicing_specs(),
            thresholds: default_thresholds(),
            decision_threshold: default_decision_threshold(),
        }
    }
}

impl EvalConfig {
    /// Replaces the thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<MetricThreshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Adds a slice.
    #[must_use]
    pub fn with_slice(mut self, slice: SlicingSpec) -> Self {
        self.slicing_specs.push(slice);
        self
    }

    /// Configured slices plus any slice named only by a threshold, deduplicated.
    ///
    /// Falls back to the overall slice when nothing is configured.
    #[must_use]
    pub fn evaluated_slices(&self) -> Vec<SlicingSpec> {
        let mut slices: Vec<SlicingSpec> = Vec::new();
        let named = self
            .slicing_specs
            .iter()
            .chain(self.thresholds.iter().flat_map(|t| t.slices.iter()));
        for slice in named {
            if !slices.contains(slice) {
                slices.push(slice.clone());
            }
        }
        if slices.is_empty() {
            slices.push(SlicingSpec::overall());
        }
        slices
    }

    /// Checks value domains serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label_key.trim().is_empty() {
            return Err(ConfigError::invalid("eval.label_key", "must not be empty"));
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return Err(ConfigError::invalid(
                "eval.decision_threshold",
                format!("{} is outside (0, 1)", self.decision_threshold),
            ));
        }
        for (i, threshold) in self.thresholds.iter().enumerate() {
            let field = format!("eval.thresholds[{i}]");
            let (low, high) = threshold.policy.bounds();
            if low.is_none() && high.is_none() {
                return Err(ConfigError::invalid(field, "no bound configured"));
            }
            if low.into_iter().chain(high).any(|b| !b.is_finite()) {
                return Err(ConfigError::invalid(field, "bounds must be finite"));
            }
            if let (Some(low), Some(high)) = (low, high) {
                if low > high {
                    return Err(ConfigError::invalid(field, format!("lower bound {low} exceeds upper bound {high}")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_mirror_fraud_pipeline() {
        let config: EvalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EvalConfig::default());
        assert_eq!(config.label_key, "Class");
        assert_eq!(
            config.thresholds,
            vec![MetricThreshold::new(MetricKind::BinaryAccuracy, ThresholdPolicy::at_least(0.6))]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_json_shape() {
        let json = r#"{
            "label_key": "Class",
            "slicing_specs": [{}, {"feature_values": {"Type": "online"}}],
            "thresholds": [
                {"metric": "binary_accuracy", "policy": {"kind": "absolute", "lower_bound": 0.6}},
                {"metric": "auc", "slices": [{}], "policy": {"kind": "relative_to_baseline", "min_delta": -0.01}}
            ]
        }"#;
        let config: EvalConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.slicing_specs[1], SlicingSpec::overall().with_feature("Type", "online"));
        assert_eq!(config.thresholds[1].policy, ThresholdPolicy::min_change(-0.01));
    }

    #[test]
    fn test_unknown_keys_and_metrics_are_rejected() {
        assert!(serde_json::from_str::<EvalConfig>(r#"{"labelKey": "Class"}"#).is_err());
        assert!(serde_json::from_str::<MetricThreshold>(
            r#"{"metric": "f1", "policy": {"kind": "absolute", "lower_bound": 0.5}}"#
        )
        .is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = EvalConfig::default().with_thresholds(vec![MetricThreshold::new(
            MetricKind::Auc,
            ThresholdPolicy::Absolute {
                lower_bound: Some(0.9),
                upper_bound: Some(0.1),
            },
        )]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_evaluated_slices_include_threshold_slices_once() {
        let online = SlicingSpec::overall().with_feature("Type", "online");
        let config = EvalConfig::default().with_thresholds(vec![
            MetricThreshold::new(MetricKind::Recall, ThresholdPolicy::at_least(0.1)).on_slice(online.clone()),
            MetricThreshold::new(MetricKind::Auc, ThresholdPolicy::at_least(0.5)).on_slice(online.clone()),
        ]);

        assert_eq!(config.evaluated_slices(), vec![SlicingSpec::overall(), online]);
        assert_eq!(SlicingSpec::overall().to_string(), "overall");
    }
}
