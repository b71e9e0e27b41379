//! The blessing state machine and the audit record it produces.

use super::config::{MetricKind, MetricThreshold, SlicingSpec, ThresholdPolicy};
use super::metrics::{lookup, SliceMetrics};
use crate::errors::EvaluationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where an evaluation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationState {
    /// Nothing computed yet.
    Pending,
    /// Metrics are known; no verdict yet.
    MetricsComputed,
    /// Every threshold passed.
    Blessed,
    /// At least one threshold failed.
    Rejected,
}

impl EvaluationState {
    /// Returns true for `Blessed` and `Rejected`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blessed | Self::Rejected)
    }

    /// The persisted name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::MetricsComputed => "METRICS_COMPUTED",
            Self::Blessed => "BLESSED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one threshold on one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    /// The metric checked.
    pub metric: MetricKind,
    /// The slice it was checked on.
    pub slice: SlicingSpec,
    /// The candidate's value; `None` if undefined.
    pub value: Option<f64>,
    /// The value compared against for relative policies.
    pub baseline_value: Option<f64>,
    /// The policy applied.
    pub policy: ThresholdPolicy,
    /// Whether the bound held.
    pub passed: bool,
}

/// Judges a value against a policy.
///
/// `baseline` is `None` when no baseline model exists; relative policies
/// then pass without comparison. An undefined value never satisfies a
/// bound that is actually checked.
#[must_use]
pub fn check_threshold(policy: &ThresholdPolicy, value: Option<f64>, baseline: Option<Option<f64>>) -> bool {
    let within = |x: Option<f64>, low: Option<f64>, high: Option<f64>| {
        let low_ok = low.map_or(true, |b| x.is_some_and(|v| v >= b));
        let high_ok = high.map_or(true, |b| x.is_some_and(|v| v <= b));
        low_ok && high_ok
    };

    match (*policy, baseline) {
        (
            ThresholdPolicy::Absolute {
                lower_bound,
                upper_bound,
            },
            _,
        ) => within(value, lower_bound, upper_bound),
        (ThresholdPolicy::RelativeToBaseline { .. }, None) => true,
        (ThresholdPolicy::RelativeToBaseline { min_delta, max_delta }, Some(base)) => {
            let delta = value.zip(base).map(|(v, b)| v - b);
            within(delta, min_delta, max_delta)
        }
    }
}

/// The full audit record of an evaluation, persisted with the blessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Terminal state.
    pub state: EvaluationState,
    /// The candidate model artifact.
    pub model_id: Uuid,
    /// The baseline model artifact, if one was resolved.
    pub baseline_model_id: Option<Uuid>,
    /// Candidate metrics per slice.
    pub candidate: Vec<SliceMetrics>,
    /// Baseline metrics per slice.
    pub baseline: Option<Vec<SliceMetrics>>,
    /// Every threshold outcome.
    pub checks: Vec<ThresholdCheck>,
}

impl EvaluationRecord {
    /// Returns true if the model was blessed.
    #[must_use]
    pub fn is_blessed(&self) -> bool {
        self.state == EvaluationState::Blessed
    }

    /// The checks that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Drives one candidate through `PENDING -> METRICS_COMPUTED -> BLESSED | REJECTED`.
#[derive(Debug, Clone)]
pub struct Evaluation {
    state: EvaluationState,
    model_id: Uuid,
    baseline_model_id: Option<Uuid>,
    candidate: Vec<SliceMetrics>,
    baseline: Option<Vec<SliceMetrics>>,
    checks: Vec<ThresholdCheck>,
}

impl Evaluation {
    /// Starts a pending evaluation.
    #[must_use]
    pub fn new(model_id: Uuid, baseline_model_id: Option<Uuid>) -> Self {
        Self {
            state: EvaluationState::Pending,
            model_id,
            baseline_model_id,
            candidate: Vec::new(),
            baseline: None,
            checks: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EvaluationState {
        self.state
    }

    /// Records computed metrics. `PENDING -> METRICS_COMPUTED`.
    ///
    /// # Errors
    ///
    /// Fails unless the evaluation is pending.
    pub fn record_metrics(
        &mut self,
        candidate: Vec<SliceMetrics>,
        baseline: Option<Vec<SliceMetrics>>,
    ) -> Result<(), EvaluationError> {
        self.expect_state(EvaluationState::Pending, "record metrics")?;
        self.candidate = candidate;
        self.baseline = baseline;
        self.state = EvaluationState::MetricsComputed;
        Ok(())
    }

    /// Applies every threshold to every slice it covers and reaches a verdict.
    ///
    /// A threshold with no explicit slices covers `slices`. With no
    /// thresholds at all the candidate is blessed.
    ///
    /// # Errors
    ///
    /// Fails unless metrics have been recorded.
    pub fn decide(
        &mut self,
        thresholds: &[MetricThreshold],
        slices: &[SlicingSpec],
    ) -> Result<EvaluationState, EvaluationError> {
        self.expect_state(EvaluationState::MetricsComputed, "decide")?;

        let mut checks = Vec::new();
        for threshold in thresholds {
            let covered = if threshold.slices.is_empty() {
                slices
            } else {
                threshold.slices.as_slice()
            };
            for slice in covered {
                let value = lookup(&self.candidate, slice, threshold.metric);
                let baseline = self
                    .baseline
                    .as_ref()
                    .map(|b| lookup(b, slice, threshold.metric));
                let passed = check_threshold(&threshold.policy, value, baseline);
                checks.push(ThresholdCheck {
                    metric: threshold.metric,
                    slice: slice.clone(),
                    value,
                    baseline_value: baseline.unwrap_or(value),
                    policy: threshold.policy,
                    passed,
                });
            }
        }

        self.state = if checks.iter().all(|c| c.passed) {
            EvaluationState::Blessed
        } else {
            EvaluationState::Rejected
        };
        self.checks = checks;
        Ok(self.state)
    }

    /// Finalizes into the audit record.
    ///
    /// # Errors
    ///
    /// Fails unless a verdict has been reached.
    pub fn into_record(self) -> Result<EvaluationRecord, EvaluationError> {
        if !self.state.is_terminal() {
            return Err(EvaluationError::InvalidTransition {
                state: self.state,
                action: "finalize",
            });
        }
        Ok(EvaluationRecord {
            state: self.state,
            model_id: self.model_id,
            baseline_model_id: self.baseline_model_id,
            candidate: self.candidate,
            baseline: self.baseline,
            checks: self.checks,
        })
    }

    fn expect_state(&self, expected: EvaluationState, action: &'static str) -> Result<(), EvaluationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EvaluationError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}
