//! Evaluator and promotion gate.
//!
//! Metrics are computed per `(metric, slice)` for the candidate and, when a
//! baseline was resolved, for the baseline. Each configured threshold is
//! then judged and the candidate is blessed iff every check passed. A
//! rejection is a normal outcome; only failing to compute a metric is an
//! error.

mod config;
mod gate;
mod metrics;
mod stage;

pub use config::{EvalConfig, MetricKind, MetricThreshold, SlicingSpec, ThresholdPolicy};
pub use gate::{check_threshold, Evaluation, EvaluationRecord, EvaluationState, ThresholdCheck};
pub use metrics::{compute_metrics, lookup, SliceMetrics};
pub use stage::{read_evaluation, EvaluatorStage};

/// Blessing property: the boolean verdict.
pub const BLESSED_PROPERTY: &str = "blessed";
/// Blessing property: `"BLESSED"` or `"REJECTED"`.
pub const STATE_PROPERTY: &str = "state";
/// Blessing property: id of the model the verdict is about.
pub const MODEL_ID_PROPERTY: &str = "model_id";
/// Blessing property: id of the baseline model, or null.
pub const BASELINE_MODEL_ID_PROPERTY: &str = "baseline_model_id";
/// Blessing property: the full [`EvaluationRecord`].
pub const EVALUATION_PROPERTY: &str = "evaluation";
