//! The evaluator stage: scores candidate and baseline, emits the blessing.

use super::config::EvalConfig;
use super::gate::{Evaluation, EvaluationRecord};
use super::metrics::{compute_metrics, SliceMetrics};
use super::{BASELINE_MODEL_ID_PROPERTY, BLESSED_PROPERTY, EVALUATION_PROPERTY, MODEL_ID_PROPERTY, STATE_PROPERTY};
use crate::context::StageContext;
use crate::core::{Artifact, ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{write_json, Dataset, ExampleSplits, ModelBundle, ModuleRegistry};
use crate::errors::{GateflowError, MetricComputationError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Computes metrics for the candidate (and baseline, when resolved) and
/// decides whether the candidate is blessed.
///
/// Inputs: `examples` (Examples), `model` (Model), optional
/// `baseline_model` (Model). Output: `blessing` (ModelBlessing), emitted for
/// both verdicts.
#[derive(Debug, Clone)]
pub struct EvaluatorStage {
    config: EvalConfig,
    registry: Arc<ModuleRegistry>,
}

impl EvaluatorStage {
    /// Input carrying the evaluation examples.
    pub const EXAMPLES: &'static str = "examples";
    /// Input carrying the candidate model.
    pub const MODEL: &'static str = "model";
    /// Optional input carrying the resolved baseline model.
    pub const BASELINE_MODEL: &'static str = "baseline_model";
    /// The blessing output.
    pub const BLESSING: &'static str = "blessing";
    /// File holding the evaluation record inside the blessing artifact.
    pub const RECORD_FILE: &'static str = "evaluation.json";

    /// Creates an evaluator.
    #[must_use]
    pub fn new(config: EvalConfig, registry: Arc<ModuleRegistry>) -> Self {
        Self { config, registry }
    }

    /// The evaluation config.
    #[must_use]
    pub fn eval_config(&self) -> &EvalConfig {
        &self.config
    }

    fn score(&self, model: &Artifact, eval: &Dataset) -> Result<Vec<SliceMetrics>, GateflowError> {
        let scoring = |reason: String| MetricComputationError::Scoring {
            model: model.id.to_string(),
            reason,
        };
        let bundle = ModelBundle::load(&model.uri).map_err(|e| scoring(e.to_string()))?;
        let scorer = self.registry.scorer(&bundle).map_err(|e| scoring(e.to_string()))?;
        let predictions = scorer.predict(eval).map_err(|e| scoring(e.to_string()))?;
        if predictions.len() != eval.len() {
            return Err(scoring(format!("{} predictions for {} examples", predictions.len(), eval.len())).into());
        }
        Ok(compute_metrics(eval, &predictions, &self.config)?)
    }
}

/// Reads the evaluation record carried by a blessing artifact.
#[must_use]
pub fn read_evaluation(blessing: &Artifact) -> Option<EvaluationRecord> {
    blessing
        .property(EVALUATION_PROPERTY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[async_trait]
impl Stage for EvaluatorStage {
    fn kind(&self) -> &str {
        "Evaluator"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::BLESSING.to_string(), OutputSpec::new(ArtifactType::ModelBlessing));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let examples = ExampleSplits::load(&ctx.input(Self::EXAMPLES)?.uri)?;
        let eval = &examples.eval;
        if eval.column_index(&self.config.label_key).is_none() {
            return Err(MetricComputationError::MissingLabelColumn {
                label_key: self.config.label_key.clone(),
            }
            .into());
        }

        let model = ctx.input(Self::MODEL)?;
        let baseline_model = ctx.optional_input(Self::BASELINE_MODEL);

        let candidate = self.score(model, eval)?;
        let baseline = baseline_model.map(|m| self.score(m, eval)).transpose()?;

        let mut evaluation = Evaluation::new(model.id, baseline_model.map(|m| m.id));
        evaluation.record_metrics(candidate, baseline)?;
        let state = evaluation.decide(&self.config.thresholds, &self.config.evaluated_slices())?;
        let record = evaluation.into_record()?;
        let blessed = record.is_blessed();

        info!(
            stage = %ctx.stage_id(),
            run_id = %ctx.run_id(),
            model = %model.id,
            baseline = ?baseline_model.map(|m| m.id),
            state = %state,
            failed_checks = record.failures().count(),
            "Evaluation decided"
        );
        ctx.emit(
            "evaluator.decided",
            json!({"state": state.as_str(), "model_id": model.id, "blessed": blessed}),
        );

        let dir = ctx.create_output_dir(Self::BLESSING)?;
        write_json(&dir.join(Self::RECORD_FILE), &record)?;
        std::fs::write(dir.join(if blessed { "BLESSED" } else { "NOT_BLESSED" }), b"")?;

        let draft = ArtifactDraft::new(dir)
            .with_property(BLESSED_PROPERTY, json!(blessed))
            .with_property(STATE_PROPERTY, json!(state.as_str()))
            .with_property(MODEL_ID_PROPERTY, json!(model.id))
            .with_property(BASELINE_MODEL_ID_PROPERTY, json!(record.baseline_model_id))
            .with_property(EVALUATION_PROPERTY, serde_json::to_value(&record)?);
        Ok(StageOutput::single(Self::BLESSING, draft))
    }
}
