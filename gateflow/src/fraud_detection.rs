//! The fraud-detection training pipeline.
//!
//! Nine stages: ingestion, statistics, schema, validation, transform,
//! training, baseline resolution, evaluation and push. Transform and
//! evaluation are guarded by the validator so a blocking anomaly stops
//! training and promotion while still recording the anomalies.

use crate::channel::Channel;
use crate::components::{CsvExampleGen, ExampleValidator, SchemaGen, StatisticsGen, Trainer, Transform};
use crate::config::PipelineConfig;
use crate::core::ArtifactType;
use crate::engine::{ModuleRegistry, TrainerConfig};
use crate::errors::{AssemblyError, ContractErrorInfo, EngineError, GateflowError, PipelineValidationError};
use crate::evaluator::EvaluatorStage;
use crate::pipeline::{LocalDagRunner, Pipeline, PipelineBuilder, RunReport, StageSpec};
use crate::publisher::PusherStage;
use crate::resolver::{LatestBlessedModelStrategy, ResolverStage};
use std::sync::Arc;
use tracing::info;

/// Stage ids of the pipeline.
pub mod stage_ids {
    /// CSV ingestion.
    pub const EXAMPLE_GEN: &str = "example_gen";
    /// Descriptive statistics.
    pub const STATISTICS_GEN: &str = "statistics_gen";
    /// Schema inference or import.
    pub const SCHEMA_GEN: &str = "schema_gen";
    /// Anomaly detection.
    pub const EXAMPLE_VALIDATOR: &str = "example_validator";
    /// Feature engineering.
    pub const TRANSFORM: &str = "transform";
    /// Model training.
    pub const TRAINER: &str = "trainer";
    /// Deployment.
    pub const PUSHER: &str = "pusher";
    /// Baseline lookup.
    pub const RESOLVER: &str = "latest_blessed_model_resolver";
    /// Evaluation and gating.
    pub const EVALUATOR: &str = "evaluator";
}

use stage_ids::{
    EVALUATOR, EXAMPLE_GEN, EXAMPLE_VALIDATOR, PUSHER, RESOLVER, SCHEMA_GEN, STATISTICS_GEN, TRAINER, TRANSFORM,
};

fn unknown_module(stage: &str, err: &EngineError) -> AssemblyError {
    PipelineValidationError::new(format!("Stage '{stage}' references an unknown module: {err}"))
        .with_stages(vec![stage.to_string()])
        .with_error_info(
            ContractErrorInfo::new("CONTRACT-004-UNKNOWN_MODULE", err.to_string())
                .with_fix_hint("Register the module in the ModuleRegistry or fix the name in the config.")
                .with_context_entry("stage", stage),
        )
        .into()
}

/// Wires the fraud-detection pipeline from a config.
///
/// # Errors
///
/// Fails if the config is invalid, names an unregistered module, or the
/// wiring does not assemble.
pub fn create_pipeline(config: &PipelineConfig, registry: &ModuleRegistry) -> Result<Pipeline, GateflowError> {
    config.validate()?;
    registry
        .transform(&config.transform_module)
        .map_err(|e| unknown_module(TRANSFORM, &e))?;
    registry
        .trainer(&config.trainer_module)
        .map_err(|e| unknown_module(TRAINER, &e))?;

    let registry = Arc::new(registry.clone());
    let label_key = config.eval.label_key.clone();
    let mut builder = PipelineBuilder::new(config.settings());

    let example_gen = builder.register(
        EXAMPLE_GEN,
        Arc::new(CsvExampleGen::new(config.data_location.clone())),
        Vec::<(String, Channel)>::new(),
    );
    let examples = example_gen.output(CsvExampleGen::EXAMPLES)?;

    let statistics_gen = builder.register(
        STATISTICS_GEN,
        Arc::new(StatisticsGen),
        [(StatisticsGen::EXAMPLES, examples.clone())],
    );
    let statistics = statistics_gen.output(StatisticsGen::STATISTICS)?;

    let schema_gen = match &config.schema_path {
        Some(path) => builder.register(
            SCHEMA_GEN,
            Arc::new(SchemaGen::import(path.clone())),
            Vec::<(String, Channel)>::new(),
        ),
        None => builder.register(
            SCHEMA_GEN,
            Arc::new(SchemaGen::infer()),
            [(SchemaGen::STATISTICS, statistics.clone())],
        ),
    };
    let schema = schema_gen.output(SchemaGen::SCHEMA)?;

    builder.register(
        EXAMPLE_VALIDATOR,
        Arc::new(ExampleValidator::new(config.halt_policy.clone())),
        [
            (ExampleValidator::STATISTICS, statistics),
            (ExampleValidator::SCHEMA, schema.clone()),
        ],
    );

    let transform = builder.add(
        StageSpec::new(
            TRANSFORM,
            Arc::new(Transform::new(
                config.transform_module.clone(),
                label_key.clone(),
                Arc::clone(&registry),
            )),
        )
        .with_input(Transform::EXAMPLES, examples.clone())
        .with_input(Transform::SCHEMA, schema)
        .with_guard(EXAMPLE_VALIDATOR),
    );

    let trainer = builder.register(
        TRAINER,
        Arc::new(Trainer::new(
            config.trainer_module.clone(),
            label_key,
            TrainerConfig::new(config.batch_size, config.dataset_size),
            Arc::clone(&registry),
        )),
        [
            (Trainer::EXAMPLES, transform.output(Transform::TRANSFORMED_EXAMPLES)?),
            (Trainer::TRANSFORM_GRAPH, transform.output(Transform::TRANSFORM_GRAPH)?),
        ],
    );
    let model = trainer.output(Trainer::MODEL)?;

    builder.register(
        PUSHER,
        Arc::new(PusherStage::new(config.serving_model_dir.clone())),
        [
            (PusherStage::MODEL, model.clone()),
            (
                PusherStage::MODEL_BLESSING,
                Channel::forward(EVALUATOR, EvaluatorStage::BLESSING, ArtifactType::ModelBlessing),
            ),
        ],
    );

    let resolver = builder.register(
        RESOLVER,
        Arc::new(ResolverStage::latest_blessed()),
        Vec::<(String, Channel)>::new(),
    );

    builder.add(
        StageSpec::new(EVALUATOR, Arc::new(EvaluatorStage::new(config.eval.clone(), registry)))
            .with_input(EvaluatorStage::EXAMPLES, examples)
            .with_input(EvaluatorStage::MODEL, model)
            .with_input(
                EvaluatorStage::BASELINE_MODEL,
                resolver
                    .output(ResolverStage::MODEL)?
                    .with_selector(LatestBlessedModelStrategy::NAME),
            )
            .with_guard(EXAMPLE_VALIDATOR),
    );

    let pipeline = builder.assemble()?;
    info!(
        pipeline = %pipeline.name(),
        stages = pipeline.len(),
        transform = %config.transform_module,
        trainer = %config.trainer_module,
        "Fraud detection pipeline assembled"
    );
    Ok(pipeline)
}

/// Assembles the pipeline and runs it once against the configured store.
///
/// # Errors
///
/// Fails on assembly errors or a fatal stage error.
pub async fn run_pipeline(config: &PipelineConfig, registry: &ModuleRegistry) -> Result<RunReport, GateflowError> {
    let pipeline = create_pipeline(config, registry)?;
    LocalDagRunner::new().run_with_configured_store(&pipeline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use pretty_assertions::assert_eq;

    fn config() -> PipelineConfig {
        PipelineConfig::new("fraud_detection", "/tmp/gateflow/root", "/tmp/gateflow/data", "/tmp/gateflow/serving", 100)
    }

    #[test]
    fn test_declared_and_execution_order() {
        let pipeline = create_pipeline(&config(), &ModuleRegistry::new()).unwrap();

        let declared: Vec<&str> = pipeline.stages().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            declared,
            vec![
                EXAMPLE_GEN,
                STATISTICS_GEN,
                SCHEMA_GEN,
                EXAMPLE_VALIDATOR,
                TRANSFORM,
                TRAINER,
                PUSHER,
                RESOLVER,
                EVALUATOR
            ]
        );

        let order: Vec<&str> = pipeline.execution_ids().into_iter().map(StageId::as_str).collect();
        assert_eq!(
            order,
            vec![
                EXAMPLE_GEN,
                STATISTICS_GEN,
                SCHEMA_GEN,
                EXAMPLE_VALIDATOR,
                TRANSFORM,
                TRAINER,
                RESOLVER,
                EVALUATOR,
                PUSHER
            ]
        );
    }

    #[test]
    fn test_guards_and_baseline_channel() {
        let pipeline = create_pipeline(&config(), &ModuleRegistry::new()).unwrap();

        let transform = pipeline.stage(&StageId::new(TRANSFORM)).unwrap();
        assert_eq!(transform.guards, vec![StageId::new(EXAMPLE_VALIDATOR)]);

        let evaluator = pipeline.stage(&StageId::new(EVALUATOR)).unwrap();
        assert_eq!(evaluator.guards, vec![StageId::new(EXAMPLE_VALIDATOR)]);
        let baseline = &evaluator.inputs[EvaluatorStage::BASELINE_MODEL];
        assert_eq!(baseline.producer().as_str(), RESOLVER);
        assert!(baseline.is_optional());

        let pusher = pipeline.stage(&StageId::new(PUSHER)).unwrap();
        assert_eq!(pusher.inputs[PusherStage::MODEL_BLESSING].producer().as_str(), EVALUATOR);
    }

    #[test]
    fn test_imported_schema_has_no_statistics_input() {
        let mut config = config();
        config.schema_path = Some("/tmp/gateflow/schema.json".into());
        let pipeline = create_pipeline(&config, &ModuleRegistry::new()).unwrap();

        let schema_gen = pipeline.stage(&StageId::new(SCHEMA_GEN)).unwrap();
        assert!(schema_gen.inputs.is_empty());
        assert_eq!(schema_gen.runner.kind(), "ImportSchemaGen");
    }

    #[test]
    fn test_unknown_module_fails_assembly() {
        let mut config = config();
        config.trainer_module = "xgboost".into();

        let err = create_pipeline(&config, &ModuleRegistry::new()).unwrap_err();
        let GateflowError::Assembly(assembly) = err else {
            panic!("expected an assembly error");
        };
        let info = assembly.error_info().unwrap();
        assert_eq!(info.code, "CONTRACT-004-UNKNOWN_MODULE");
    }

    #[test]
    fn test_invalid_config_is_rejected_before_wiring() {
        let mut config = config();
        config.batch_size = 0;
        assert!(matches!(
            create_pipeline(&config, &ModuleRegistry::new()),
            Err(GateflowError::Config(_))
        ));
    }
}
