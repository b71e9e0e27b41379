//! Model training through a named [`TrainerModule`](crate::engine::TrainerModule).

use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{ExampleSplits, ModelBundle, ModuleRegistry, TrainerConfig, TransformGraph};
use crate::errors::GateflowError;
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Trains a candidate model on transformed examples.
///
/// The emitted `model` bundles the transform graph so the evaluator and
/// serving can score raw examples.
#[derive(Debug, Clone)]
pub struct Trainer {
    module: String,
    label_key: String,
    config: TrainerConfig,
    registry: Arc<ModuleRegistry>,
}

impl Trainer {
    /// The transformed examples input.
    pub const EXAMPLES: &'static str = "examples";
    /// The fitted transform input.
    pub const TRANSFORM_GRAPH: &'static str = "transform_graph";
    /// The model output.
    pub const MODEL: &'static str = "model";

    /// Creates a trainer stage for a registered module.
    #[must_use]
    pub fn new(
        module: impl Into<String>,
        label_key: impl Into<String>,
        config: TrainerConfig,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        Self {
            module: module.into(),
            label_key: label_key.into(),
            config,
            registry,
        }
    }

    /// The training hyperparameters.
    #[must_use]
    pub fn trainer_config(&self) -> &TrainerConfig {
        &self.config
    }
}

#[async_trait]
impl Stage for Trainer {
    fn kind(&self) -> &str {
        "Trainer"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::MODEL.to_string(), OutputSpec::new(ArtifactType::Model));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"module": self.module, "label_key": self.label_key, "train_args": self.config})
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let module = self.registry.trainer(&self.module)?;
        let examples = ExampleSplits::load(&ctx.input(Self::EXAMPLES)?.uri)?;
        let transform = TransformGraph::load(&ctx.input(Self::TRANSFORM_GRAPH)?.uri)?;

        let params = module.train(&examples.train, &self.label_key, &self.config)?;
        let bundle = ModelBundle {
            trainer_module: self.module.clone(),
            transform,
            params,
        };

        let dir = ctx.create_output_dir(Self::MODEL)?;
        bundle.save(&dir)?;
        info!(
            stage = %ctx.stage_id(),
            run_id = %ctx.run_id(),
            module = %self.module,
            steps = self.config.steps(),
            "Model trained"
        );

        Ok(StageOutput::single(
            Self::MODEL,
            ArtifactDraft::new(dir)
                .with_property("trainer_module", json!(self.module))
                .with_property("train_steps", json!(self.config.steps())),
        ))
    }
}
