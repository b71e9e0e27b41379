//! Feature engineering through a named [`TransformModule`](crate::engine::TransformModule).

use super::schema_gen::Schema;
use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{ExampleSplits, ModuleRegistry, TransformGraph};
use crate::errors::{EngineError, GateflowError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Fits the configured transform module on the train split and applies it
/// to both splits.
#[derive(Debug, Clone)]
pub struct Transform {
    module: String,
    label_key: String,
    registry: Arc<ModuleRegistry>,
}

impl Transform {
    /// The raw examples input.
    pub const EXAMPLES: &'static str = "examples";
    /// The schema input.
    pub const SCHEMA: &'static str = "schema";
    /// The transformed examples output.
    pub const TRANSFORMED_EXAMPLES: &'static str = "transformed_examples";
    /// The fitted graph output.
    pub const TRANSFORM_GRAPH: &'static str = "transform_graph";

    /// Creates a transform stage for a registered module.
    #[must_use]
    pub fn new(module: impl Into<String>, label_key: impl Into<String>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            module: module.into(),
            label_key: label_key.into(),
            registry,
        }
    }

    /// The module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }
}

#[async_trait]
impl Stage for Transform {
    fn kind(&self) -> &str {
        "Transform"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            Self::TRANSFORMED_EXAMPLES.to_string(),
            OutputSpec::new(ArtifactType::TransformedExamples),
        );
        outputs.insert(Self::TRANSFORM_GRAPH.to_string(), OutputSpec::new(ArtifactType::TransformGraph));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"module": self.module, "label_key": self.label_key})
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let module = self.registry.transform(&self.module)?;
        let examples = ExampleSplits::load(&ctx.input(Self::EXAMPLES)?.uri)?;
        let schema = Schema::load(&ctx.input(Self::SCHEMA)?.uri)?;
        if schema.feature(&self.label_key).is_none() {
            return Err(EngineError::Data(format!("label '{}' is not in the schema", self.label_key)).into());
        }

        let params = module.fit(&examples.train, &self.label_key)?;
        let transformed = ExampleSplits {
            train: module.apply(&params, &examples.train, &self.label_key)?,
            eval: module.apply(&params, &examples.eval, &self.label_key)?,
        };
        let graph = TransformGraph {
            module: self.module.clone(),
            label_key: self.label_key.clone(),
            params,
        };

        let examples_dir = ctx.create_output_dir(Self::TRANSFORMED_EXAMPLES)?;
        transformed.save(&examples_dir)?;
        let graph_dir = ctx.create_output_dir(Self::TRANSFORM_GRAPH)?;
        graph.save(&graph_dir)?;

        info!(
            stage = %ctx.stage_id(),
            run_id = %ctx.run_id(),
            module = %self.module,
            train = transformed.train.len(),
            "Transform fitted"
        );

        Ok(StageOutput::empty()
            .with_artifact(
                Self::TRANSFORMED_EXAMPLES,
                ArtifactDraft::new(examples_dir).with_property("split_names", json!(ExampleSplits::SPLITS)),
            )
            .with_artifact(
                Self::TRANSFORM_GRAPH,
                ArtifactDraft::new(graph_dir).with_property("module", json!(self.module)),
            ))
    }
}
