//! Stage trait and implementations.
//!
//! Stages are the fundamental units of work in a gateflow pipeline. A stage
//! declares its outputs up front so that downstream channels can be bound
//! before anything executes.

use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::errors::GateflowError;
use crate::pipeline::OutputSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the component kind (e.g. `"Trainer"`).
    fn kind(&self) -> &str;

    /// Declares every output this stage can produce.
    fn outputs(&self) -> BTreeMap<String, OutputSpec>;

    /// The configuration payload that participates in the cache key.
    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Whether outputs of an identical earlier execution may be reused.
    fn cacheable(&self) -> bool {
        true
    }

    /// Content hash of inputs that live outside the metadata store.
    ///
    /// # Errors
    ///
    /// Fails if the external inputs cannot be read.
    fn fingerprint(&self) -> Result<Option<String>, GateflowError> {
        Ok(None)
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The produced drafts, or a fatal error that aborts the run.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, GateflowError> + Send + Sync,
{
    kind: String,
    outputs: BTreeMap<String, OutputSpec>,
    config: serde_json::Value,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, GateflowError> + Send + Sync,
{
    /// Creates a new function-based stage with no outputs.
    pub fn new(kind: impl Into<String>, func: F) -> Self {
        Self {
            kind: kind.into(),
            outputs: BTreeMap::new(),
            config: serde_json::Value::Null,
            func,
        }
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, spec: OutputSpec) -> Self {
        self.outputs.insert(name.into(), spec);
        self
    }

    /// Sets the configuration payload.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, GateflowError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("kind", &self.kind)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, GateflowError> + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        self.outputs.clone()
    }

    fn config(&self) -> serde_json::Value {
        self.config.clone()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        (self.func)(ctx)
    }
}

/// A stage that writes nothing but an empty directory per declared output.
///
/// Used to exercise wiring, ordering and caching without real payloads.
#[derive(Debug, Clone, Default)]
pub struct NoOpStage {
    outputs: BTreeMap<String, ArtifactType>,
}

impl NoOpStage {
    /// Creates a no-op stage with no outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, artifact_type: ArtifactType) -> Self {
        self.outputs.insert(name.into(), artifact_type);
        self
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn kind(&self) -> &str {
        "NoOp"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        self.outputs
            .iter()
            .map(|(name, ty)| (name.clone(), OutputSpec::new(*ty)))
            .collect()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let mut output = StageOutput::empty();
        for name in self.outputs.keys() {
            output = output.with_artifact(name, ArtifactDraft::new(ctx.output_dir(name)));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageInputs;
    use crate::core::{RunId, StageId};
    use crate::metadata::InMemoryMetadataStore;
    use std::sync::Arc;

    fn test_stage_context() -> StageContext {
        StageContext::new(
            StageId::from("test"),
            RunId(1),
            "pipeline",
            "/root",
            StageInputs::new(),
            Arc::new(InMemoryMetadataStore::new()),
        )
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("Custom", |ctx| {
            Ok(StageOutput::single("out", ArtifactDraft::new(ctx.output_dir("out"))))
        })
        .with_output("out", OutputSpec::new(ArtifactType::Examples))
        .with_config(serde_json::json!({"k": 1}));

        assert_eq!(stage.kind(), "Custom");
        assert_eq!(stage.config(), serde_json::json!({"k": 1}));

        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output.output_names(), vec!["out"]);
    }

    #[tokio::test]
    async fn test_noop_stage_drafts_every_output() {
        let stage = NoOpStage::new()
            .with_output("schema", ArtifactType::Schema)
            .with_output("statistics", ArtifactType::Statistics);

        assert!(stage.cacheable());
        assert_eq!(stage.outputs().len(), 2);

        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output.output_names(), vec!["schema", "statistics"]);
    }
}
