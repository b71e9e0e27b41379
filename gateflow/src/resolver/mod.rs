//! Baseline resolution across prior runs.
//!
//! A [`ResolutionStrategy`] picks a model (and its blessing) from earlier
//! completed runs of the same pipeline. "Nothing found" is an ordinary
//! result: both outputs stay empty and the evaluator proceeds without a
//! baseline.

use crate::context::StageContext;
use crate::core::{Artifact, ArtifactType, RunId, StageOutput};
use crate::errors::GateflowError;
use crate::evaluator::{BLESSED_PROPERTY, MODEL_ID_PROPERTY};
use crate::metadata::{MetadataSnapshot, MetadataStore};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// What a strategy found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// The selected model.
    pub model: Option<Artifact>,
    /// The blessing attached to it, if any.
    pub model_blessing: Option<Artifact>,
}

impl Resolution {
    /// No baseline.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true when nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
    }
}

/// Selects a baseline from the metadata of prior runs.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync + Debug {
    /// Strategy name, recorded on resolver channels.
    fn name(&self) -> &str;

    /// Resolves against runs of `pipeline_name` older than `before`.
    ///
    /// Implementations must read one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the store cannot be read.
    async fn resolve(
        &self,
        store: &dyn MetadataStore,
        pipeline_name: &str,
        before: RunId,
    ) -> Result<Resolution, GateflowError>;
}

/// The newest blessing naming `model` that a completed run committed.
fn blessing_for<'a>(
    snapshot: &'a MetadataSnapshot,
    pipeline_name: &str,
    model: &Artifact,
    before: RunId,
) -> Option<&'a Artifact> {
    let model_id = model.id.to_string();
    snapshot
        .committed_artifacts(pipeline_name, ArtifactType::ModelBlessing, before)
        .into_iter()
        .filter(|(b, _)| b.str_property(MODEL_ID_PROPERTY) == Some(model_id.as_str()))
        .max_by_key(|(b, run)| (*run, b.created_at))
        .map(|(b, _)| b)
}

/// The most recent model carrying a true blessing.
///
/// Candidates are the outputs of completed runs, including artifacts those
/// runs reused from the cache. Ties on creation time are broken by the
/// latest run that committed the pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestBlessedModelStrategy;

impl LatestBlessedModelStrategy {
    /// Strategy name.
    pub const NAME: &'static str = "latest_blessed_model";
}

#[async_trait]
impl ResolutionStrategy for LatestBlessedModelStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn resolve(
        &self,
        store: &dyn MetadataStore,
        pipeline_name: &str,
        before: RunId,
    ) -> Result<Resolution, GateflowError> {
        let snapshot = store.snapshot().await?;

        let models = snapshot.committed_artifacts(pipeline_name, ArtifactType::Model, before);
        let best = snapshot
            .committed_artifacts(pipeline_name, ArtifactType::ModelBlessing, before)
            .into_iter()
            .filter(|(b, _)| b.bool_property(BLESSED_PROPERTY) == Some(true))
            .filter_map(|(blessing, blessing_run)| {
                let model_id: Uuid = blessing.str_property(MODEL_ID_PROPERTY)?.parse().ok()?;
                let &(model, model_run) = models.iter().find(|(m, _)| m.id == model_id)?;
                Some((model, blessing, blessing_run.max(model_run)))
            })
            .max_by(|(a, _, ra), (b, _, rb)| (a.created_at, ra).cmp(&(b.created_at, rb)))
            .map(|(model, blessing, _)| (model, blessing));

        Ok(best.map_or_else(Resolution::empty, |(model, blessing)| Resolution {
            model: Some(model.clone()),
            model_blessing: Some(blessing.clone()),
        }))
    }
}

/// The most recent model regardless of its verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestModelStrategy;

impl LatestModelStrategy {
    /// Strategy name.
    pub const NAME: &'static str = "latest_model";
}

#[async_trait]
impl ResolutionStrategy for LatestModelStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn resolve(
        &self,
        store: &dyn MetadataStore,
        pipeline_name: &str,
        before: RunId,
    ) -> Result<Resolution, GateflowError> {
        let snapshot = store.snapshot().await?;
        let model = snapshot
            .committed_artifacts(pipeline_name, ArtifactType::Model, before)
            .into_iter()
            .max_by(|(a, ra), (b, rb)| (a.created_at, ra).cmp(&(b.created_at, rb)))
            .map(|(model, _)| model);

        Ok(match model {
            Some(model) => Resolution {
                model_blessing: blessing_for(&snapshot, pipeline_name, model, before).cloned(),
                model: Some(model.clone()),
            },
            None => Resolution::empty(),
        })
    }
}

/// Exposes a strategy's result as the `model` and `model_blessing` outputs.
///
/// Never cached: its answer depends on runs outside its inputs.
#[derive(Debug, Clone)]
pub struct ResolverStage {
    strategy: Arc<dyn ResolutionStrategy>,
}

impl ResolverStage {
    /// The resolved model output.
    pub const MODEL: &'static str = "model";
    /// The resolved blessing output.
    pub const MODEL_BLESSING: &'static str = "model_blessing";

    /// Wraps a strategy.
    #[must_use]
    pub fn new(strategy: Arc<dyn ResolutionStrategy>) -> Self {
        Self { strategy }
    }

    /// A resolver using [`LatestBlessedModelStrategy`].
    #[must_use]
    pub fn latest_blessed() -> Self {
        Self::new(Arc::new(LatestBlessedModelStrategy))
    }

    /// The wrapped strategy's name.
    #[must_use]
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }
}

#[async_trait]
impl Stage for ResolverStage {
    fn kind(&self) -> &str {
        "Resolver"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::MODEL.to_string(), OutputSpec::optional(ArtifactType::Model));
        outputs.insert(
            Self::MODEL_BLESSING.to_string(),
            OutputSpec::optional(ArtifactType::ModelBlessing),
        );
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"strategy": self.strategy.name()})
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let resolution = self
            .strategy
            .resolve(ctx.store().as_ref(), ctx.pipeline_name(), ctx.run_id())
            .await?;

        info!(
            stage = %ctx.stage_id(),
            strategy = self.strategy.name(),
            model = ?resolution.model.as_ref().map(|m| m.id),
            "Resolved baseline"
        );
        ctx.emit(
            "resolver.resolved",
            json!({
                "strategy": self.strategy.name(),
                "model_id": resolution.model.as_ref().map(|m| m.id),
            }),
        );

        let mut output = StageOutput::empty();
        if let Some(model) = resolution.model {
            output = output.with_resolved(Self::MODEL, model);
        }
        if let Some(blessing) = resolution.model_blessing {
            output = output.with_resolved(Self::MODEL_BLESSING, blessing);
        }
        Ok(output)
    }
}
