//! Typed channels wiring stage outputs to stage inputs.
//!
//! A channel is an unresolved reference to "the artifact of type T that
//! stage S publishes under output O in this run". Channels are bound to
//! concrete artifacts only at execution time, once the producer committed.

use crate::core::{Artifact, ArtifactType, StageId};
use crate::errors::ChannelResolutionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Marks a channel as produced by a resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    /// Name of the strategy that fills the channel.
    pub strategy: String,
}

/// A typed reference to another stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    producer: StageId,
    output: String,
    artifact_type: ArtifactType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<Selector>,
}

impl Channel {
    /// Creates a channel to `producer.output`.
    #[must_use]
    pub fn new(producer: impl Into<StageId>, output: impl Into<String>, artifact_type: ArtifactType) -> Self {
        Self {
            producer: producer.into(),
            output: output.into(),
            artifact_type,
            selector: None,
        }
    }

    /// Creates a channel to a stage that will be registered later.
    ///
    /// Binding is checked at assembly, so the producer may appear anywhere
    /// in the stage list.
    #[must_use]
    pub fn forward(producer: impl Into<StageId>, output: impl Into<String>, artifact_type: ArtifactType) -> Self {
        Self::new(producer, output, artifact_type)
    }

    /// Marks the channel as filled by a resolution strategy.
    #[must_use]
    pub fn with_selector(mut self, strategy: impl Into<String>) -> Self {
        self.selector = Some(Selector {
            strategy: strategy.into(),
        });
        self
    }

    /// The producing stage.
    #[must_use]
    pub fn producer(&self) -> &StageId {
        &self.producer
    }

    /// The producer's output name.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// The artifact type carried.
    #[must_use]
    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    /// The resolver selector, if any.
    #[must_use]
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// Resolver channels may legitimately resolve to nothing.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.selector.is_some()
    }

    /// Binds the channel against the outputs committed so far in a run.
    ///
    /// # Errors
    ///
    /// Fails when a non-optional channel has no artifact, or when the
    /// committed artifact carries a different type.
    pub fn resolve<'a>(
        &self,
        consumer: &StageId,
        input: &str,
        committed: &'a CommittedOutputs,
    ) -> Result<Option<&'a Artifact>, ChannelResolutionError> {
        let error = |detail: String| ChannelResolutionError {
            stage: consumer.to_string(),
            input: input.to_string(),
            producer: self.producer.to_string(),
            output: self.output.clone(),
            detail,
        };

        match committed.get(&self.producer, &self.output) {
            Some(artifact) if artifact.artifact_type != self.artifact_type => Err(error(format!(
                "expected {}, found {}",
                self.artifact_type, artifact.artifact_type
            ))),
            Some(artifact) => Ok(Some(artifact)),
            None if self.is_optional() => Ok(None),
            None => Err(error("producer committed no artifact".to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}<{}>", self.producer, self.output, self.artifact_type)?;
        if let Some(selector) = &self.selector {
            write!(f, "[{}]", selector.strategy)?;
        }
        Ok(())
    }
}

/// Artifacts committed by the stages of one run, keyed by producer and output.
#[derive(Debug, Clone, Default)]
pub struct CommittedOutputs {
    outputs: BTreeMap<StageId, BTreeMap<String, Artifact>>,
}

impl CommittedOutputs {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records everything a stage committed.
    pub fn insert_stage(&mut self, stage: StageId, artifacts: BTreeMap<String, Artifact>) {
        self.outputs.insert(stage, artifacts);
    }

    /// Looks up one output.
    #[must_use]
    pub fn get(&self, stage: &StageId, output: &str) -> Option<&Artifact> {
        self.outputs.get(stage).and_then(|outs| outs.get(output))
    }

    /// Returns true if the stage has committed (possibly with no outputs).
    #[must_use]
    pub fn has_committed(&self, stage: &StageId) -> bool {
        self.outputs.contains_key(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunId;

    fn committed_with(stage: &str, output: &str, artifact: Artifact) -> CommittedOutputs {
        let mut committed = CommittedOutputs::new();
        let mut outs = BTreeMap::new();
        outs.insert(output.to_string(), artifact);
        committed.insert_stage(StageId::from(stage), outs);
        committed
    }

    #[test]
    fn test_resolve_committed_artifact() {
        let artifact = Artifact::new(ArtifactType::Examples, "/ex", "example_gen", RunId(1));
        let committed = committed_with("example_gen", "examples", artifact.clone());
        let channel = Channel::new("example_gen", "examples", ArtifactType::Examples);

        let resolved = channel
            .resolve(&StageId::from("statistics_gen"), "examples", &committed)
            .unwrap();
        assert_eq!(resolved, Some(&artifact));
    }

    #[test]
    fn test_ordinary_channel_with_no_artifact_is_an_error() {
        let committed = CommittedOutputs::new();
        let channel = Channel::new("trainer", "model", ArtifactType::Model);

        let err = channel
            .resolve(&StageId::from("evaluator"), "model", &committed)
            .unwrap_err();
        assert_eq!(err.producer, "trainer");
        assert_eq!(err.input, "model");
    }

    #[test]
    fn test_resolver_channel_may_be_empty() {
        let committed = CommittedOutputs::new();
        let channel = Channel::new("latest_blessed_model_resolver", "model", ArtifactType::Model)
            .with_selector("latest_blessed_model");

        assert!(channel.is_optional());
        let resolved = channel
            .resolve(&StageId::from("evaluator"), "baseline_model", &committed)
            .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let artifact = Artifact::new(ArtifactType::Schema, "/s", "schema_gen", RunId(1));
        let committed = committed_with("schema_gen", "schema", artifact);
        let channel = Channel::new("schema_gen", "schema", ArtifactType::Statistics);

        assert!(channel
            .resolve(&StageId::from("example_validator"), "statistics", &committed)
            .is_err());
    }

    #[test]
    fn test_channel_display() {
        let channel = Channel::new("trainer", "model", ArtifactType::Model);
        assert_eq!(channel.to_string(), "trainer.model<Model>");
    }
}
