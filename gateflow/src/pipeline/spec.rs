//! Pipeline and stage specifications.

use crate::channel::Channel;
use crate::core::{ArtifactType, StageId};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::metadata::MetadataConnection;
use crate::stages::Stage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Declared type of one stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSpec {
    /// The artifact type produced.
    pub artifact_type: ArtifactType,
    /// Whether the stage may legitimately produce nothing.
    pub optional: bool,
}

impl OutputSpec {
    /// A required output.
    #[must_use]
    pub fn new(artifact_type: ArtifactType) -> Self {
        Self {
            artifact_type,
            optional: false,
        }
    }

    /// An output that may stay empty (resolver outputs).
    #[must_use]
    pub fn optional(artifact_type: ArtifactType) -> Self {
        Self {
            artifact_type,
            optional: true,
        }
    }
}

fn stage_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap_or_else(|_| unreachable!()))
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique id of the stage.
    pub id: StageId,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Named input channels.
    pub inputs: BTreeMap<String, Channel>,
    /// Declared outputs.
    pub outputs: BTreeMap<String, OutputSpec>,
    config: serde_json::Value,
    /// Stages whose halt stops this stage.
    pub guards: Vec<StageId>,
}

impl StageSpec {
    /// Creates a stage spec; outputs and config come from the runner.
    #[must_use]
    pub fn new(id: impl Into<StageId>, runner: Arc<dyn Stage>) -> Self {
        Self {
            id: id.into(),
            outputs: runner.outputs(),
            config: runner.config(),
            runner,
            inputs: BTreeMap::new(),
            guards: Vec::new(),
        }
    }

    /// Adds an input channel.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, channel: Channel) -> Self {
        self.inputs.insert(name.into(), channel);
        self
    }

    /// Adds several input channels.
    #[must_use]
    pub fn with_inputs<I, N>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = (N, Channel)>,
        N: Into<String>,
    {
        self.inputs
            .extend(inputs.into_iter().map(|(name, channel)| (name.into(), channel)));
        self
    }

    /// Makes a halt of `stage` block this stage.
    #[must_use]
    pub fn with_guard(mut self, stage: impl Into<StageId>) -> Self {
        let stage = stage.into();
        if !self.guards.contains(&stage) {
            self.guards.push(stage);
        }
        self
    }

    /// The runner's configuration, captured at registration; part of the
    /// cache key.
    #[must_use]
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Producers of inputs plus guards, possibly repeated.
    pub fn upstream(&self) -> impl Iterator<Item = &StageId> {
        self.inputs.values().map(Channel::producer).chain(self.guards.iter())
    }

    /// Validates the stage id.
    ///
    /// # Errors
    ///
    /// Returns an error unless the id matches `^[a-z][a-z0-9_]*$`.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if stage_id_pattern().is_match(self.id.as_str()) {
            return Ok(());
        }
        Err(PipelineValidationError::new(format!("Invalid stage id '{}'", self.id))
            .with_stages(vec![self.id.to_string()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-INVALID_ID",
                    format!("Stage id '{}' is not a lowercase identifier", self.id),
                )
                .with_fix_hint("Use lowercase letters, digits and underscores, starting with a letter."),
            ))
    }
}

fn default_enable_cache() -> bool {
    true
}

/// Global pipeline configuration fixed at assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    /// Pipeline name; runs and caching are scoped to it.
    pub name: String,
    /// Root directory for stage payloads.
    pub root: PathBuf,
    /// Metadata store connection.
    #[serde(default)]
    pub metadata: MetadataConnection,
    /// Whether stages may reuse earlier outputs.
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
}

impl PipelineSettings {
    /// Creates settings with an in-memory store and caching enabled.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            metadata: MetadataConnection::default(),
            enable_cache: true,
        }
    }

    /// Sets the metadata connection.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataConnection) -> Self {
        self.metadata = metadata;
        self
    }

    /// Enables or disables caching.
    #[must_use]
    pub fn with_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = enable_cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop() -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new().with_output("examples", ArtifactType::Examples))
    }

    #[test]
    fn test_stage_spec_takes_outputs_from_runner() {
        let spec = StageSpec::new("example_gen", noop());
        assert_eq!(
            spec.outputs.get("examples"),
            Some(&OutputSpec::new(ArtifactType::Examples))
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_upstream_lists_producers_and_guards() {
        let spec = StageSpec::new("trainer", noop())
            .with_input("examples", Channel::new("transform", "transformed_examples", ArtifactType::TransformedExamples))
            .with_guard("example_validator")
            .with_guard("example_validator");

        let upstream: Vec<&str> = spec.upstream().map(StageId::as_str).collect();
        assert_eq!(upstream, vec!["transform", "example_validator"]);
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        for id in ["Trainer", "1st", "with-dash", ""] {
            let err = StageSpec::new(id, noop()).validate().unwrap_err();
            assert_eq!(err.error_info.map(|i| i.code), Some("CONTRACT-004-INVALID_ID".to_string()));
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings: PipelineSettings = serde_json::from_str(r#"{"name": "fraud", "root": "/tmp/p"}"#).unwrap();
        assert_eq!(settings, PipelineSettings::new("fraud", "/tmp/p"));
        assert!(settings.enable_cache);
    }
}
