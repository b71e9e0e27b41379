//! Pipeline builder: registration in declaration order, validation deferred
//! to assembly.

use super::dag::{assemble, Pipeline};
use super::spec::{OutputSpec, PipelineSettings, StageSpec};
use crate::channel::Channel;
use crate::core::StageId;
use crate::errors::{AssemblyError, ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A registered stage, used to hand out typed channels to its outputs.
#[derive(Debug, Clone)]
pub struct StageHandle {
    id: StageId,
    outputs: BTreeMap<String, OutputSpec>,
}

impl StageHandle {
    /// The stage id.
    #[must_use]
    pub fn id(&self) -> &StageId {
        &self.id
    }

    /// Returns a channel to one of the stage's declared outputs.
    ///
    /// # Errors
    ///
    /// Fails if the stage declared no such output.
    pub fn output(&self, name: &str) -> Result<Channel, AssemblyError> {
        let spec = self.outputs.get(name).ok_or_else(|| {
            PipelineValidationError::new(format!("Stage '{}' declares no output '{name}'", self.id))
                .with_stages(vec![self.id.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "CONTRACT-004-UNDECLARED_OUTPUT",
                        format!("Output '{name}' is not declared by '{}'", self.id),
                    )
                    .with_fix_hint("Declare the output in the stage's outputs()."),
                )
        })?;
        Ok(Channel::new(self.id.clone(), name, spec.artifact_type))
    }
}

/// Collects stages in declaration order and assembles them.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    settings: PipelineSettings,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            stages: Vec::new(),
        }
    }

    /// Registers a stage with its input channels.
    ///
    /// Nothing is validated here; producers may be registered later.
    pub fn register<I, N>(&mut self, id: impl Into<StageId>, runner: Arc<dyn Stage>, inputs: I) -> StageHandle
    where
        I: IntoIterator<Item = (N, Channel)>,
        N: Into<String>,
    {
        self.add(StageSpec::new(id, runner).with_inputs(inputs))
    }

    /// Registers a fully built spec (guards, config override).
    pub fn add(&mut self, spec: StageSpec) -> StageHandle {
        let handle = StageHandle {
            id: spec.id.clone(),
            outputs: spec.outputs.clone(),
        };
        self.stages.push(spec);
        handle
    }

    /// The settings the pipeline will be assembled with.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the DAG and freezes it.
    ///
    /// # Errors
    ///
    /// See [`assemble`].
    pub fn assemble(self) -> Result<Pipeline, AssemblyError> {
        assemble(self.settings, self.stages)
    }
}
