//! Execution context passed to every stage.

mod inputs;

pub use inputs::StageInputs;

use crate::core::{Artifact, RunId, StageId};
use crate::errors::GateflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::metadata::MetadataStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a stage may read while executing.
///
/// Contexts are built by the runner; stages never mutate pipeline state
/// through them, they only return a [`crate::core::StageOutput`].
#[derive(Debug, Clone)]
pub struct StageContext {
    stage_id: StageId,
    run_id: RunId,
    pipeline_name: String,
    pipeline_root: PathBuf,
    inputs: StageInputs,
    store: Arc<dyn MetadataStore>,
    event_sink: Arc<dyn EventSink>,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        stage_id: StageId,
        run_id: RunId,
        pipeline_name: impl Into<String>,
        pipeline_root: impl Into<PathBuf>,
        inputs: StageInputs,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            stage_id,
            run_id,
            pipeline_name: pipeline_name.into(),
            pipeline_root: pipeline_root.into(),
            inputs,
            store,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The executing stage.
    #[must_use]
    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    /// The current run.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// The pipeline root directory.
    #[must_use]
    pub fn pipeline_root(&self) -> &Path {
        &self.pipeline_root
    }

    /// All bound inputs.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Returns a required input.
    ///
    /// # Errors
    ///
    /// Returns [`GateflowError::MissingInput`] if the input is undeclared
    /// or resolved to nothing.
    pub fn input(&self, name: &str) -> Result<&Artifact, GateflowError> {
        self.inputs.get(name).ok_or_else(|| GateflowError::MissingInput {
            stage: self.stage_id.to_string(),
            input: name.to_string(),
        })
    }

    /// Returns an optional input; `None` when it resolved to nothing.
    #[must_use]
    pub fn optional_input(&self, name: &str) -> Option<&Artifact> {
        self.inputs.get(name)
    }

    /// The metadata store of the run.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// The event sink of the run.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Emits an event tagged with the stage and run.
    pub fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert("stage".to_string(), self.stage_id.as_str().into());
            obj.insert("run_id".to_string(), self.run_id.0.into());
        }
        self.event_sink.try_emit(event_type, Some(data));
    }

    /// Where this execution writes the payload of `output`.
    ///
    /// Laid out as `<root>/<stage>/<output>/<run id>`.
    #[must_use]
    pub fn output_dir(&self, output: &str) -> PathBuf {
        self.pipeline_root
            .join(self.stage_id.as_str())
            .join(output)
            .join(self.run_id.to_string())
    }

    /// Creates and returns [`Self::output_dir`].
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn create_output_dir(&self, output: &str) -> Result<PathBuf, GateflowError> {
        let dir = self.output_dir(output);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
