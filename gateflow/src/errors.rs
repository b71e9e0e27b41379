//! Error types for the gateflow framework.
//!
//! Assembly errors are fatal and surface before any stage runs. Metric
//! computation failures abort a run. Threshold rejection and an empty
//! resolver result are ordinary values and never appear here.

use crate::core::{ArtifactType, RunId};
use crate::evaluator::EvaluationState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for gateflow operations.
#[derive(Debug, Error)]
pub enum GateflowError {
    /// The pipeline DAG could not be assembled.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// The pipeline configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The metadata store rejected or failed an operation.
    #[error("{0}")]
    Metadata(#[from] MetadataError),

    /// A channel could not be bound to a committed artifact.
    #[error("{0}")]
    ChannelResolution(#[from] ChannelResolutionError),

    /// A configured metric could not be computed.
    #[error("{0}")]
    MetricComputation(#[from] MetricComputationError),

    /// The evaluation state machine was driven out of order.
    #[error("{0}")]
    Evaluation(#[from] EvaluationError),

    /// Publishing a model failed.
    #[error("{0}")]
    Publish(#[from] PublishError),

    /// An external engine (ingestion, transform, trainer) failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A stage failed during execution; the run was aborted.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The failing stage.
        stage: String,
        /// The underlying cause.
        #[source]
        source: Box<GateflowError>,
    },

    /// A stage asked for an input it never declared.
    #[error("Stage '{stage}' has no input named '{input}'")]
    MissingInput {
        /// The stage.
        stage: String,
        /// The requested input name.
        input: String,
    },

    /// A stage produced outputs that do not match its declaration.
    #[error("Stage '{stage}' violated its output contract for '{output}': {message}")]
    OutputContract {
        /// The stage.
        stage: String,
        /// The offending output name.
        output: String,
        /// What was wrong.
        message: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateflowError {
    /// Wraps an error as the failure of a named stage.
    #[must_use]
    pub fn stage_failed(stage: impl Into<String>, source: Self) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, unwrapping `StageFailed` layers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Everything that can make pipeline assembly fail.
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    /// A channel points at a producer or output that does not exist.
    #[error("{0}")]
    DanglingChannel(#[from] DanglingChannelError),

    /// The stage graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Two stages share an id.
    #[error("{0}")]
    DuplicateStage(#[from] DuplicateStageError),

    /// Any other structural problem.
    #[error("{0}")]
    Invalid(#[from] PipelineValidationError),
}

impl AssemblyError {
    /// Returns the contract diagnostics attached to the error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::DanglingChannel(err) => Some(&err.error_info),
            Self::CycleDetected(err) => Some(&err.error_info),
            Self::DuplicateStage(err) => Some(&err.error_info),
            Self::Invalid(err) => err.error_info.as_ref(),
        }
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when an input channel cannot be bound at assembly time.
#[derive(Debug, Clone, Error)]
#[error("Dangling channel: stage '{consumer}' input '{input}' references {producer}.{output}: {detail}")]
pub struct DanglingChannelError {
    /// The stage declaring the input.
    pub consumer: String,
    /// The input (or guard) name on the consumer.
    pub input: String,
    /// The referenced producer stage id.
    pub producer: String,
    /// The referenced output name.
    pub output: String,
    /// Why the reference does not bind.
    pub detail: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl DanglingChannelError {
    /// Creates a new dangling channel error.
    #[must_use]
    pub fn new(
        consumer: impl Into<String>,
        input: impl Into<String>,
        producer: impl Into<String>,
        output: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let consumer = consumer.into();
        let producer = producer.into();
        let info = ContractErrorInfo::new(
            "CONTRACT-004-DANGLING",
            format!("Stage '{consumer}' consumes from '{producer}', which does not bind"),
        )
        .with_fix_hint("Register the producer stage in the same pipeline and check the output name.")
        .with_context_entry("consumer", consumer.clone())
        .with_context_entry("producer", producer.clone());

        Self {
            consumer,
            input: input.into(),
            producer,
            output: output.into(),
            detail: detail.into(),
            error_info: info,
        }
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the channels in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when two stages are registered under one id.
#[derive(Debug, Clone, Error)]
#[error("Duplicate stage id '{stage}'")]
pub struct DuplicateStageError {
    /// The duplicated id.
    pub stage: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl DuplicateStageError {
    /// Creates a new duplicate stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        let info = ContractErrorInfo::new(
            "CONTRACT-004-DUPLICATE",
            format!("Stage id '{stage}' is registered more than once"),
        )
        .with_fix_hint("Give every stage a unique id.");
        Self {
            stage,
            error_info: info,
        }
    }
}

/// Error raised at run time when a required channel has no artifact.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' input '{input}' could not be resolved from {producer}.{output}: {detail}")]
pub struct ChannelResolutionError {
    /// The consuming stage.
    pub stage: String,
    /// The input name.
    pub input: String,
    /// The producer stage.
    pub producer: String,
    /// The producer output.
    pub output: String,
    /// What went wrong.
    pub detail: String,
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// The config path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config is not valid JSON or contains unknown keys.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value outside its domain.
    #[error("Invalid config field '{field}': {message}")]
    Invalid {
        /// The field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors from the metadata store.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The run id is unknown to the store.
    #[error("Unknown run {0}")]
    UnknownRun(RunId),

    /// The run is no longer accepting commits.
    #[error("Run {0} is not active")]
    RunNotActive(RunId),

    /// The stage already committed an execution in this run.
    #[error("Stage '{stage}' already committed in run {run_id}")]
    DuplicateExecution {
        /// The run.
        run_id: RunId,
        /// The stage.
        stage: String,
    },

    /// An execution references an artifact the store has never seen.
    #[error("Execution references unknown artifact {0}")]
    UnknownArtifact(uuid::Uuid),

    /// The backing file could not be read or written.
    #[error("Metadata IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is corrupt.
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal metric computation failures.
///
/// Distinct from a metric failing its threshold, which is a normal outcome.
#[derive(Debug, Clone, Error)]
pub enum MetricComputationError {
    /// The label column is absent from the evaluation data.
    #[error("Label column '{label_key}' is missing from evaluation examples")]
    MissingLabelColumn {
        /// The configured label key.
        label_key: String,
    },

    /// A label value is not 0 or 1.
    #[error("Label column '{label_key}' holds non-binary value '{value}' at row {row}")]
    NonBinaryLabel {
        /// The configured label key.
        label_key: String,
        /// The offending row.
        row: usize,
        /// The offending value.
        value: String,
    },

    /// A slicing spec refers to a column that does not exist.
    #[error("Slice column '{column}' is missing from evaluation examples")]
    MissingSliceColumn {
        /// The column name.
        column: String,
    },

    /// The model could not score the evaluation data.
    #[error("Model '{model}' could not score examples: {reason}")]
    Scoring {
        /// The model artifact id.
        model: String,
        /// The scorer's reason.
        reason: String,
    },
}

/// Errors raised by the evaluation state machine.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    /// A transition was attempted from the wrong state.
    #[error("Cannot {action} while evaluation is {state}")]
    InvalidTransition {
        /// The current state.
        state: EvaluationState,
        /// The attempted action.
        action: &'static str,
    },
}

/// Errors raised by the conditional publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// An artifact of the wrong type was passed in.
    #[error("Expected a {expected} artifact, got {actual}")]
    WrongArtifactType {
        /// Expected type.
        expected: ArtifactType,
        /// Actual type.
        actual: ArtifactType,
    },

    /// The blessing does not refer to the model being published.
    #[error("Blessing {blessing} refers to model {blessed_model}, not {model}")]
    ModelMismatch {
        /// The blessing artifact id.
        blessing: String,
        /// The model id recorded in the blessing.
        blessed_model: String,
        /// The model being published.
        model: String,
    },

    /// A required artifact property is missing.
    #[error("Artifact {artifact} is missing property '{property}'")]
    MissingProperty {
        /// The artifact id.
        artifact: String,
        /// The property name.
        property: String,
    },

    /// The copy or pointer write failed.
    #[error("Publish IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The deployment pointer could not be encoded or decoded.
    #[error("Publish serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the external engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A transform or trainer module name is not registered.
    #[error("Unknown {kind} module '{name}'")]
    UnknownModule {
        /// "transform" or "trainer".
        kind: &'static str,
        /// The requested name.
        name: String,
    },

    /// Input data is unusable.
    #[error("Data error: {0}")]
    Data(String),

    /// The source CSV could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Engine IO failed.
    #[error("Engine IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine payload could not be encoded or decoded.
    #[error("Engine serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");
    }

    #[test]
    fn test_dangling_channel_error_info() {
        let err: AssemblyError =
            DanglingChannelError::new("evaluator", "model", "trainer", "model", "producer not registered")
                .into();

        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CONTRACT-004-DANGLING"));
        assert!(err.to_string().contains("trainer.model"));
    }

    #[test]
    fn test_root_cause_unwraps_stage_failures() {
        let inner = GateflowError::from(MetricComputationError::MissingLabelColumn {
            label_key: "Class".to_string(),
        });
        let err = GateflowError::stage_failed("evaluator", inner);

        assert!(err.to_string().starts_with("Stage 'evaluator' failed"));
        assert!(matches!(
            err.root_cause(),
            GateflowError::MetricComputation(MetricComputationError::MissingLabelColumn { .. })
        ));
    }
}
