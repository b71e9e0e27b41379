//! # Gateflow
//!
//! Typed ML pipeline orchestration with blessing-gated model promotion.
//!
//! Gateflow provides:
//!
//! - **Typed artifact channels**: stage inputs are bound to declared outputs
//!   of other stages and checked before anything runs
//! - **DAG assembly**: duplicate, dangling and cyclic wiring is rejected with
//!   contract diagnostics; execution order is stable
//! - **Baseline resolution**: the latest blessed model of earlier runs
//! - **Evaluation gate**: metrics against thresholds decide a blessing
//! - **Conditional publishing**: only blessed models reach serving
//! - **Caching**: stages with identical inputs and config reuse outputs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gateflow::prelude::*;
//!
//! let config = PipelineConfig::load(Path::new("pipeline.json"))?;
//! let pipeline = create_pipeline(&config, &ModuleRegistry::new())?;
//! let report = LocalDagRunner::new().run_with_configured_store(&pipeline).await?;
//! println!("{}", report.status);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod channel;
pub mod components;
pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod events;
pub mod fraud_detection;
pub mod metadata;
pub mod pipeline;
pub mod publisher;
pub mod resolver;
pub mod stages;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::Channel;
    pub use crate::components::{HaltPolicy, Severity};
    pub use crate::config::PipelineConfig;
    pub use crate::context::{StageContext, StageInputs};
    pub use crate::core::{Artifact, ArtifactDraft, ArtifactType, RunId, RunStatus, StageId, StageOutput, StageStatus};
    pub use crate::engine::ModuleRegistry;
    pub use crate::errors::{
        AssemblyError, ContractErrorInfo, CycleDetectedError, DanglingChannelError, GateflowError,
        PipelineValidationError,
    };
    pub use crate::evaluator::{EvalConfig, EvaluationState, MetricKind, MetricThreshold, SlicingSpec, ThresholdPolicy};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fraud_detection::{create_pipeline, run_pipeline};
    pub use crate::metadata::{MetadataConnection, MetadataStore};
    pub use crate::pipeline::{LocalDagRunner, Pipeline, PipelineBuilder, PipelineSettings, RunReport, StageSpec};
    pub use crate::resolver::{LatestBlessedModelStrategy, ResolutionStrategy};
    pub use crate::stages::Stage;
}
