//! Core domain model types for gateflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Artifacts, their type tags and provenance
//! - Stage and run status enums
//! - The stage output type returned by every stage

mod artifact;
mod output;
mod status;

pub use artifact::{Artifact, ArtifactDraft, ArtifactType, RunId, StageId};
pub use output::StageOutput;
pub use status::{RunStatus, StageStatus};
