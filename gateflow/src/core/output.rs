//! Stage output type with factory methods.

use super::{Artifact, ArtifactDraft, StageStatus};
use std::collections::BTreeMap;

/// The output of a stage execution.
///
/// A stage either writes new payloads (`artifacts`, committed by the runner
/// as fresh artifacts) or hands back already-committed artifacts
/// (`resolved`, used by resolver stages). Outputs are keyed by the output
/// names the stage declared at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    /// `Completed` or `Halted`.
    pub status: StageStatus,
    /// New payloads to commit.
    pub artifacts: BTreeMap<String, ArtifactDraft>,
    /// Existing artifacts re-exposed under this stage's outputs.
    pub resolved: BTreeMap<String, Artifact>,
    /// Why the stage halted propagation.
    pub halt_reason: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::empty()
    }
}

impl StageOutput {
    /// Creates a completed output with no artifacts.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: StageStatus::Completed,
            artifacts: BTreeMap::new(),
            resolved: BTreeMap::new(),
            halt_reason: None,
        }
    }

    /// Creates a completed output with a single draft.
    #[must_use]
    pub fn single(name: impl Into<String>, draft: ArtifactDraft) -> Self {
        Self::empty().with_artifact(name, draft)
    }

    /// Adds a draft under `name`.
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>, draft: ArtifactDraft) -> Self {
        self.artifacts.insert(name.into(), draft);
        self
    }

    /// Re-exposes an existing artifact under `name`.
    #[must_use]
    pub fn with_resolved(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.resolved.insert(name.into(), artifact);
        self
    }

    /// Marks the output as halting guarded stages.
    #[must_use]
    pub fn halted(mut self, reason: impl Into<String>) -> Self {
        self.status = StageStatus::Halted;
        self.halt_reason = Some(reason.into());
        self
    }

    /// Returns true if the stage asked guarded stages not to proceed.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.status == StageStatus::Halted
    }

    /// Returns the names of every produced output.
    #[must_use]
    pub fn output_names(&self) -> Vec<&str> {
        self.artifacts
            .keys()
            .chain(self.resolved.keys())
            .map(String::as_str)
            .collect()
    }
}
