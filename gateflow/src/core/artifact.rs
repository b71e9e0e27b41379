//! Artifacts: immutable, versioned units of data produced by stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// The type tag of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactType {
    /// Split tabular examples.
    Examples,
    /// Per-split column statistics.
    Statistics,
    /// Feature schema.
    Schema,
    /// Validation anomalies.
    Anomalies,
    /// Fitted transform parameters.
    TransformGraph,
    /// Examples after the transform was applied.
    TransformedExamples,
    /// A trained model.
    Model,
    /// The evaluator's verdict on a model.
    ModelBlessing,
    /// The publisher's record of a push.
    PushedModel,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Examples => "Examples",
            Self::Statistics => "Statistics",
            Self::Schema => "Schema",
            Self::Anomalies => "Anomalies",
            Self::TransformGraph => "TransformGraph",
            Self::TransformedExamples => "TransformedExamples",
            Self::Model => "Model",
            Self::ModelBlessing => "ModelBlessing",
            Self::PushedModel => "PushedModel",
        };
        f.write_str(name)
    }
}

/// Identifier of a pipeline run, increasing per metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique id of a stage within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Creates a stage id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&StageId> for StageId {
    fn from(value: &StageId) -> Self {
        value.clone()
    }
}

/// An artifact committed to the metadata store.
///
/// Created exactly once, when the producing stage commits; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identity.
    pub id: Uuid,
    /// The type tag.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Where the payload lives.
    pub uri: PathBuf,
    /// The stage that produced it.
    pub producer: StageId,
    /// The run that produced it.
    pub run_id: RunId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Typed-by-convention properties (e.g. `blessed`, `model_id`).
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    /// Creates a new artifact stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        artifact_type: ArtifactType,
        uri: impl Into<PathBuf>,
        producer: impl Into<StageId>,
        run_id: RunId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_type,
            uri: uri.into(),
            producer: producer.into(),
            run_id,
            created_at: Utc::now(),
            properties: BTreeMap::new(),
        }
    }

    /// Stamps a stage's draft with identity and provenance.
    #[must_use]
    pub fn from_draft(
        draft: ArtifactDraft,
        artifact_type: ArtifactType,
        producer: &StageId,
        run_id: RunId,
    ) -> Self {
        Self {
            properties: draft.properties,
            ..Self::new(artifact_type, draft.uri, producer, run_id)
        }
    }

    /// Overrides the creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// Returns a boolean property.
    #[must_use]
    pub fn bool_property(&self, key: &str) -> Option<bool> {
        self.property(key).and_then(serde_json::Value::as_bool)
    }

    /// Returns a string property.
    #[must_use]
    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(serde_json::Value::as_str)
    }
}

/// What a stage hands back for one output before it is committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    /// Where the stage wrote the payload.
    pub uri: PathBuf,
    /// Properties to attach.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ArtifactDraft {
    /// Creates a draft pointing at `uri`.
    #[must_use]
    pub fn new(uri: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_from_draft() {
        let draft = ArtifactDraft::new("/tmp/model").with_property("blessed", serde_json::json!(true));
        let artifact = Artifact::from_draft(draft, ArtifactType::ModelBlessing, &StageId::from("evaluator"), RunId(3));

        assert_eq!(artifact.artifact_type, ArtifactType::ModelBlessing);
        assert_eq!(artifact.producer.as_str(), "evaluator");
        assert_eq!(artifact.run_id, RunId(3));
        assert_eq!(artifact.bool_property("blessed"), Some(true));
    }

    #[test]
    fn test_artifact_serialization_uses_type_tag() {
        let artifact = Artifact::new(ArtifactType::Model, "/tmp/m", "trainer", RunId(1));
        let json = serde_json::to_value(&artifact).unwrap();

        assert_eq!(json["type"], "Model");
        assert_eq!(json["run_id"], 1);

        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_distinct_artifacts_get_distinct_ids() {
        let a = Artifact::new(ArtifactType::Examples, "/a", "gen", RunId(1));
        let b = Artifact::new(ArtifactType::Examples, "/a", "gen", RunId(1));
        assert_ne!(a.id, b.id);
    }
}
