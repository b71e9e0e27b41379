//! Conditional, idempotent model publishing.
//!
//! A blessed model is copied to `<destination>/<version>` where the version
//! is a content hash of the model files, and `<destination>/DEPLOYED.json`
//! is pointed at it. Both writes go through a temporary sibling and a
//! rename. An unblessed model touches nothing.

use crate::context::StageContext;
use crate::core::{Artifact, ArtifactDraft, ArtifactType, StageOutput};
use crate::errors::{GateflowError, PublishError};
use crate::evaluator::{BLESSED_PROPERTY, MODEL_ID_PROPERTY};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the deployment pointer inside the destination.
pub const DEPLOYED_FILE: &str = "DEPLOYED.json";

/// What `publish` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The model was copied and the pointer updated.
    Pushed {
        /// Content version.
        version: String,
        /// Directory the model was copied to.
        path: PathBuf,
    },
    /// The pointer already named this content; nothing was written.
    AlreadyDeployed {
        /// Content version.
        version: String,
        /// Directory holding the deployed model.
        path: PathBuf,
    },
    /// The blessing was negative; nothing was written.
    NotBlessed,
}

impl PushOutcome {
    /// Returns true if the model is live at the destination.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        !matches!(self, Self::NotBlessed)
    }

    /// The deployed version, if any.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Pushed { version, .. } | Self::AlreadyDeployed { version, .. } => Some(version),
            Self::NotBlessed => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pushed { .. } => "pushed",
            Self::AlreadyDeployed { .. } => "already_deployed",
            Self::NotBlessed => "not_blessed",
        }
    }
}

/// The deployment pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPointer {
    /// Content version of the live model.
    pub version: String,
    /// Artifact id of the model that was pushed.
    pub model_id: Uuid,
    /// When it was pushed.
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentPointer {
    /// Reads the pointer in `destination`, if present.
    ///
    /// # Errors
    ///
    /// Fails if the pointer exists but is unreadable.
    pub fn read(destination: &Path) -> Result<Option<Self>, PublishError> {
        let path = destination.join(DEPLOYED_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }
    Ok(())
}

fn model_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

/// Content version of a model directory: the first 16 hex digits of the
/// SHA-256 over every relative path and file body, in path order.
///
/// # Errors
///
/// Fails if the directory cannot be read.
pub fn model_fingerprint(dir: &Path) -> Result<String, PublishError> {
    let mut hasher = Sha256::new();
    for rel in model_files(dir)? {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(dir.join(&rel))?);
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..16].to_string())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for rel in model_files(from)? {
        let target = to.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from.join(&rel), target)?;
    }
    Ok(())
}

fn check_type(artifact: &Artifact, expected: ArtifactType) -> Result<(), PublishError> {
    if artifact.artifact_type == expected {
        Ok(())
    } else {
        Err(PublishError::WrongArtifactType {
            expected,
            actual: artifact.artifact_type,
        })
    }
}

/// Publishes `model` to `destination` iff `blessing` is positive.
///
/// Republishing identical content is a no-op.
///
/// # Errors
///
/// Fails on mismatched artifacts or filesystem errors; an unblessed model
/// is not an error.
pub fn publish(model: &Artifact, blessing: &Artifact, destination: &Path) -> Result<PushOutcome, PublishError> {
    check_type(model, ArtifactType::Model)?;
    check_type(blessing, ArtifactType::ModelBlessing)?;

    let missing = |property: &str| PublishError::MissingProperty {
        artifact: blessing.id.to_string(),
        property: property.to_string(),
    };
    let blessed_model = blessing
        .str_property(MODEL_ID_PROPERTY)
        .ok_or_else(|| missing(MODEL_ID_PROPERTY))?;
    if blessed_model != model.id.to_string() {
        return Err(PublishError::ModelMismatch {
            blessing: blessing.id.to_string(),
            blessed_model: blessed_model.to_string(),
            model: model.id.to_string(),
        });
    }
    let blessed = blessing
        .bool_property(BLESSED_PROPERTY)
        .ok_or_else(|| missing(BLESSED_PROPERTY))?;
    if !blessed {
        debug!(model = %model.id, "Model not blessed; skipping publish");
        return Ok(PushOutcome::NotBlessed);
    }

    let version = model_fingerprint(&model.uri)?;
    let target = destination.join(&version);
    if let Some(pointer) = DeploymentPointer::read(destination)? {
        if pointer.version == version && target.is_dir() {
            debug!(version = %version, "Model already deployed");
            return Ok(PushOutcome::AlreadyDeployed { version, path: target });
        }
    }

    fs::create_dir_all(destination)?;
    if !target.is_dir() {
        let staging = destination.join(format!(".{version}.tmp"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_tree(&model.uri, &staging)?;
        fs::rename(&staging, &target)?;
    }

    let pointer = DeploymentPointer {
        version: version.clone(),
        model_id: model.id,
        deployed_at: Utc::now(),
    };
    let tmp = destination.join(format!(".{DEPLOYED_FILE}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(&pointer)?)?;
    fs::rename(&tmp, destination.join(DEPLOYED_FILE))?;

    info!(model = %model.id, version = %version, destination = %destination.display(), "Pushed model");
    Ok(PushOutcome::Pushed { version, path: target })
}

/// Pushes the candidate to the serving directory when blessed.
///
/// Inputs: `model` (Model), `model_blessing` (ModelBlessing). Output:
/// `pushed_model` (PushedModel), recording the outcome either way.
#[derive(Debug, Clone)]
pub struct PusherStage {
    destination: PathBuf,
}

impl PusherStage {
    /// The candidate model input.
    pub const MODEL: &'static str = "model";
    /// The blessing input.
    pub const MODEL_BLESSING: &'static str = "model_blessing";
    /// The push record output.
    pub const PUSHED_MODEL: &'static str = "pushed_model";

    /// Creates a pusher targeting a filesystem directory.
    #[must_use]
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// The serving directory.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl Stage for PusherStage {
    fn kind(&self) -> &str {
        "Pusher"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::PUSHED_MODEL.to_string(), OutputSpec::new(ArtifactType::PushedModel));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"push_destination": {"filesystem": {"base_directory": self.destination}}})
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let model = ctx.input(Self::MODEL)?;
        let blessing = ctx.input(Self::MODEL_BLESSING)?;
        let outcome = publish(model, blessing, &self.destination)?;

        ctx.emit(
            "publisher.outcome",
            json!({"outcome": outcome.label(), "version": outcome.version(), "model_id": model.id}),
        );

        let dir = ctx.create_output_dir(Self::PUSHED_MODEL)?;
        fs::write(dir.join("outcome.json"), serde_json::to_vec_pretty(&outcome)?)?;
        let draft = ArtifactDraft::new(dir)
            .with_property("pushed", json!(outcome.is_deployed()))
            .with_property("outcome", json!(outcome.label()))
            .with_property("destination", json!(self.destination))
            .with_property("version", json!(outcome.version()))
            .with_property(MODEL_ID_PROPERTY, json!(model.id));
        Ok(StageOutput::single(Self::PUSHED_MODEL, draft))
    }
}
