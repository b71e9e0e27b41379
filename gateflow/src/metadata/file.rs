//! JSON-file backed metadata store.
//!
//! Every mutation rewrites the whole file through a temporary sibling and a
//! rename, so a reader never sees a half-written commit.

use super::store::{MetadataSnapshot, MetadataStore, RunRecord, StageExecution};
use crate::core::{Artifact, RunId, RunStatus};
use crate::errors::MetadataError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata store persisted to a single JSON file.
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    state: Mutex<MetadataSnapshot>,
}

impl FileMetadataStore {
    /// Opens the store at `path`, creating an empty one if the file is absent.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            MetadataSnapshot::default()
        };
        debug!(path = %path.display(), "Opened metadata store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `mutate` to a copy of the state, persists it, then publishes it.
    fn update<T>(
        &self,
        mutate: impl FnOnce(&mut MetadataSnapshot) -> Result<T, MetadataError>,
    ) -> Result<T, MetadataError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let value = mutate(&mut next)?;
        persist(&self.path, &next)?;
        *state = next;
        Ok(value)
    }
}

fn persist(path: &Path, snapshot: &MetadataSnapshot) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn begin_run(&self, pipeline_name: &str) -> Result<RunRecord, MetadataError> {
        self.update(|state| Ok(state.begin_run(pipeline_name)))
    }

    async fn commit_stage(&self, execution: StageExecution, artifacts: Vec<Artifact>) -> Result<(), MetadataError> {
        self.update(|state| state.commit(execution, artifacts))
    }

    async fn finish_run(&self, run_id: RunId, status: RunStatus) -> Result<(), MetadataError> {
        self.update(|state| state.finish_run(run_id, status))
    }

    async fn snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        Ok(self.state.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactType, StageId, StageStatus};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata").join("store.json");

        let store = FileMetadataStore::open(&path).unwrap();
        let run = store.begin_run("fraud").await.unwrap().run_id;
        let artifact = Artifact::new(ArtifactType::Model, "/m", "trainer", run);
        let mut outputs = BTreeMap::new();
        outputs.insert("model".to_string(), artifact.clone());
        store
            .commit_stage(
                StageExecution::new(run, StageId::from("trainer"), StageStatus::Completed).with_outputs(&outputs),
                vec![artifact.clone()],
            )
            .await
            .unwrap();
        store.finish_run(run, RunStatus::Completed).await.unwrap();
        drop(store);

        let reopened = FileMetadataStore::open(&path).unwrap();
        let snapshot = reopened.snapshot().await.unwrap();
        assert_eq!(snapshot.artifact(&artifact.id), Some(&artifact));
        assert_eq!(snapshot.run(run).map(|r| r.status), Some(RunStatus::Completed));

        let next = reopened.begin_run("fraud").await.unwrap();
        assert_eq!(next.run_id, RunId(2));
    }

    #[tokio::test]
    async fn test_rejected_commit_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileMetadataStore::open(&path).unwrap();
        let run = store.begin_run("fraud").await.unwrap().run_id;
        let before = fs::read_to_string(&path).unwrap();

        let result = store.finish_run(RunId(run.0 + 7), RunStatus::Completed).await;
        assert!(matches!(result, Err(MetadataError::UnknownRun(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            FileMetadataStore::open(&path),
            Err(MetadataError::Serialization(_))
        ));
    }
}
