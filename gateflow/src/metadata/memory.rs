//! In-memory metadata store.

use super::store::{MetadataSnapshot, MetadataStore, RunRecord, StageExecution};
use crate::core::{Artifact, RunId, RunStatus};
use crate::errors::MetadataError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata store held in process memory.
///
/// Clones share state, so a store can be handed to several runners.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    state: Arc<RwLock<MetadataSnapshot>>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs recorded.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.state.read().runs().len()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn begin_run(&self, pipeline_name: &str) -> Result<RunRecord, MetadataError> {
        Ok(self.state.write().begin_run(pipeline_name))
    }

    async fn commit_stage(&self, execution: StageExecution, artifacts: Vec<Artifact>) -> Result<(), MetadataError> {
        self.state.write().commit(execution, artifacts)
    }

    async fn finish_run(&self, run_id: RunId, status: RunStatus) -> Result<(), MetadataError> {
        self.state.write().finish_run(run_id, status)
    }

    async fn snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        Ok(self.state.read().clone())
    }

    async fn find_cached(
        &self,
        pipeline_name: &str,
        cache_key: &str,
    ) -> Result<Option<BTreeMap<String, Artifact>>, MetadataError> {
        Ok(self.state.read().find_cached(pipeline_name, cache_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactType, StageId, StageStatus};

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryMetadataStore::new();
        let other = store.clone();

        let run = store.begin_run("fraud").await.unwrap();
        assert_eq!(other.run_count(), 1);

        let snapshot = other.snapshot().await.unwrap();
        assert_eq!(snapshot.run(run.run_id).map(|r| r.status), Some(RunStatus::Running));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_later_commits() {
        let store = InMemoryMetadataStore::new();
        let run = store.begin_run("fraud").await.unwrap().run_id;
        let before = store.snapshot().await.unwrap();

        let artifact = Artifact::new(ArtifactType::Model, "/m", "trainer", run);
        let mut outputs = BTreeMap::new();
        outputs.insert("model".to_string(), artifact.clone());
        store
            .commit_stage(
                StageExecution::new(run, StageId::from("trainer"), StageStatus::Completed).with_outputs(&outputs),
                vec![artifact],
            )
            .await
            .unwrap();

        assert_eq!(before.artifact_count(), 0);
        assert_eq!(store.snapshot().await.unwrap().artifact_count(), 1);
    }
}
