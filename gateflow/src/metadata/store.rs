//! Metadata store protocol and the snapshot every query runs against.

use crate::core::{Artifact, ArtifactType, RunId, RunStatus, StageId, StageStatus};
use crate::errors::MetadataError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use uuid::Uuid;

/// One pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id, increasing per store.
    pub run_id: RunId,
    /// The pipeline this run belongs to.
    pub pipeline_name: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// The committed record of one stage within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageExecution {
    /// The run.
    pub run_id: RunId,
    /// The stage.
    pub stage_id: StageId,
    /// Terminal status of the stage.
    pub status: StageStatus,
    /// Cache key the execution was computed under.
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Output name to artifact id.
    #[serde(default)]
    pub outputs: BTreeMap<String, Uuid>,
    /// Halt, block, or failure reason.
    #[serde(default)]
    pub reason: Option<String>,
}

impl StageExecution {
    /// Creates an execution record with no outputs.
    #[must_use]
    pub fn new(run_id: RunId, stage_id: StageId, status: StageStatus) -> Self {
        Self {
            run_id,
            stage_id,
            status,
            cache_key: None,
            outputs: BTreeMap::new(),
            reason: None,
        }
    }

    /// Sets the cache key.
    #[must_use]
    pub fn with_cache_key(mut self, key: Option<String>) -> Self {
        self.cache_key = key;
        self
    }

    /// Records the committed outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: &BTreeMap<String, Artifact>) -> Self {
        self.outputs = outputs.iter().map(|(name, a)| (name.clone(), a.id)).collect();
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A consistent, point-in-time copy of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    last_run_id: u64,
    runs: Vec<RunRecord>,
    executions: Vec<StageExecution>,
    artifacts: BTreeMap<Uuid, Artifact>,
}

impl MetadataSnapshot {
    /// All runs in id order.
    #[must_use]
    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    /// Looks up a run.
    #[must_use]
    pub fn run(&self, run_id: RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }

    /// Runs of one pipeline in id order.
    pub fn pipeline_runs<'a>(&'a self, pipeline_name: &'a str) -> impl Iterator<Item = &'a RunRecord> + 'a {
        self.runs.iter().filter(move |r| r.pipeline_name == pipeline_name)
    }

    /// The most recent run of a pipeline.
    #[must_use]
    pub fn latest_run<'a>(&'a self, pipeline_name: &'a str) -> Option<&'a RunRecord> {
        self.pipeline_runs(pipeline_name).last()
    }

    /// All stage executions in commit order.
    #[must_use]
    pub fn executions(&self) -> &[StageExecution] {
        &self.executions
    }

    /// Executions committed by one run.
    pub fn run_executions(&self, run_id: RunId) -> impl Iterator<Item = &StageExecution> + '_ {
        self.executions.iter().filter(move |e| e.run_id == run_id)
    }

    /// Looks up an artifact.
    #[must_use]
    pub fn artifact(&self, id: &Uuid) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    /// Number of distinct artifacts ever committed.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    fn run_pipeline(&self, run_id: RunId) -> Option<&str> {
        self.run(run_id).map(|r| r.pipeline_name.as_str())
    }

    /// Artifacts of one type produced by a pipeline, oldest first.
    ///
    /// Ordered by `(created_at, run_id)`.
    #[must_use]
    pub fn artifacts_of_type(&self, pipeline_name: &str, artifact_type: ArtifactType) -> Vec<&Artifact> {
        let mut found: Vec<&Artifact> = self
            .artifacts
            .values()
            .filter(|a| a.artifact_type == artifact_type)
            .filter(|a| self.run_pipeline(a.run_id) == Some(pipeline_name))
            .collect();
        found.sort_by(|a, b| (a.created_at, a.run_id).cmp(&(b.created_at, b.run_id)));
        found
    }

    /// Artifacts a stage execution committed or reused as its own outputs.
    ///
    /// Re-exposed artifacts (a resolver handing back an older model) are
    /// skipped: only outputs produced by the same stage count.
    fn own_outputs<'a>(&'a self, execution: &'a StageExecution) -> impl Iterator<Item = &'a Artifact> + 'a {
        execution
            .outputs
            .values()
            .filter_map(move |id| self.artifacts.get(id))
            .filter(move |a| a.producer == execution.stage_id)
    }

    /// Artifacts of one type that completed runs of a pipeline older than
    /// `before` committed or reused from the cache.
    ///
    /// Each artifact is paired with the latest such run, so a model first
    /// produced by a failed run still counts once a completed run reuses it.
    /// Ordered by `(created_at, run_id)`.
    #[must_use]
    pub fn committed_artifacts(
        &self,
        pipeline_name: &str,
        artifact_type: ArtifactType,
        before: RunId,
    ) -> Vec<(&Artifact, RunId)> {
        let mut latest: BTreeMap<Uuid, (&Artifact, RunId)> = BTreeMap::new();
        for execution in &self.executions {
            if execution.run_id >= before || !matches!(execution.status, StageStatus::Completed | StageStatus::Cached) {
                continue;
            }
            let completed = self
                .run(execution.run_id)
                .is_some_and(|r| r.pipeline_name == pipeline_name && r.status == RunStatus::Completed);
            if !completed {
                continue;
            }
            for artifact in self.own_outputs(execution).filter(|a| a.artifact_type == artifact_type) {
                let entry = latest.entry(artifact.id).or_insert((artifact, execution.run_id));
                entry.1 = entry.1.max(execution.run_id);
            }
        }
        let mut found: Vec<(&Artifact, RunId)> = latest.into_values().collect();
        found.sort_by(|(a, ra), (b, rb)| (a.created_at, ra).cmp(&(b.created_at, rb)));
        found
    }

    /// The blessing a run's evaluator committed or reused, if any.
    #[must_use]
    pub fn evaluation_of(&self, run_id: RunId) -> Option<&Artifact> {
        self.run_executions(run_id)
            .filter(|e| matches!(e.status, StageStatus::Completed | StageStatus::Cached))
            .flat_map(|e| self.own_outputs(e))
            .find(|a| a.artifact_type == ArtifactType::ModelBlessing)
    }

    /// Every run of the pipeline with its evaluation, oldest first.
    #[must_use]
    pub fn evaluation_history(&self, pipeline_name: &str) -> Vec<(RunId, &Artifact)> {
        self.pipeline_runs(pipeline_name)
            .filter_map(|run| self.evaluation_of(run.run_id).map(|b| (run.run_id, b)))
            .collect()
    }

    /// Outputs of the latest reusable execution with `cache_key`.
    ///
    /// Only executions that completed normally are reused; halted ones
    /// re-run so the halt is re-evaluated.
    #[must_use]
    pub fn find_cached(&self, pipeline_name: &str, cache_key: &str) -> Option<BTreeMap<String, Artifact>> {
        self.executions
            .iter()
            .rev()
            .filter(|e| e.cache_key.as_deref() == Some(cache_key))
            .filter(|e| matches!(e.status, StageStatus::Completed | StageStatus::Cached))
            .filter(|e| self.run_pipeline(e.run_id) == Some(pipeline_name))
            .find_map(|e| {
                e.outputs
                    .iter()
                    .map(|(name, id)| self.artifacts.get(id).map(|a| (name.clone(), a.clone())))
                    .collect::<Option<BTreeMap<_, _>>>()
            })
    }

    pub(crate) fn begin_run(&mut self, pipeline_name: &str) -> RunRecord {
        self.last_run_id += 1;
        let record = RunRecord {
            run_id: RunId(self.last_run_id),
            pipeline_name: pipeline_name.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.push(record.clone());
        record
    }

    /// Applies one stage commit; validates everything before mutating.
    pub(crate) fn commit(&mut self, execution: StageExecution, artifacts: Vec<Artifact>) -> Result<(), MetadataError> {
        let run = self
            .run(execution.run_id)
            .ok_or(MetadataError::UnknownRun(execution.run_id))?;
        if run.status != RunStatus::Running {
            return Err(MetadataError::RunNotActive(execution.run_id));
        }
        if self
            .run_executions(execution.run_id)
            .any(|e| e.stage_id == execution.stage_id)
        {
            return Err(MetadataError::DuplicateExecution {
                run_id: execution.run_id,
                stage: execution.stage_id.to_string(),
            });
        }
        for id in execution.outputs.values() {
            let known = self.artifacts.contains_key(id) || artifacts.iter().any(|a| &a.id == id);
            if !known {
                return Err(MetadataError::UnknownArtifact(*id));
            }
        }

        for artifact in artifacts {
            self.artifacts.entry(artifact.id).or_insert(artifact);
        }
        self.executions.push(execution);
        Ok(())
    }

    pub(crate) fn finish_run(&mut self, run_id: RunId, status: RunStatus) -> Result<(), MetadataError> {
        let run = self
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or(MetadataError::UnknownRun(run_id))?;
        if run.status != RunStatus::Running {
            return Err(MetadataError::RunNotActive(run_id));
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Durable record of runs, stage executions and artifacts.
///
/// All outputs of one stage commit together or not at all, and
/// [`MetadataStore::snapshot`] never observes a partial commit.
#[async_trait]
pub trait MetadataStore: Send + Sync + Debug {
    /// Opens a new run for `pipeline_name`.
    async fn begin_run(&self, pipeline_name: &str) -> Result<RunRecord, MetadataError>;

    /// Atomically records a stage execution and its new artifacts.
    async fn commit_stage(&self, execution: StageExecution, artifacts: Vec<Artifact>) -> Result<(), MetadataError>;

    /// Moves a run to a terminal status.
    async fn finish_run(&self, run_id: RunId, status: RunStatus) -> Result<(), MetadataError>;

    /// Returns a consistent copy of the store.
    async fn snapshot(&self) -> Result<MetadataSnapshot, MetadataError>;

    /// Looks up reusable outputs for a cache key.
    async fn find_cached(
        &self,
        pipeline_name: &str,
        cache_key: &str,
    ) -> Result<Option<BTreeMap<String, Artifact>>, MetadataError> {
        Ok(self.snapshot().await?.find_cached(pipeline_name, cache_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(run: RunId) -> Artifact {
        Artifact::new(ArtifactType::Model, "/m", "trainer", run)
    }

    #[test]
    fn test_run_ids_increase() {
        let mut snap = MetadataSnapshot::default();
        let a = snap.begin_run("p");
        let b = snap.begin_run("q");
        assert_eq!(a.run_id, RunId(1));
        assert_eq!(b.run_id, RunId(2));
        assert_eq!(snap.pipeline_runs("p").count(), 1);

        let name = String::from("q");
        assert_eq!(snap.latest_run(&name).map(|r| r.run_id), Some(b.run_id));
        assert!(snap.latest_run("missing").is_none());
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let mut snap = MetadataSnapshot::default();
        let run = snap.begin_run("p").run_id;
        let artifact = model(run);
        let mut outputs = BTreeMap::new();
        outputs.insert("model".to_string(), artifact.clone());
        let mut execution = StageExecution::new(run, StageId::from("trainer"), StageStatus::Completed)
            .with_outputs(&outputs);
        execution.outputs.insert("extra".to_string(), Uuid::new_v4());

        let err = snap.commit(execution, vec![artifact]).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownArtifact(_)));
        assert_eq!(snap.artifact_count(), 0);
        assert!(snap.executions().is_empty());
    }

    #[test]
    fn test_duplicate_execution_rejected() {
        let mut snap = MetadataSnapshot::default();
        let run = snap.begin_run("p").run_id;
        let exec = StageExecution::new(run, StageId::from("a"), StageStatus::Completed);
        snap.commit(exec.clone(), vec![]).unwrap();

        assert!(matches!(
            snap.commit(exec, vec![]),
            Err(MetadataError::DuplicateExecution { .. })
        ));
    }

    #[test]
    fn test_finished_run_rejects_commits() {
        let mut snap = MetadataSnapshot::default();
        let run = snap.begin_run("p").run_id;
        snap.finish_run(run, RunStatus::Completed).unwrap();

        let exec = StageExecution::new(run, StageId::from("a"), StageStatus::Completed);
        assert!(matches!(snap.commit(exec, vec![]), Err(MetadataError::RunNotActive(_))));
        assert!(matches!(
            snap.finish_run(run, RunStatus::Failed),
            Err(MetadataError::RunNotActive(_))
        ));
    }

    #[test]
    fn test_find_cached_returns_latest_matching_outputs() {
        let mut snap = MetadataSnapshot::default();
        let mut latest = None;
        for _ in 0..2 {
            let run = snap.begin_run("p").run_id;
            let artifact = model(run);
            let mut outputs = BTreeMap::new();
            outputs.insert("model".to_string(), artifact.clone());
            let exec = StageExecution::new(run, StageId::from("trainer"), StageStatus::Completed)
                .with_cache_key(Some("k".to_string()))
                .with_outputs(&outputs);
            snap.commit(exec, vec![artifact.clone()]).unwrap();
            snap.finish_run(run, RunStatus::Completed).unwrap();
            latest = Some(artifact);
        }

        let cached = snap.find_cached("p", "k").unwrap();
        assert_eq!(cached.get("model"), latest.as_ref());
        assert!(snap.find_cached("other", "k").is_none());
        assert!(snap.find_cached("p", "missing").is_none());
    }

    /// Commits `artifacts` as the outputs of `stage` in `run`.
    fn commit_outputs(snap: &mut MetadataSnapshot, run: RunId, stage: &str, status: StageStatus, artifacts: &[&Artifact]) {
        let outputs: BTreeMap<String, Artifact> = artifacts
            .iter()
            .map(|a| (a.artifact_type.to_string(), (*a).clone()))
            .collect();
        let fresh = if status == StageStatus::Completed {
            artifacts.iter().map(|a| (*a).clone()).collect()
        } else {
            Vec::new()
        };
        snap.commit(
            StageExecution::new(run, StageId::from(stage), status).with_outputs(&outputs),
            fresh,
        )
        .unwrap();
    }

    #[test]
    fn test_artifacts_reused_by_a_completed_run_count_as_committed() {
        let mut snap = MetadataSnapshot::default();
        let failed = snap.begin_run("p").run_id;
        let trained = model(failed);
        commit_outputs(&mut snap, failed, "trainer", StageStatus::Completed, &[&trained]);
        snap.finish_run(failed, RunStatus::Failed).unwrap();
        assert!(snap.committed_artifacts("p", ArtifactType::Model, RunId(u64::MAX)).is_empty());

        let reused = snap.begin_run("p").run_id;
        commit_outputs(&mut snap, reused, "trainer", StageStatus::Cached, &[&trained]);
        snap.finish_run(reused, RunStatus::Completed).unwrap();

        let committed = snap.committed_artifacts("p", ArtifactType::Model, RunId(u64::MAX));
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].0.id, trained.id);
        assert_eq!(committed[0].1, reused);
        assert!(snap.committed_artifacts("p", ArtifactType::Model, reused).is_empty());
    }

    #[test]
    fn test_cached_evaluation_is_recorded_for_each_run() {
        let mut snap = MetadataSnapshot::default();
        let first = snap.begin_run("p").run_id;
        let blessing = Artifact::new(ArtifactType::ModelBlessing, "/b", "evaluator", first);
        commit_outputs(&mut snap, first, "evaluator", StageStatus::Completed, &[&blessing]);
        snap.finish_run(first, RunStatus::Completed).unwrap();

        let second = snap.begin_run("p").run_id;
        commit_outputs(&mut snap, second, "evaluator", StageStatus::Cached, &[&blessing]);
        // A resolver re-exposing the same blessing is not an evaluation.
        commit_outputs(&mut snap, second, "resolver", StageStatus::Completed, &[&blessing]);
        snap.finish_run(second, RunStatus::Completed).unwrap();

        let resolver_only = snap.begin_run("p").run_id;
        commit_outputs(&mut snap, resolver_only, "resolver", StageStatus::Completed, &[&blessing]);

        let history: Vec<RunId> = snap.evaluation_history("p").into_iter().map(|(run, _)| run).collect();
        assert_eq!(history, vec![first, second]);
        assert_eq!(snap.evaluation_of(second).map(|b| b.id), Some(blessing.id));
        assert!(snap.evaluation_of(resolver_only).is_none());
    }

    #[test]
    fn test_halted_executions_are_not_reused() {
        let mut snap = MetadataSnapshot::default();
        let run = snap.begin_run("p").run_id;
        let exec = StageExecution::new(run, StageId::from("example_validator"), StageStatus::Halted)
            .with_cache_key(Some("k".to_string()));
        snap.commit(exec, vec![]).unwrap();

        assert!(snap.find_cached("p", "k").is_none());
    }
}
