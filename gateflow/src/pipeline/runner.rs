//! Local DAG runner.
//!
//! Stages run as tokio tasks as soon as every producer and guard reached a
//! terminal state. Only the coordinating loop talks to the metadata store,
//! so each stage's outputs are committed in one write before any dependent
//! is scheduled.

use super::cache::cache_key;
use super::dag::Pipeline;
use super::spec::StageSpec;
use crate::channel::CommittedOutputs;
use crate::context::{StageContext, StageInputs};
use crate::core::{Artifact, RunId, RunStatus, StageId, StageOutput, StageStatus};
use crate::errors::GateflowError;
use crate::events::{EventSink, LoggingEventSink};
use crate::metadata::{MetadataStore, StageExecution};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Final state of one stage in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// The stage.
    pub stage_id: StageId,
    /// Terminal status.
    pub status: StageStatus,
    /// Committed (or reused) outputs.
    pub outputs: BTreeMap<String, Artifact>,
    /// Halt or block reason.
    pub reason: Option<String>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// The run id assigned by the store.
    pub run_id: RunId,
    /// The pipeline name.
    pub pipeline_name: String,
    /// `Completed` or `Halted`.
    pub status: RunStatus,
    /// Stages in execution order.
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Looks up one stage.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage_id.as_str() == id)
    }

    /// Status of one stage.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<StageStatus> {
        self.stage(id).map(|s| s.status)
    }

    /// One output artifact of one stage.
    #[must_use]
    pub fn output(&self, stage: &str, output: &str) -> Option<&Artifact> {
        self.stage(stage).and_then(|s| s.outputs.get(output))
    }

    /// Number of stages that ended in `status`.
    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}

struct Finished {
    index: usize,
    cache_key: Option<String>,
    started: Instant,
    result: Result<StageOutput, GateflowError>,
}

enum Readiness {
    Waiting,
    Ready,
    Blocked(String),
}

struct RunState {
    run_id: RunId,
    status: Vec<StageStatus>,
    reasons: Vec<Option<String>>,
    outputs: Vec<BTreeMap<String, Artifact>>,
    committed: CommittedOutputs,
}

impl RunState {
    fn new(pipeline: &Pipeline, run_id: RunId) -> Self {
        Self {
            run_id,
            status: vec![StageStatus::Pending; pipeline.len()],
            reasons: vec![None; pipeline.len()],
            outputs: vec![BTreeMap::new(); pipeline.len()],
            committed: CommittedOutputs::new(),
        }
    }

    fn readiness(&self, pipeline: &Pipeline, index: usize) -> Readiness {
        let spec = &pipeline.stages()[index];
        for guard in &spec.guards {
            if pipeline
                .index_of(guard)
                .is_some_and(|g| self.status[g] == StageStatus::Halted)
            {
                return Readiness::Blocked(format!("guard '{guard}' halted"));
            }
        }

        let mut waiting = false;
        for &up in pipeline.upstream_of(index) {
            match self.status[up] {
                StageStatus::Blocked | StageStatus::Failed => {
                    return Readiness::Blocked(format!(
                        "upstream stage '{}' did not commit",
                        pipeline.stages()[up].id
                    ));
                }
                StageStatus::Pending | StageStatus::Running => waiting = true,
                _ => {}
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    fn record(&mut self, spec: &StageSpec, index: usize, status: StageStatus, outputs: BTreeMap<String, Artifact>) {
        self.status[index] = status;
        self.committed.insert_stage(spec.id.clone(), outputs.clone());
        self.outputs[index] = outputs;
    }

    fn first_running(&self) -> Option<usize> {
        self.status.iter().position(|s| *s == StageStatus::Running)
    }

    fn run_status(&self) -> RunStatus {
        if self
            .status
            .iter()
            .any(|s| matches!(s, StageStatus::Halted | StageStatus::Blocked))
        {
            RunStatus::Halted
        } else {
            RunStatus::Completed
        }
    }

    fn into_report(self, pipeline: &Pipeline, status: RunStatus) -> RunReport {
        let Self {
            run_id,
            status: statuses,
            mut reasons,
            mut outputs,
            ..
        } = self;
        let stages = pipeline
            .execution_order()
            .iter()
            .map(|&i| StageReport {
                stage_id: pipeline.stages()[i].id.clone(),
                status: statuses[i],
                outputs: std::mem::take(&mut outputs[i]),
                reason: reasons[i].take(),
            })
            .collect();
        RunReport {
            run_id,
            pipeline_name: pipeline.name().to_string(),
            status,
            stages,
        }
    }
}

/// Executes assembled pipelines on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct LocalDagRunner {
    event_sink: Arc<dyn EventSink>,
}

impl Default for LocalDagRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDagRunner {
    /// Creates a runner that logs events through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            event_sink: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Runs the pipeline against the store named in its settings.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened, or as [`LocalDagRunner::run`].
    pub async fn run_with_configured_store(&self, pipeline: &Pipeline) -> Result<RunReport, GateflowError> {
        let store = pipeline.settings().metadata.open()?;
        self.run(pipeline, store).await
    }

    /// Runs the pipeline once, recording everything in `store`.
    ///
    /// A validation halt is not an error: the report's status is `Halted`
    /// and the blocked stages are listed as such.
    ///
    /// # Errors
    ///
    /// Returns [`GateflowError::StageFailed`] if any stage fails; in-flight
    /// stages are aborted and the run is recorded as `Failed`.
    pub async fn run(&self, pipeline: &Pipeline, store: Arc<dyn MetadataStore>) -> Result<RunReport, GateflowError> {
        let run = store.begin_run(pipeline.name()).await?;
        let run_id = run.run_id;
        let started = Instant::now();

        info!(pipeline = %pipeline.name(), run_id = %run_id, stages = pipeline.len(), "Pipeline run started");
        self.event_sink.try_emit(
            "pipeline.started",
            Some(json!({"pipeline": pipeline.name(), "run_id": run_id, "stages": pipeline.len()})),
        );

        let mut state = RunState::new(pipeline, run_id);
        match self.drive(pipeline, &store, &mut state).await {
            Ok(()) => {
                let status = state.run_status();
                store.finish_run(run_id, status).await?;
                info!(
                    pipeline = %pipeline.name(),
                    run_id = %run_id,
                    status = %status,
                    duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Pipeline run finished"
                );
                self.event_sink.try_emit(
                    "pipeline.completed",
                    Some(json!({"pipeline": pipeline.name(), "run_id": run_id, "status": status})),
                );
                Ok(state.into_report(pipeline, status))
            }
            Err((index, err)) => Err(self.fail(pipeline, &store, &mut state, index, err).await),
        }
    }

    async fn drive(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
    ) -> Result<(), (usize, GateflowError)> {
        let mut tasks: JoinSet<Finished> = JoinSet::new();

        loop {
            self.schedule(pipeline, store, state, &mut tasks).await?;

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let finished = match joined {
                Ok(finished) => finished,
                Err(join_err) => {
                    tasks.abort_all();
                    let index = state.first_running().unwrap_or_default();
                    return Err((index, GateflowError::Internal(format!("Stage task did not finish: {join_err}"))));
                }
            };

            let index = finished.index;
            let outcome = match finished.result {
                Ok(output) => {
                    self.commit(pipeline, store, state, index, output, finished.cache_key, finished.started)
                        .await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                tasks.abort_all();
                return Err((index, err));
            }
        }

        if let Some(index) = state.status.iter().position(|s| !s.is_terminal()) {
            return Err((
                index,
                GateflowError::Internal("Stage never became ready; the graph is inconsistent".to_string()),
            ));
        }
        Ok(())
    }

    /// Settles every pending stage whose upstream is terminal, in execution
    /// order so that blocks and cache hits cascade within one pass.
    async fn schedule(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
        tasks: &mut JoinSet<Finished>,
    ) -> Result<(), (usize, GateflowError)> {
        for &index in pipeline.execution_order() {
            if state.status[index] != StageStatus::Pending {
                continue;
            }
            let result = match state.readiness(pipeline, index) {
                Readiness::Waiting => continue,
                Readiness::Blocked(reason) => self.block(pipeline, store, state, index, reason).await,
                Readiness::Ready => self.launch(pipeline, store, state, index, tasks).await,
            };
            result.map_err(|err| (index, err))?;
        }
        Ok(())
    }

    async fn block(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
        index: usize,
        reason: String,
    ) -> Result<(), GateflowError> {
        let spec = &pipeline.stages()[index];
        let execution =
            StageExecution::new(state.run_id, spec.id.clone(), StageStatus::Blocked).with_reason(reason.clone());
        store.commit_stage(execution, Vec::new()).await?;

        info!(stage = %spec.id, run_id = %state.run_id, reason = %reason, "Stage blocked");
        self.event_sink.try_emit(
            "stage.blocked",
            Some(json!({"stage": spec.id, "run_id": state.run_id, "reason": reason})),
        );
        state.status[index] = StageStatus::Blocked;
        state.reasons[index] = Some(reason);
        Ok(())
    }

    async fn launch(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
        index: usize,
        tasks: &mut JoinSet<Finished>,
    ) -> Result<(), GateflowError> {
        let spec = &pipeline.stages()[index];
        let settings = pipeline.settings();

        let mut inputs = StageInputs::new();
        for (name, channel) in &spec.inputs {
            let artifact = channel.resolve(&spec.id, name, &state.committed)?;
            inputs.insert(name.clone(), artifact.cloned());
        }

        let key = if spec.runner.cacheable() {
            let fingerprint = spec.runner.fingerprint()?;
            Some(cache_key(&spec.id, spec.config(), &inputs.identities(), fingerprint.as_deref()))
        } else {
            None
        };

        if settings.enable_cache {
            if let Some(key) = &key {
                if let Some(outputs) = store.find_cached(pipeline.name(), key).await? {
                    if covers_required_outputs(spec, &outputs) {
                        let execution = StageExecution::new(state.run_id, spec.id.clone(), StageStatus::Cached)
                            .with_cache_key(Some(key.clone()))
                            .with_outputs(&outputs);
                        store.commit_stage(execution, Vec::new()).await?;

                        info!(stage = %spec.id, run_id = %state.run_id, "Stage outputs reused from cache");
                        self.event_sink.try_emit(
                            "stage.cached",
                            Some(json!({"stage": spec.id, "run_id": state.run_id, "cache_key": key})),
                        );
                        state.record(spec, index, StageStatus::Cached, outputs);
                        return Ok(());
                    }
                }
            }
        }

        let ctx = StageContext::new(
            spec.id.clone(),
            state.run_id,
            pipeline.name(),
            settings.root.clone(),
            inputs,
            Arc::clone(store),
        )
        .with_event_sink(Arc::clone(&self.event_sink));
        let runner = Arc::clone(&spec.runner);

        debug!(stage = %spec.id, kind = runner.kind(), run_id = %state.run_id, "Stage started");
        self.event_sink.try_emit(
            "stage.started",
            Some(json!({"stage": spec.id, "kind": runner.kind(), "run_id": state.run_id})),
        );
        state.status[index] = StageStatus::Running;

        tasks.spawn(async move {
            let started = Instant::now();
            let result = match AssertUnwindSafe(runner.execute(&ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(GateflowError::Internal(format!("Stage '{}' panicked", ctx.stage_id()))),
            };
            Finished {
                index,
                cache_key: key,
                started,
                result,
            }
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
        index: usize,
        output: StageOutput,
        key: Option<String>,
        started: Instant,
    ) -> Result<(), GateflowError> {
        let spec = &pipeline.stages()[index];
        check_output_contract(spec, &output)?;

        let status = if output.is_halted() {
            StageStatus::Halted
        } else {
            StageStatus::Completed
        };

        let mut committed = BTreeMap::new();
        let mut fresh = Vec::with_capacity(output.artifacts.len());
        for (name, draft) in output.artifacts {
            let declared = spec.outputs.get(&name).ok_or_else(|| GateflowError::OutputContract {
                stage: spec.id.to_string(),
                output: name.clone(),
                message: "output was not declared".to_string(),
            })?;
            let artifact = Artifact::from_draft(draft, declared.artifact_type, &spec.id, state.run_id);
            fresh.push(artifact.clone());
            committed.insert(name, artifact);
        }
        committed.extend(output.resolved);

        let mut execution = StageExecution::new(state.run_id, spec.id.clone(), status)
            .with_cache_key(key)
            .with_outputs(&committed);
        if let Some(reason) = &output.halt_reason {
            execution = execution.with_reason(reason.clone());
        }
        store.commit_stage(execution, fresh).await?;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        if status == StageStatus::Halted {
            warn!(
                stage = %spec.id,
                run_id = %state.run_id,
                reason = ?output.halt_reason,
                "Stage halted; guarded stages will be blocked"
            );
            self.event_sink.try_emit(
                "stage.halted",
                Some(json!({
                    "stage": spec.id,
                    "run_id": state.run_id,
                    "reason": output.halt_reason,
                    "duration_ms": duration_ms,
                })),
            );
        } else {
            info!(stage = %spec.id, run_id = %state.run_id, outputs = committed.len(), duration_ms, "Stage completed");
            self.event_sink.try_emit(
                "stage.completed",
                Some(json!({
                    "stage": spec.id,
                    "run_id": state.run_id,
                    "outputs": committed.keys().collect::<Vec<_>>(),
                    "duration_ms": duration_ms,
                })),
            );
        }

        state.reasons[index] = output.halt_reason;
        state.record(spec, index, status, committed);
        Ok(())
    }

    async fn fail(
        &self,
        pipeline: &Pipeline,
        store: &Arc<dyn MetadataStore>,
        state: &mut RunState,
        index: usize,
        err: GateflowError,
    ) -> GateflowError {
        let stage = pipeline.stages()[index].id.clone();
        state.status[index] = StageStatus::Failed;

        error!(stage = %stage, run_id = %state.run_id, error = %err, "Stage failed; aborting run");
        self.event_sink.try_emit(
            "stage.failed",
            Some(json!({"stage": stage, "run_id": state.run_id, "error": err.to_string()})),
        );

        let execution =
            StageExecution::new(state.run_id, stage.clone(), StageStatus::Failed).with_reason(err.to_string());
        if let Err(commit_err) = store.commit_stage(execution, Vec::new()).await {
            warn!(stage = %stage, error = %commit_err, "Failed to record stage failure");
        }
        if let Err(finish_err) = store.finish_run(state.run_id, RunStatus::Failed).await {
            warn!(run_id = %state.run_id, error = %finish_err, "Failed to mark run as failed");
        }
        self.event_sink.try_emit(
            "pipeline.completed",
            Some(json!({"pipeline": pipeline.name(), "run_id": state.run_id, "status": RunStatus::Failed})),
        );

        GateflowError::stage_failed(stage.as_str(), err)
    }
}

fn covers_required_outputs(spec: &StageSpec, outputs: &BTreeMap<String, Artifact>) -> bool {
    spec.outputs.iter().all(|(name, declared)| match outputs.get(name) {
        Some(artifact) => artifact.artifact_type == declared.artifact_type,
        None => declared.optional,
    })
}

fn check_output_contract(spec: &StageSpec, output: &StageOutput) -> Result<(), GateflowError> {
    let violation = |output: &str, message: String| GateflowError::OutputContract {
        stage: spec.id.to_string(),
        output: output.to_string(),
        message,
    };

    for name in output.output_names() {
        if !spec.outputs.contains_key(name) {
            return Err(violation(name, "output was not declared".to_string()));
        }
    }
    for (name, artifact) in &output.resolved {
        if output.artifacts.contains_key(name) {
            return Err(violation(name, "output produced twice".to_string()));
        }
        if let Some(declared) = spec.outputs.get(name) {
            if artifact.artifact_type != declared.artifact_type {
                return Err(violation(
                    name,
                    format!("expected {}, got {}", declared.artifact_type, artifact.artifact_type),
                ));
            }
        }
    }
    for (name, declared) in &spec.outputs {
        let present = output.artifacts.contains_key(name) || output.resolved.contains_key(name);
        if !present && !declared.optional {
            return Err(violation(name, "required output is missing".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::core::{ArtifactDraft, ArtifactType};
    use crate::events::CollectingEventSink;
    use crate::metadata::InMemoryMetadataStore;
    use crate::pipeline::{OutputSpec, PipelineBuilder, PipelineSettings};
    use crate::stages::{FnStage, NoOpStage, Stage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(root: &std::path::Path) -> PipelineSettings {
        PipelineSettings::new("runner_test", root)
    }

    fn counting(output: &'static str, ty: ArtifactType, calls: Arc<AtomicUsize>) -> Arc<dyn Stage> {
        Arc::new(
            FnStage::new("Counting", move |ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(StageOutput::single(output, ArtifactDraft::new(ctx.output_dir(output))))
            })
            .with_output(output, OutputSpec::new(ty)),
        )
    }

    #[tokio::test]
    async fn test_linear_run_commits_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PipelineBuilder::new(settings(dir.path()));
        let gen = builder.register(
            "gen",
            Arc::new(NoOpStage::new().with_output("examples", ArtifactType::Examples)),
            Vec::<(String, Channel)>::new(),
        );
        builder.register(
            "stats",
            Arc::new(NoOpStage::new().with_output("statistics", ArtifactType::Statistics)),
            [("examples", gen.output("examples").unwrap())],
        );
        let pipeline = builder.assemble().unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let report = LocalDagRunner::new()
            .with_event_sink(sink.clone())
            .run(&pipeline, store.clone())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.count(StageStatus::Completed), 2);
        let examples = report.output("gen", "examples").unwrap();
        assert_eq!(examples.artifact_type, ArtifactType::Examples);
        assert_eq!(examples.run_id, report.run_id);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.artifact_count(), 2);
        assert_eq!(snapshot.run(report.run_id).map(|r| r.status), Some(RunStatus::Completed));
        assert_eq!(sink.count("stage.started"), 2);
        assert_eq!(sink.count("stage.completed"), 2);
        assert_eq!(sink.count("pipeline.completed"), 1);
    }

    #[tokio::test]
    async fn test_second_run_reuses_cached_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let build = || {
            let mut builder = PipelineBuilder::new(settings(dir.path()));
            builder.register(
                "gen",
                counting("examples", ArtifactType::Examples, Arc::clone(&calls)),
                Vec::<(String, Channel)>::new(),
            );
            builder.assemble().unwrap()
        };

        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let runner = LocalDagRunner::new();
        let first = runner.run(&build(), Arc::clone(&store)).await.unwrap();
        let second = runner.run(&build(), Arc::clone(&store)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.status_of("gen"), Some(StageStatus::Cached));
        assert_eq!(
            first.output("gen", "examples").map(|a| a.id),
            second.output("gen", "examples").map(|a| a.id)
        );
    }

    #[tokio::test]
    async fn test_changed_stage_config_misses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let build = |threshold: f64| {
            let calls = Arc::clone(&calls);
            let mut builder = PipelineBuilder::new(settings(dir.path()));
            builder.register(
                "evaluator",
                Arc::new(
                    FnStage::new("Thresholded", move |ctx| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(StageOutput::single("blessing", ArtifactDraft::new(ctx.output_dir("blessing"))))
                    })
                    .with_output("blessing", OutputSpec::new(ArtifactType::ModelBlessing))
                    .with_config(json!({"lower_bound": threshold})),
                ),
                Vec::<(String, Channel)>::new(),
            );
            builder.assemble().unwrap()
        };

        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let runner = LocalDagRunner::new();
        let strict = build(0.9);
        assert_eq!(strict.stages()[0].config(), &json!({"lower_bound": 0.9}));
        runner.run(&strict, Arc::clone(&store)).await.unwrap();
        let lenient = runner.run(&build(0.5), Arc::clone(&store)).await.unwrap();
        let strict_again = runner.run(&build(0.9), Arc::clone(&store)).await.unwrap();

        assert_eq!(lenient.status_of("evaluator"), Some(StageStatus::Completed));
        assert_eq!(strict_again.status_of("evaluator"), Some(StageStatus::Cached));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = PipelineBuilder::new(settings(dir.path()).with_cache(false));
        builder.register(
            "gen",
            counting("examples", ArtifactType::Examples, Arc::clone(&calls)),
            Vec::<(String, Channel)>::new(),
        );
        let pipeline = builder.assemble().unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let runner = LocalDagRunner::new();
        runner.run(&pipeline, Arc::clone(&store)).await.unwrap();
        let second = runner.run(&pipeline, Arc::clone(&store)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.status_of("gen"), Some(StageStatus::Completed));
    }

    #[tokio::test]
    async fn test_halt_blocks_guarded_stages_and_their_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PipelineBuilder::new(settings(dir.path()));
        let validator = builder.register(
            "validator",
            Arc::new(
                FnStage::new("Validator", |ctx| {
                    Ok(StageOutput::single("anomalies", ArtifactDraft::new(ctx.output_dir("anomalies")))
                        .halted("schema violated"))
                })
                .with_output("anomalies", OutputSpec::new(ArtifactType::Anomalies)),
            ),
            Vec::<(String, Channel)>::new(),
        );
        let guarded = builder.add(
            StageSpec::new(
                "transform",
                Arc::new(NoOpStage::new().with_output("transformed", ArtifactType::TransformedExamples)),
            )
            .with_guard(validator.id()),
        );
        builder.register(
            "trainer",
            Arc::new(NoOpStage::new()),
            [("examples", guarded.output("transformed").unwrap())],
        );
        builder.register("unrelated", Arc::new(NoOpStage::new()), Vec::<(String, Channel)>::new());
        let pipeline = builder.assemble().unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let report = LocalDagRunner::new()
            .with_event_sink(sink.clone())
            .run(&pipeline, Arc::clone(&store))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Halted);
        assert_eq!(report.status_of("validator"), Some(StageStatus::Halted));
        assert_eq!(report.status_of("transform"), Some(StageStatus::Blocked));
        assert_eq!(report.status_of("trainer"), Some(StageStatus::Blocked));
        assert_eq!(report.status_of("unrelated"), Some(StageStatus::Completed));
        assert!(report.output("validator", "anomalies").is_some());
        assert_eq!(sink.count("stage.blocked"), 2);
        assert_eq!(sink.count("stage.halted"), 1);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.run(report.run_id).map(|r| r.status), Some(RunStatus::Halted));
        assert_eq!(snapshot.run_executions(report.run_id).count(), 4);
    }

    #[tokio::test]
    async fn test_stage_error_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PipelineBuilder::new(settings(dir.path()));
        let gen = builder.register(
            "gen",
            Arc::new(
                FnStage::new("Broken", |_| Err(GateflowError::Internal("boom".to_string())))
                    .with_output("examples", OutputSpec::new(ArtifactType::Examples)),
            ),
            Vec::<(String, Channel)>::new(),
        );
        builder.register("stats", Arc::new(NoOpStage::new()), [("examples", gen.output("examples").unwrap())]);
        let pipeline = builder.assemble().unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let err = LocalDagRunner::new()
            .run(&pipeline, Arc::clone(&store))
            .await
            .unwrap_err();

        assert!(matches!(&err, GateflowError::StageFailed { stage, .. } if stage == "gen"));
        let snapshot = store.snapshot().await.unwrap();
        let run = snapshot.latest_run("runner_test").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(snapshot.artifact_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_declared_output_violates_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PipelineBuilder::new(settings(dir.path()));
        builder.register(
            "gen",
            Arc::new(
                FnStage::new("Lazy", |_| Ok(StageOutput::empty()))
                    .with_output("examples", OutputSpec::new(ArtifactType::Examples)),
            ),
            Vec::<(String, Channel)>::new(),
        );
        let pipeline = builder.assemble().unwrap();

        let err = LocalDagRunner::new()
            .run(&pipeline, Arc::new(InMemoryMetadataStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), GateflowError::OutputContract { output, .. } if output == "examples"));
    }
}
