//! Pipeline assembly: connectivity validation, cycle detection and the
//! frozen execution order.

use super::spec::{PipelineSettings, StageSpec};
use crate::core::StageId;
use crate::errors::{
    AssemblyError, ContractErrorInfo, CycleDetectedError, DanglingChannelError, DuplicateStageError,
    PipelineValidationError,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// An assembled, immutable pipeline.
///
/// Stages live in an arena in registration order; edges are stored as
/// index lists so the runner never looks stages up by name.
#[derive(Debug, Clone)]
pub struct Pipeline {
    settings: PipelineSettings,
    stages: Vec<StageSpec>,
    execution_order: Vec<usize>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
    index: HashMap<StageId, usize>,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// The settings fixed at assembly.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Stages in registration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for an assembled pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &StageId) -> Option<&StageSpec> {
        self.index_of(id).and_then(|i| self.stages.get(i))
    }

    /// Registration index of a stage.
    #[must_use]
    pub fn index_of(&self, id: &StageId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Registration indices in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    /// Stage ids in execution order.
    #[must_use]
    pub fn execution_ids(&self) -> Vec<&StageId> {
        self.execution_order
            .iter()
            .filter_map(|&i| self.stages.get(i))
            .map(|spec| &spec.id)
            .collect()
    }

    /// Distinct producers and guards of a stage.
    #[must_use]
    pub fn upstream_of(&self, index: usize) -> &[usize] {
        self.upstream.get(index).map_or(&[], Vec::as_slice)
    }

    /// Distinct stages consuming or guarded by a stage.
    #[must_use]
    pub fn downstream_of(&self, index: usize) -> &[usize] {
        self.downstream.get(index).map_or(&[], Vec::as_slice)
    }
}

/// Validates the stage list and freezes it into a [`Pipeline`].
///
/// Checks run in this order: pipeline name, non-empty stage list, stage id
/// syntax, duplicate ids, channel and guard bindings, cycles. The execution
/// order is Kahn's algorithm that always picks the ready stage registered
/// first, so independent stages keep their declaration order.
///
/// # Errors
///
/// Returns the first [`AssemblyError`] found.
pub fn assemble(settings: PipelineSettings, stages: Vec<StageSpec>) -> Result<Pipeline, AssemblyError> {
    if settings.name.trim().is_empty() {
        return Err(PipelineValidationError::new("Pipeline name is empty")
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-INVALID_NAME", "A pipeline needs a non-empty name")
                    .with_fix_hint("Set pipeline_name; runs and caching are scoped to it."),
            )
            .into());
    }
    if stages.is_empty() {
        return Err(PipelineValidationError::new("Pipeline has no stages")
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot assemble an empty pipeline")
                    .with_fix_hint("Register at least one stage before assembling."),
            )
            .into());
    }

    let mut index = HashMap::with_capacity(stages.len());
    for (i, spec) in stages.iter().enumerate() {
        spec.validate()?;
        if index.insert(spec.id.clone(), i).is_some() {
            return Err(DuplicateStageError::new(spec.id.as_str()).into());
        }
    }

    for spec in &stages {
        check_bindings(spec, &stages, &index)?;
    }

    let upstream: Vec<Vec<usize>> = stages
        .iter()
        .map(|spec| {
            spec.upstream()
                .filter_map(|id| index.get(id).copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .collect();

    detect_cycles(&stages, &upstream)?;

    let mut downstream = vec![Vec::new(); stages.len()];
    for (consumer, producers) in upstream.iter().enumerate() {
        for &producer in producers {
            downstream[producer].push(consumer);
        }
    }

    let execution_order = topological_order(&upstream, &downstream);
    debug!(
        pipeline = %settings.name,
        order = ?execution_order.iter().map(|&i| stages[i].id.as_str()).collect::<Vec<_>>(),
        "Pipeline assembled"
    );

    Ok(Pipeline {
        settings,
        stages,
        execution_order,
        upstream,
        downstream,
        index,
    })
}

fn check_bindings(
    spec: &StageSpec,
    stages: &[StageSpec],
    index: &HashMap<StageId, usize>,
) -> Result<(), DanglingChannelError> {
    for (input, channel) in &spec.inputs {
        let dangling = |detail: String| {
            DanglingChannelError::new(
                spec.id.as_str(),
                input.as_str(),
                channel.producer().as_str(),
                channel.output(),
                detail,
            )
        };

        let Some(producer) = index.get(channel.producer()).and_then(|&i| stages.get(i)) else {
            return Err(dangling("producer is not registered".to_string()));
        };
        let Some(declared) = producer.outputs.get(channel.output()) else {
            return Err(dangling(format!(
                "'{}' declares no output '{}'",
                producer.id,
                channel.output()
            )));
        };
        if declared.artifact_type != channel.artifact_type() {
            return Err(dangling(format!(
                "output carries {}, channel expects {}",
                declared.artifact_type,
                channel.artifact_type()
            )));
        }
        if declared.optional && !channel.is_optional() {
            return Err(dangling(
                "output may be empty; consume it through a resolver channel".to_string(),
            ));
        }
    }

    for guard in &spec.guards {
        if !index.contains_key(guard) {
            return Err(DanglingChannelError::new(
                spec.id.as_str(),
                "<guard>",
                guard.as_str(),
                "*",
                "guard stage is not registered",
            ));
        }
    }
    Ok(())
}

fn detect_cycles(stages: &[StageSpec], upstream: &[Vec<usize>]) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in 0..stages.len() {
        if !visited.contains(&node) {
            if let Some(cycle) = dfs_cycle(node, upstream, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(
                    cycle.into_iter().map(|i| stages[i].id.to_string()).collect(),
                ));
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    node: usize,
    upstream: &[Vec<usize>],
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for &dep in upstream.get(node).map_or(&[][..], Vec::as_slice) {
        if !visited.contains(&dep) {
            if let Some(cycle) = dfs_cycle(dep, upstream, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(&dep) {
            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(dep);
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}

fn topological_order(upstream: &[Vec<usize>], downstream: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(upstream.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &child in &downstream[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::core::{ArtifactType, StageOutput};
    use crate::pipeline::OutputSpec;
    use crate::stages::{FnStage, NoOpStage, Stage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn settings() -> PipelineSettings {
        PipelineSettings::new("test", "/tmp/gateflow-test")
    }

    fn producer(output: &str, ty: ArtifactType) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new().with_output(output, ty))
    }

    fn sink() -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new())
    }

    fn ids(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.execution_ids().into_iter().map(StageId::as_str).collect()
    }

    #[test]
    fn test_forward_reference_is_ordered_after_its_producer() {
        let stages = vec![
            StageSpec::new("consumer", sink())
                .with_input("examples", Channel::forward("producer", "examples", ArtifactType::Examples)),
            StageSpec::new("producer", producer("examples", ArtifactType::Examples)),
        ];

        let pipeline = assemble(settings(), stages).unwrap();
        assert_eq!(ids(&pipeline), vec!["producer", "consumer"]);
        assert_eq!(pipeline.upstream_of(0), &[1]);
        assert_eq!(pipeline.downstream_of(1), &[0]);
    }

    #[test]
    fn test_independent_stages_keep_registration_order() {
        let stages = vec![
            StageSpec::new("c", sink()),
            StageSpec::new("a", sink()),
            StageSpec::new("b", sink()),
        ];
        let pipeline = assemble(settings(), stages).unwrap();
        assert_eq!(ids(&pipeline), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_guard_orders_like_a_channel() {
        let stages = vec![
            StageSpec::new("transform", sink()).with_guard("validator"),
            StageSpec::new("validator", sink()),
        ];
        let pipeline = assemble(settings(), stages).unwrap();
        assert_eq!(ids(&pipeline), vec!["validator", "transform"]);
    }

    #[test]
    fn test_missing_producer_is_dangling() {
        let stages = vec![StageSpec::new("evaluator", sink())
            .with_input("model", Channel::new("trainer", "model", ArtifactType::Model))];

        let err = assemble(settings(), stages).unwrap_err();
        let AssemblyError::DanglingChannel(err) = err else {
            panic!("expected a dangling channel");
        };
        assert_eq!(err.consumer, "evaluator");
        assert_eq!(err.producer, "trainer");
    }

    #[test]
    fn test_undeclared_output_and_wrong_type_are_dangling() {
        let undeclared = vec![
            StageSpec::new("trainer", producer("model", ArtifactType::Model)),
            StageSpec::new("evaluator", sink())
                .with_input("model", Channel::new("trainer", "weights", ArtifactType::Model)),
        ];
        assert!(matches!(
            assemble(settings(), undeclared),
            Err(AssemblyError::DanglingChannel(_))
        ));

        let wrong_type = vec![
            StageSpec::new("trainer", producer("model", ArtifactType::Model)),
            StageSpec::new("evaluator", sink())
                .with_input("model", Channel::new("trainer", "model", ArtifactType::Schema)),
        ];
        let err = assemble(settings(), wrong_type).unwrap_err();
        assert!(err.to_string().contains("channel expects Schema"));
    }

    #[test]
    fn test_optional_output_requires_a_resolver_channel() {
        let resolver: Arc<dyn Stage> = Arc::new(
            FnStage::new("Resolver", |_| Ok(StageOutput::empty()))
                .with_output("model", OutputSpec::optional(ArtifactType::Model)),
        );
        let plain = vec![
            StageSpec::new("resolver", Arc::clone(&resolver)),
            StageSpec::new("evaluator", sink())
                .with_input("baseline", Channel::new("resolver", "model", ArtifactType::Model)),
        ];
        assert!(matches!(
            assemble(settings(), plain),
            Err(AssemblyError::DanglingChannel(_))
        ));

        let selected = vec![
            StageSpec::new("resolver", resolver),
            StageSpec::new("evaluator", sink()).with_input(
                "baseline",
                Channel::new("resolver", "model", ArtifactType::Model).with_selector("latest_blessed_model"),
            ),
        ];
        assert!(assemble(settings(), selected).is_ok());
    }

    #[test]
    fn test_unknown_guard_is_dangling() {
        let stages = vec![StageSpec::new("transform", sink()).with_guard("validator")];
        let err = assemble(settings(), stages).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CONTRACT-004-DANGLING"));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let stages = vec![StageSpec::new("a", sink()), StageSpec::new("a", sink())];
        let err = assemble(settings(), stages).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CONTRACT-004-DUPLICATE"));
    }

    #[test]
    fn test_cycle_reports_its_path() {
        let stages = vec![
            StageSpec::new("a", producer("out", ArtifactType::Examples))
                .with_input("in", Channel::new("b", "out", ArtifactType::Examples)),
            StageSpec::new("b", producer("out", ArtifactType::Examples))
                .with_input("in", Channel::new("a", "out", ArtifactType::Examples)),
        ];

        let err = assemble(settings(), stages).unwrap_err();
        let AssemblyError::CycleDetected(err) = err else {
            panic!("expected a cycle");
        };
        assert_eq!(err.cycle_path, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let stages = vec![StageSpec::new("a", producer("out", ArtifactType::Examples))
            .with_input("in", Channel::new("a", "out", ArtifactType::Examples))];
        assert!(matches!(
            assemble(settings(), stages),
            Err(AssemblyError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_empty_pipeline_and_empty_name_are_rejected() {
        let err = assemble(settings(), Vec::new()).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CONTRACT-004-EMPTY"));

        let err = assemble(PipelineSettings::new(" ", "/tmp"), vec![StageSpec::new("a", sink())]).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CONTRACT-004-INVALID_NAME"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let build = || {
            vec![
                StageSpec::new("gen", producer("examples", ArtifactType::Examples)),
                StageSpec::new("resolver", sink()),
                StageSpec::new("stats", producer("statistics", ArtifactType::Statistics))
                    .with_input("examples", Channel::new("gen", "examples", ArtifactType::Examples)),
                StageSpec::new("eval", sink())
                    .with_input("examples", Channel::new("gen", "examples", ArtifactType::Examples))
                    .with_input("stats", Channel::new("stats", "statistics", ArtifactType::Statistics)),
            ]
        };
        let first = assemble(settings(), build()).unwrap();
        let second = assemble(settings(), build()).unwrap();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec!["gen", "resolver", "stats", "eval"]);
    }
}
