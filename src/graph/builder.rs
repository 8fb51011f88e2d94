//! Graph builder - resolves a pipeline into a DAG

use crate::core::{
    error::BuildError,
    pipeline::{Binding, Pipeline},
    registry::StepRegistry,
    settings::Settings,
    step::types_compatible,
};
use crate::graph::dag::{Dag, Edge, InputRef, Node};
use crate::store::TypedValue;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Builds DAGs against a step registry
pub struct GraphBuilder<'a> {
    registry: &'a StepRegistry,
}

/// Build `pipeline` with `parameters` against `registry`
pub fn build(
    pipeline: &Pipeline,
    registry: &StepRegistry,
    parameters: &BTreeMap<String, Value>,
) -> Result<Dag, BuildError> {
    GraphBuilder::new(registry).build(pipeline, parameters)
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a StepRegistry) -> Self {
        Self { registry }
    }

    pub fn build(
        &self,
        pipeline: &Pipeline,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Dag, BuildError> {
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (i, invocation) in pipeline.invocations.iter().enumerate() {
            if index_of.insert(invocation.id.as_str(), i).is_some() {
                return Err(BuildError::DuplicateInvocation(invocation.id.clone()));
            }
        }

        for name in parameters.keys() {
            if pipeline.parameter(name).is_none() {
                return Err(BuildError::UnknownParameter(name.clone()));
            }
        }

        // Supplied values win over declared defaults
        let resolved_params: BTreeMap<String, Value> = pipeline
            .parameters
            .iter()
            .filter_map(|spec| {
                parameters
                    .get(&spec.name)
                    .or(spec.default.as_ref())
                    .map(|v| (spec.name.clone(), v.clone()))
            })
            .collect();

        if let Some(path) = find_cycle(pipeline, &index_of) {
            return Err(BuildError::Cycle { path });
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(pipeline.invocations.len());
        let mut edges = Vec::new();

        for (index, invocation) in pipeline.invocations.iter().enumerate() {
            let step = self
                .registry
                .get(&invocation.step)
                .ok_or_else(|| BuildError::UnknownStep {
                    invocation: invocation.id.clone(),
                    step: invocation.step.clone(),
                })?
                .clone();

            let unresolved = |input: &str, reason: String| BuildError::UnresolvedBinding {
                invocation: invocation.id.clone(),
                input: input.to_string(),
                reason,
            };

            for name in invocation.bindings.keys() {
                if step.input(name).is_none() {
                    return Err(unresolved(
                        name,
                        format!("step '{}' declares no such input", step.name),
                    ));
                }
            }

            let mut inputs = BTreeMap::new();
            let mut upstream = BTreeSet::new();

            for spec in &step.inputs {
                let input_ref = match invocation.bindings.get(&spec.name) {
                    Some(Binding::Literal(value)) => {
                        InputRef::Literal(TypedValue::new(spec.ty.clone(), value.clone()))
                    }
                    Some(Binding::Parameter(param)) => {
                        let declared = pipeline.parameter(param).ok_or_else(|| {
                            unresolved(&spec.name, format!("pipeline declares no parameter '{}'", param))
                        })?;
                        if !types_compatible(&declared.ty, &spec.ty) {
                            return Err(BuildError::TypeMismatch {
                                invocation: invocation.id.clone(),
                                input: spec.name.clone(),
                                expected: spec.ty.clone(),
                                found: declared.ty.clone(),
                            });
                        }
                        let value = resolved_params.get(param).ok_or_else(|| {
                            unresolved(
                                &spec.name,
                                format!("parameter '{}' was not supplied and has no default", param),
                            )
                        })?;
                        InputRef::Literal(TypedValue::new(spec.ty.clone(), value.clone()))
                    }
                    Some(Binding::Output {
                        invocation: producer_id,
                        output,
                    }) => {
                        let producer = match index_of.get(producer_id.as_str()) {
                            Some(&p) if p < index => p,
                            Some(_) => {
                                return Err(unresolved(
                                    &spec.name,
                                    format!("forward reference to '{}'", producer_id),
                                ))
                            }
                            None => {
                                return Err(unresolved(
                                    &spec.name,
                                    format!("no invocation named '{}'", producer_id),
                                ))
                            }
                        };
                        let producer_step = &nodes[producer].step;
                        let out = producer_step.output(output).ok_or_else(|| {
                            unresolved(
                                &spec.name,
                                format!("'{}' has no output '{}'", producer_id, output),
                            )
                        })?;
                        if !types_compatible(&out.ty, &spec.ty) {
                            return Err(BuildError::TypeMismatch {
                                invocation: invocation.id.clone(),
                                input: spec.name.clone(),
                                expected: spec.ty.clone(),
                                found: out.ty.clone(),
                            });
                        }
                        upstream.insert(producer);
                        edges.push(Edge {
                            from: producer,
                            output: output.clone(),
                            to: index,
                            input: spec.name.clone(),
                        });
                        InputRef::Upstream {
                            node: producer,
                            output: output.clone(),
                        }
                    }
                    None => match &spec.default {
                        Some(default) => {
                            InputRef::Literal(TypedValue::new(spec.ty.clone(), default.clone()))
                        }
                        None => {
                            return Err(unresolved(
                                &spec.name,
                                "no binding and no default".to_string(),
                            ))
                        }
                    },
                };
                inputs.insert(spec.name.clone(), input_ref);
            }

            let settings = Settings::merge(&step.settings, &pipeline.settings);
            settings
                .validate()
                .map_err(|reason| BuildError::InvalidSettings {
                    invocation: invocation.id.clone(),
                    reason,
                })?;

            nodes.push(Node {
                id: invocation.id.clone(),
                index,
                step,
                inputs,
                settings,
                upstream: upstream.into_iter().collect(),
                downstream: Vec::new(),
            });
        }

        for edge in &edges {
            let downstream = &mut nodes[edge.from].downstream;
            if !downstream.contains(&edge.to) {
                downstream.push(edge.to);
            }
        }
        for node in &mut nodes {
            node.downstream.sort_unstable();
        }

        debug!(
            "Built DAG for {}: {} nodes, {} edges",
            pipeline.name,
            nodes.len(),
            edges.len()
        );

        Ok(Dag {
            pipeline: pipeline.name.clone(),
            parameters: resolved_params,
            enable_cache: pipeline.enable_cache,
            nodes,
            edges,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Look for a cycle among output references, ignoring declaration order
fn find_cycle(pipeline: &Pipeline, index_of: &HashMap<&str, usize>) -> Option<Vec<String>> {
    let deps: Vec<Vec<usize>> = pipeline
        .invocations
        .iter()
        .map(|inv| {
            inv.bindings
                .values()
                .filter_map(|b| match b {
                    Binding::Output { invocation, .. } => index_of.get(invocation.as_str()).copied(),
                    _ => None,
                })
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; deps.len()];
    let mut stack = Vec::new();

    for start in 0..deps.len() {
        if let Some(cycle) = dfs_check(start, &deps, &mut marks, &mut stack) {
            return Some(
                cycle
                    .into_iter()
                    .map(|i| pipeline.invocations[i].id.clone())
                    .collect(),
            );
        }
    }
    None
}

fn dfs_check(
    index: usize,
    deps: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    match marks[index] {
        Mark::Done => return None,
        Mark::InProgress => {
            let start = stack.iter().position(|&s| s == index)?;
            let mut cycle = stack[start..].to_vec();
            cycle.push(index);
            return Some(cycle);
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::InProgress;
    stack.push(index);
    for &dep in &deps[index] {
        if let Some(cycle) = dfs_check(dep, deps, marks, stack) {
            return Some(cycle);
        }
    }
    stack.pop();
    marks[index] = Mark::Done;
    None
}
