//! DAG of step invocations for one run

use crate::core::{settings::Settings, step::StepDefinition};
use crate::store::TypedValue;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// A resolved node input
#[derive(Debug, Clone, PartialEq)]
pub enum InputRef {
    /// Literal, parameter or default value, typed by the consuming input
    Literal(TypedValue),
    /// Output of another node in the same run
    Upstream { node: usize, output: String },
}

/// One step invocation within a run
#[derive(Debug, Clone)]
pub struct Node {
    /// Invocation id
    pub id: String,

    /// Position in declaration order
    pub index: usize,

    pub step: Arc<StepDefinition>,

    /// Input name -> resolved reference
    pub inputs: BTreeMap<String, InputRef>,

    /// Step settings overridden by pipeline settings
    pub settings: Settings,

    /// Distinct producer nodes, ascending
    pub upstream: Vec<usize>,

    /// Distinct consumer nodes, ascending
    pub downstream: Vec<usize>,
}

/// A data dependency: `from.output` feeds `to.input`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: usize,
    pub output: String,
    pub to: usize,
    pub input: String,
}

/// Directed acyclic graph produced by the graph builder
#[derive(Debug, Clone)]
pub struct Dag {
    pub pipeline: String,

    /// Resolved pipeline parameters (supplied values plus defaults)
    pub parameters: BTreeMap<String, Value>,

    /// Pipeline-level cache switch
    pub enable_cache: bool,

    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
}

impl Dag {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_at(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no upstream dependency, in declaration order
    pub fn sources(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.upstream.is_empty())
            .map(|n| n.index)
            .collect()
    }

    /// Every node that transitively consumes `index`, ascending
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(index) {
            queue.extend(node.downstream.iter().copied());
        }
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                if let Some(node) = self.nodes.get(next) {
                    queue.extend(node.downstream.iter().copied());
                }
            }
        }
        let mut result: Vec<usize> = seen.into_iter().collect();
        result.sort_unstable();
        result
    }

    /// Node ids in a dependency-respecting order.
    ///
    /// Deterministic: roots are visited in declaration order.
    pub fn topological_order(&self) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for node in &self.nodes {
            self.visit(node.index, &mut visited, &mut result);
        }

        result
    }

    fn visit(&self, index: usize, visited: &mut HashSet<usize>, result: &mut Vec<String>) {
        if !visited.insert(index) {
            return;
        }
        if let Some(node) = self.nodes.get(index) {
            for &dep in &node.upstream {
                self.visit(dep, visited, result);
            }
            result.push(node.id.clone());
        }
    }
}
