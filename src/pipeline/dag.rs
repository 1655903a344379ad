// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! DAG (Directed Acyclic Graph) builder for compiled stages
//!
//! Stages are connected by data: an edge runs from the stage producing a
//! path to every stage depending on it. A dependency on a directory
//! matches outputs below it, and an output directory matches dependencies
//! below it.

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};

use crate::errors::{LabflowError, LabflowResult};
use crate::graph::StageGraph;

/// Builder for stage dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<String, ()>,
    name_to_index: IndexMap<String, NodeIndex>,
    /// Stage instances per name, from the matrix size
    instances: HashMap<String, usize>,
}

impl DagBuilder {
    /// Create an empty DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: IndexMap::new(),
            instances: HashMap::new(),
        }
    }

    /// Build a DAG from a compiled stage graph
    pub fn build(stages: &StageGraph) -> LabflowResult<Self> {
        let mut builder = Self::new();

        let mut outputs = Vec::with_capacity(stages.stages.len());
        for (name, entry) in &stages.stages {
            let node = builder.graph.add_node(name.clone());
            builder.name_to_index.insert(name.clone(), node);
            if let Some(matrix) = entry.matrix() {
                builder.instances.insert(name.clone(), matrix.len());
            }
            outputs.push((node, entry.output_paths()));
        }

        for (name, entry) in &stages.stages {
            let consumer = builder.name_to_index[name];
            for dep in entry.dependency_paths() {
                for (producer, outs) in &outputs {
                    if *producer == consumer || builder.graph.contains_edge(*producer, consumer) {
                        continue;
                    }
                    if outs.iter().any(|out| paths_overlap(&dep, out)) {
                        builder.graph.add_edge(*producer, consumer, ());
                    }
                }
            }
        }

        builder.topological_order()?;
        Ok(builder)
    }

    /// Stage names in an order that respects every dependency
    pub fn topological_order(&self) -> LabflowResult<Vec<String>> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n].clone()).collect())
            .map_err(|cycle| LabflowError::CircularDependency {
                stages: self.cycle_through(cycle.node_id()),
            })
    }

    /// Shortest cycle through `start`, as `start -> ... -> start`
    fn cycle_through(&self, start: NodeIndex) -> Vec<String> {
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors(node) {
                if next == start {
                    let mut back = Vec::new();
                    let mut current = node;
                    while current != start {
                        back.push(self.graph[current].clone());
                        current = parent[&current];
                    }
                    let mut path = vec![self.graph[start].clone()];
                    path.extend(back.into_iter().rev());
                    path.push(self.graph[start].clone());
                    return path;
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        vec![self.graph[start].clone()]
    }

    /// Stages that must run before `stage_name`
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect();
        self.sort_by_declaration(&mut deps);
        Some(deps)
    }

    /// Stages that consume outputs of `stage_name`
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        self.sort_by_declaration(&mut deps);
        Some(deps)
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };

        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    fn sort_by_declaration(&self, names: &mut [String]) {
        names.sort_by_key(|n| self.name_to_index.get_index_of(n));
    }

    fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .collect();
        edges.sort();
        edges
            .into_iter()
            .map(|(from, to)| (self.graph[from].as_str(), self.graph[to].as_str()))
            .collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (name, node) in &self.name_to_index {
            out.push_str(&format!("    s{}[\"{}\"]\n", node.index(), name));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!("    s{} --> s{}\n", from.index(), to.index()));
            }
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        // Isolated nodes
        for (name, node) in &self.name_to_index {
            if self.graph.neighbors_undirected(*node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self) -> LabflowResult<String> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, name) in order.iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, name));

            if let Some(count) = self.instances.get(name) {
                out.push_str(&format!(" (x{})", count));
            }

            let deps = self.dependencies(name).unwrap_or_default();
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a dependency path and an output path refer to overlapping files
fn paths_overlap(dep: &str, out: &str) -> bool {
    let dep = dep.trim_end_matches('/');
    let out = out.trim_end_matches('/');
    if dep == out {
        return true;
    }
    let below = |inner: &str, outer: &str| {
        inner.len() > outer.len()
            && inner.starts_with(outer)
            && inner.as_bytes()[outer.len()] == b'/'
    };
    below(dep, out) || below(out, dep)
}
