use std::collections::{HashMap, HashSet, VecDeque};

use crate::dsl::{Graph, Node, NodeType, Stage};
use crate::error::CompileError;

/// Checks everything a compile pass assumes about the graph before touching any node:
/// edges reference existing nodes, no input slot is driven twice, and the graph is acyclic.
pub fn validate(graph: &Graph) -> Result<(), CompileError> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    let mut targets: HashMap<(&str, &str), &str> = HashMap::new();
    for e in &graph.edges {
        for end in [e.from.as_str(), e.to.as_str()] {
            if !ids.contains(end) {
                return Err(CompileError::DanglingEdge {
                    edge: e.id.clone(),
                    node: end.to_string(),
                });
            }
        }
        if let Some(first) = targets.insert((e.to.as_str(), e.input.as_str()), e.id.as_str()) {
            return Err(CompileError::DuplicateInput {
                node: e.to.clone(),
                input: e.input.clone(),
                first: first.to_string(),
                second: e.id.clone(),
            });
        }
    }

    topo_sort(graph)?;
    Ok(())
}

/// Kahn's algorithm over the whole graph. Nodes left with a non-zero in-degree sit on a cycle
/// (or downstream of one) and are reported.
pub fn topo_sort(graph: &Graph) -> Result<Vec<String>, CompileError> {
    let mut indeg: HashMap<&str, usize> = graph.nodes.iter().map(|n| (n.id.as_str(), 0usize)).collect();

    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in &graph.edges {
        let Some(d) = indeg.get_mut(e.to.as_str()) else {
            return Err(CompileError::DanglingEdge {
                edge: e.id.clone(),
                node: e.to.clone(),
            });
        };
        *d += 1;
        outgoing.entry(e.from.as_str()).or_default().push(e.to.as_str());
    }

    // Seed in node-list order so the result is deterministic.
    let mut q: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| indeg.get(id) == Some(&0))
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(n) = q.pop_front() {
        order.push(n.to_string());
        if let Some(nexts) = outgoing.get(n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(m);
                    }
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        let mut nodes: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| indeg.get(n.id.as_str()).is_some_and(|d| *d > 0))
            .map(|n| n.id.clone())
            .collect();
        nodes.sort();
        return Err(CompileError::Cycle { nodes });
    }
    Ok(order)
}

/// The single Output node for `stage`.
pub fn output_node(graph: &Graph, stage: Stage) -> Result<&Node, CompileError> {
    let mut found: Option<&Node> = None;
    for n in &graph.nodes {
        if n.node_type != NodeType::Output || n.stage != Some(stage) {
            continue;
        }
        if let Some(first) = found {
            return Err(CompileError::DuplicateOutputNode {
                stage,
                first: first.id.clone(),
                second: n.id.clone(),
            });
        }
        found = Some(n);
    }
    found.ok_or(CompileError::NoOutputNode(stage))
}
