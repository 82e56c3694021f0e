//! In-memory state multigraph.
//!
//! Append-only bookkeeping of every scene seen and every transition
//! observed. The search never reads decisions back from it; it exists for
//! deduplication of scene discovery and for audit.

use std::collections::BTreeMap;

use crate::transition::Transition;

/// A scene as recorded in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub fingerprint: String,
    /// Number of actions available when the scene was first seen
    pub total_action_num: usize,
}

/// A transition edge tagged with the search level it was observed at
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub transition: Transition,
    pub level: u32,
}

/// Directed multigraph keyed by fingerprint
#[derive(Debug, Default)]
pub struct StateGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scene; returns `false` if it was already known
    pub fn add_node(&mut self, fingerprint: &str, total_action_num: usize) -> bool {
        if self.nodes.contains_key(fingerprint) {
            return false;
        }
        self.nodes.insert(
            fingerprint.to_string(),
            GraphNode {
                fingerprint: fingerprint.to_string(),
                total_action_num,
            },
        );
        true
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.nodes.contains_key(fingerprint)
    }

    pub fn node(&self, fingerprint: &str) -> Option<&GraphNode> {
        self.nodes.get(fingerprint)
    }

    /// Append an edge; parallel edges are kept
    pub fn add_edge(&mut self, transition: Transition, level: u32) {
        self.edges.push(GraphEdge { transition, level });
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Edges leaving `fingerprint`, in insertion order
    pub fn outgoing<'a>(&'a self, fingerprint: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.transition.source == fingerprint)
    }
}
