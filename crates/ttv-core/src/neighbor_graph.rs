//! Merged kNN relation over original-space and projection-space neighbors.
//!
//! Samples are addressed by index; edges and adjacency hold indices only.
//! Both neighbor kinds feed one adjacency map, so "is neighbor of" queries
//! don't need to know which space the relation came from.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NeighborKind {
    /// kNN in the model's high-dimensional feature space.
    OriginalSpace,
    /// kNN in the 2D projection.
    ProjectionSpace,
}

impl NeighborKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OriginalSpace => "originalSpace",
            Self::ProjectionSpace => "projectionSpace",
        }
    }
}

/// Directed neighbor relation `from -> to`. Never a self-loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeighborEdge {
    pub from: usize,
    pub to: usize,
    pub kind: NeighborKind,
}

/// Ordered pair key for O(1) edge lookup. Displays as `"from:to"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub from: usize,
    pub to: usize,
}

impl EdgeKey {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

/// How an edge changed between two consecutive epochs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Maintain,
    Connect,
    Disconnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeTransition {
    pub edge: NeighborEdge,
    pub status: EdgeStatus,
}

#[derive(Clone, Debug, Default)]
pub struct NeighborGraph {
    pub edges: Vec<NeighborEdge>,
    pub adjacency: HashMap<usize, Vec<usize>>,
    /// Last write wins when both kinds list the same ordered pair.
    pub edge_lookup: HashMap<EdgeKey, NeighborEdge>,
}

impl NeighborGraph {
    /// Build from the two per-sample neighbor lists in a single pass.
    ///
    /// Original-space neighbors are registered first, so a pair present in
    /// both lists ends up tagged `ProjectionSpace` in `edge_lookup` while
    /// both edges stay in `edges` and both targets stay in `adjacency`.
    pub fn build(original: &[Vec<usize>], projection: &[Vec<usize>]) -> Self {
        let total: usize = original.iter().chain(projection).map(Vec::len).sum();
        let mut graph = Self {
            edges: Vec::with_capacity(total),
            adjacency: HashMap::new(),
            edge_lookup: HashMap::with_capacity(total),
        };
        graph.add_lists(original, NeighborKind::OriginalSpace);
        graph.add_lists(projection, NeighborKind::ProjectionSpace);
        graph
    }

    fn add_lists(&mut self, lists: &[Vec<usize>], kind: NeighborKind) {
        for (from, list) in lists.iter().enumerate() {
            for &to in list {
                if from == to {
                    continue;
                }
                let edge = NeighborEdge { from, to, kind };
                self.edges.push(edge);
                self.edge_lookup.insert(EdgeKey::new(from, to), edge);
                self.adjacency.entry(from).or_default().push(to);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Neighbors of `id` from both kinds. Unknown ids have no neighbors.
    pub fn neighbors(&self, id: usize) -> &[usize] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_neighbor(&self, from: usize, to: usize) -> bool {
        self.edge_lookup.contains_key(&EdgeKey::new(from, to))
    }

    pub fn edge(&self, from: usize, to: usize) -> Option<&NeighborEdge> {
        self.edge_lookup.get(&EdgeKey::new(from, to))
    }

    /// Compare against the previous epoch's graph, per kind.
    ///
    /// Current edges come first (`Maintain` or `Connect`), then edges that
    /// only existed before (`Disconnect`).
    pub fn transitions(&self, previous: &NeighborGraph) -> Vec<EdgeTransition> {
        let before: HashSet<NeighborEdge> = previous.edges.iter().copied().collect();
        let now: HashSet<NeighborEdge> = self.edges.iter().copied().collect();
        let mut seen = HashSet::with_capacity(now.len());

        let mut out = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            if !seen.insert(*edge) {
                continue;
            }
            let status = if before.contains(edge) {
                EdgeStatus::Maintain
            } else {
                EdgeStatus::Connect
            };
            out.push(EdgeTransition { edge: *edge, status });
        }
        for edge in &previous.edges {
            if !now.contains(edge) && seen.insert(*edge) {
                out.push(EdgeTransition {
                    edge: *edge,
                    status: EdgeStatus::Disconnect,
                });
            }
        }
        out
    }
}
