//! In-memory adjacency used by the `out` body op.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Directed edges as `[from, to]` pairs, in file order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GraphSpec {
    pub edges: Vec<(String, String)>,
}

/// Outgoing adjacency lists. Neighbour order follows edge order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    adjacency: BTreeMap<String, Vec<String>>,
}

impl Graph {
    pub fn from_spec(spec: &GraphSpec) -> Self {
        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in &spec.edges {
            adjacency.entry(from.clone()).or_default().push(to.clone());
        }
        Self { adjacency }
    }

    /// Outgoing neighbours of `vertex`; empty for unknown vertices.
    pub fn out(&self, vertex: &str) -> &[String] {
        self.adjacency
            .get(vertex)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
