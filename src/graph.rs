//! Static decode graph: a weighted automaton over transition ids (input
//! labels) and word ids (output labels).
//!
//! The graph is loaded read-only and shared by reference across sessions;
//! the search never mutates it.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A single weighted arc. `ilabel` 0 is epsilon (consumes no frame);
/// `olabel` 0 emits no word.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphArc {
    pub ilabel: u32,
    pub olabel: u32,
    pub weight: f32,
    pub nextstate: u32,
}

/// Static decode automaton.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecodeGraph {
    start: u32,
    /// Outgoing arcs per state.
    arcs: Vec<Vec<GraphArc>>,
    /// Final cost per state; `None` marks a non-final state.
    finals: Vec<Option<f32>>,
}

impl DecodeGraph {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let graph: DecodeGraph = serde_json::from_str(&contents)?;
        Ok(graph)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn num_states(&self) -> usize {
        self.arcs.len()
    }

    pub fn arcs(&self, state: u32) -> &[GraphArc] {
        &self.arcs[state as usize]
    }

    pub fn final_cost(&self, state: u32) -> Option<f32> {
        self.finals.get(state as usize).copied().flatten()
    }
}

/// Incremental graph construction, used by model tooling and tests.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    start: u32,
    arcs: Vec<Vec<GraphArc>>,
    finals: Vec<Option<f32>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self) -> u32 {
        self.arcs.push(Vec::new());
        self.finals.push(None);
        (self.arcs.len() - 1) as u32
    }

    pub fn set_start(&mut self, state: u32) {
        self.start = state;
    }

    pub fn set_final(&mut self, state: u32, cost: f32) {
        self.finals[state as usize] = Some(cost);
    }

    pub fn add_arc(&mut self, from: u32, ilabel: u32, olabel: u32, weight: f32, to: u32) {
        self.arcs[from as usize].push(GraphArc {
            ilabel,
            olabel,
            weight,
            nextstate: to,
        });
    }

    pub fn build(self) -> DecodeGraph {
        DecodeGraph {
            start: self.start,
            arcs: self.arcs,
            finals: self.finals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn two_state_graph() -> DecodeGraph {
        let mut b = GraphBuilder::new();
        let s0 = b.add_state();
        let s1 = b.add_state();
        b.set_start(s0);
        b.add_arc(s0, 1, 5, 0.5, s1);
        b.set_final(s1, 0.0);
        b.build()
    }

    #[test]
    fn test_builder_roundtrip() {
        let graph = two_state_graph();
        assert_eq!(graph.num_states(), 2);
        assert_eq!(graph.start(), 0);
        assert_eq!(graph.arcs(0).len(), 1);
        assert_eq!(graph.arcs(0)[0].olabel, 5);
        assert_eq!(graph.final_cost(1), Some(0.0));
        assert_eq!(graph.final_cost(0), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let graph = two_state_graph();
        let json = serde_json::to_string(&graph).unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = DecodeGraph::load(file.path()).unwrap();
        assert_eq!(loaded.num_states(), graph.num_states());
        assert_eq!(loaded.arcs(0), graph.arcs(0));
        assert_eq!(loaded.final_cost(1), Some(0.0));
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(DecodeGraph::load(Path::new("/nonexistent/graph.json")).is_err());
    }
}
