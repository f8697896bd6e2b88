//! Forward/reverse call graph over stable integer ids (spec §4.7, §9).
//!
//! A `petgraph::DiGraph` over function keys, with unresolved bare-name call
//! targets kept as their own node kind so the propagator can expand them
//! later without inventing a resolution the extractor didn't make.

use std::collections::HashMap;

use exctrace_core::identity::FunctionKey;
use exctrace_core::model::{ProgramModel, ResolutionKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Key(FunctionKey),
    /// A call whose target extraction could not resolve to a key; kept by
    /// its bare name so propagation can expand it against `name_to_keys`.
    Name(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeData {
    pub resolution_kind: ResolutionKind,
    pub is_method_call: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeRef {
    Key(FunctionKey),
    Name(String),
}

pub struct CallGraph {
    graph: DiGraph<NodeKind, EdgeData>,
    node_of_key: HashMap<FunctionKey, NodeIndex>,
    node_of_name: HashMap<String, NodeIndex>,
}

impl CallGraph {
    /// Build the graph from every [`CallSite`] in `model`. Known keys get
    /// stable ids first (sorted order), in the order `model.known_keys`
    /// yields them once sorted — unresolved-name nodes are appended as
    /// encountered while walking call sites in their already-deterministic
    /// (file, line) order.
    pub fn build(model: &ProgramModel) -> CallGraph {
        let mut graph = DiGraph::new();
        let mut node_of_key = HashMap::new();
        let node_of_name = HashMap::new();

        let mut sorted_keys: Vec<&FunctionKey> = model.known_keys.iter().collect();
        sorted_keys.sort();
        for key in sorted_keys {
            let idx = graph.add_node(NodeKind::Key(key.clone()));
            node_of_key.insert(key.clone(), idx);
        }

        let mut cg = CallGraph {
            graph,
            node_of_key,
            node_of_name,
        };

        for call in model.calls() {
            let caller_idx = cg.ensure_key_node(&call.caller);
            let callee_idx = match &call.callee_key {
                Some(key) => cg.ensure_key_node(key),
                None => cg.ensure_name_node(&call.callee_bare_name),
            };
            cg.graph.add_edge(
                caller_idx,
                callee_idx,
                EdgeData {
                    resolution_kind: call.resolution_kind,
                    is_method_call: call.is_method_call,
                },
            );
        }

        cg
    }

    fn ensure_key_node(&mut self, key: &FunctionKey) -> NodeIndex {
        if let Some(idx) = self.node_of_key.get(key) {
            return *idx;
        }
        let idx = self.graph.add_node(NodeKind::Key(key.clone()));
        self.node_of_key.insert(key.clone(), idx);
        idx
    }

    fn ensure_name_node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.node_of_name.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(NodeKind::Name(name.to_string()));
        self.node_of_name.insert(name.to_string(), idx);
        idx
    }

    /// Outgoing edges from `key`: the callee reference and the resolution
    /// kind recorded at extraction time.
    pub fn forward_edges(&self, key: &FunctionKey) -> Vec<(CalleeRef, EdgeData)> {
        let Some(&idx) = self.node_of_key.get(key) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| {
                let target = match &self.graph[edge.target()] {
                    NodeKind::Key(k) => CalleeRef::Key(k.clone()),
                    NodeKind::Name(n) => CalleeRef::Name(n.clone()),
                };
                (target, *edge.weight())
            })
            .collect()
    }

    /// Callers with an edge that resolved directly to `key`.
    pub fn callers_of_key(&self, key: &FunctionKey) -> Vec<(FunctionKey, EdgeData)> {
        let Some(&idx) = self.node_of_key.get(key) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|edge| match &self.graph[edge.source()] {
                NodeKind::Key(caller) => Some((caller.clone(), *edge.weight())),
                NodeKind::Name(_) => None,
            })
            .collect()
    }

    /// Callers whose call site named `simple_name` but did not resolve to
    /// any key (used by `find_callers`'s name-fallback pass).
    pub fn callers_of_unresolved_name(&self, simple_name: &str) -> Vec<(FunctionKey, EdgeData)> {
        let Some(&idx) = self.node_of_name.get(simple_name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|edge| match &self.graph[edge.source()] {
                NodeKind::Key(caller) => Some((caller.clone(), *edge.weight())),
                NodeKind::Name(_) => None,
            })
            .collect()
    }

    pub fn known_key_count(&self) -> usize {
        self.node_of_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::build_model;
    use exctrace_core::config::Config;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolved_call_yields_forward_and_reverse_edge() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from a import f\ndef g():\n    f()\n",
        )
        .unwrap();
        let model = build_model(dir.path(), &Config::default(), None, &[]).unwrap();
        let graph = CallGraph::build(&model);

        let g_key = FunctionKey::new("b.py", "g");
        let f_key = FunctionKey::new("a.py", "f");

        let forward = graph.forward_edges(&g_key);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].0, CalleeRef::Key(f_key.clone()));

        let callers = graph.callers_of_key(&f_key);
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].0, g_key);
    }

    #[test]
    fn unresolved_call_is_tracked_by_bare_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def do():\n    mystery()\n").unwrap();
        let model = build_model(dir.path(), &Config::default(), None, &[]).unwrap();
        let graph = CallGraph::build(&model);

        let forward = graph.forward_edges(&FunctionKey::new("a.py", "do"));
        assert_eq!(forward[0].0, CalleeRef::Name("mystery".to_string()));

        let callers = graph.callers_of_unresolved_name("mystery");
        assert_eq!(callers.len(), 1);
    }
}
