//! Package dependency graph for diagnostics.
//!
//! Built from the first-party edges of a [`WorkspaceState`]. Used for `kis
//! tree`, `kis graph` and the dependency cycle warning.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::dependency::{DependencyKind, EnabledScopes};
use crate::core::workspace::WorkspaceState;

/// Directed graph of first-party packages; an edge `a -> b` means `a` depends on `b`.
#[derive(Debug, Clone, Default)]
pub struct PackageGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl PackageGraph {
    pub fn new() -> Self {
        PackageGraph::default()
    }

    /// Graph of the scope-enabled first-party edges in `state`.
    pub fn from_state(state: &WorkspaceState, scopes: &EnabledScopes) -> Self {
        let mut graph = PackageGraph::new();
        for pkg in state.packages() {
            graph.add_node(pkg.name());
        }
        for edge in state.edges() {
            if edge.kind == DependencyKind::FirstParty && scopes.matches(&edge.scope) {
                graph.add_edge(&edge.consumer, &edge.dependency);
            }
        }
        graph
    }

    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies, sorted.
    pub fn deps(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Direct dependents, sorted.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<&str> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Packages with no dependents, sorted.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Dependencies before dependents, or `None` when the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        let mut order: Vec<&str> = toposort(&self.graph, None)
            .ok()?
            .into_iter()
            .map(|n| self.graph[n].as_str())
            .collect();
        order.reverse();
        Some(order)
    }

    /// Every dependency cycle, each as a sorted list of package names.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| {
                let mut names: Vec<String> = scc.iter().map(|&n| self.graph[n].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Render an indented tree rooted at `root`. Repeated subtrees are marked `(*)`.
    pub fn render_tree(&self, root: &str) -> String {
        let mut out = String::new();
        let mut seen = BTreeSet::new();
        let mut path = Vec::new();
        self.render_node(root, "", true, true, &mut seen, &mut path, &mut out);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn render_node<'a>(
        &'a self,
        name: &'a str,
        prefix: &str,
        last: bool,
        is_root: bool,
        seen: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
        out: &mut String,
    ) {
        let branch = if is_root {
            ""
        } else if last {
            "└── "
        } else {
            "├── "
        };

        if path.contains(&name) {
            let _ = writeln!(out, "{}{}{} (cycle)", prefix, branch, name);
            return;
        }
        if !is_root && !seen.insert(name) {
            let deps = self.deps(name);
            let marker = if deps.is_empty() { "" } else { " (*)" };
            let _ = writeln!(out, "{}{}{}{}", prefix, branch, name, marker);
            return;
        }
        let _ = writeln!(out, "{}{}{}", prefix, branch, name);

        let child_prefix = if is_root {
            String::new()
        } else if last {
            format!("{}    ", prefix)
        } else {
            format!("{}│   ", prefix)
        };

        path.push(name);
        let deps = self.deps(name);
        let count = deps.len();
        for (i, dep) in deps.into_iter().enumerate() {
            self.render_node(dep, &child_prefix, i + 1 == count, false, seen, path, out);
        }
        path.pop();
    }

    /// Graphviz DOT rendering with sorted nodes and edges.
    pub fn to_dot(&self) -> String {
        let mut names: Vec<&str> = self.graph.node_weights().map(String::as_str).collect();
        names.sort_unstable();

        let mut out = String::from("digraph kis {\n    rankdir=LR;\n    node [shape=box];\n");
        for name in &names {
            let _ = writeln!(out, "    \"{}\";", name);
        }
        for name in &names {
            for dep in self.deps(name) {
                let _ = writeln!(out, "    \"{}\" -> \"{}\";", name, dep);
            }
        }
        out.push_str("}\n");
        out
    }
}
