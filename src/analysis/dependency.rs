//! Package dependency graph and import cycle detection

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::core::model::ParseResult;

/// Internal import between two project packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    /// Number of files in `from` importing `to`
    pub weight: usize,
    pub in_cycle: bool,
}

/// Closed import path, stored without repeating the first package.
///
/// Rotated so the lexicographically smallest package comes first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cycle {
    pub packages: Vec<String>,
}

impl Cycle {
    fn canonical(mut packages: Vec<String>) -> Self {
        if let Some(start) = packages
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
        {
            packages.rotate_left(start);
        }
        Self { packages }
    }

    /// Number of import edges in the cycle
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// `from -> to` pairs along the cycle, closing back to the start
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        let n = self.packages.len();
        (0..n).map(move |i| {
            (
                self.packages[i].as_str(),
                self.packages[(i + 1) % n].as_str(),
            )
        })
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for package in &self.packages {
            write!(f, "{} -> ", package)?;
        }
        match self.packages.first() {
            Some(first) => write!(f, "{}", first),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct EdgeData {
    weight: usize,
    in_cycle: bool,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, EdgeData>,
    index: HashMap<String, NodeIndex>,
    /// package -> external import path -> importing file count
    external: BTreeMap<String, BTreeMap<String, usize>>,
}

impl DependencyGraph {
    pub fn build(parse: &ParseResult) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for package in &parse.packages {
            let node = graph.add_node(package.import_path.clone());
            index.insert(package.import_path.clone(), node);
        }

        let mut internal: BTreeMap<(String, String), usize> = BTreeMap::new();
        let mut external: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for package in &parse.packages {
            for file in &package.files {
                let distinct: BTreeSet<&str> = file.imports.iter().map(|i| i.path.as_str()).collect();
                for path in distinct {
                    if path == package.import_path {
                        continue;
                    }
                    if index.contains_key(path) {
                        *internal
                            .entry((package.import_path.clone(), path.to_string()))
                            .or_default() += 1;
                    } else {
                        *external
                            .entry(package.import_path.clone())
                            .or_default()
                            .entry(path.to_string())
                            .or_default() += 1;
                    }
                }
            }
        }

        for ((from, to), weight) in internal {
            graph.add_edge(
                index[&from],
                index[&to],
                EdgeData {
                    weight,
                    in_cycle: false,
                },
            );
        }

        Self {
            graph,
            index,
            external,
        }
    }

    pub fn package_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Internal edges sorted by (from, to)
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| DependencyEdge {
                from: self.graph[e.source()].clone(),
                to: self.graph[e.target()].clone(),
                weight: e.weight().weight,
                in_cycle: e.weight().in_cycle,
            })
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        edges
    }

    /// Every external import path across the project
    pub fn all_external_imports(&self) -> BTreeSet<&str> {
        self.external
            .values()
            .flat_map(|m| m.keys().map(|k| k.as_str()))
            .collect()
    }

    /// Depth-first search with a recursion stack; every edge back onto the
    /// stack closes a cycle. Results are canonicalized and deduplicated.
    pub fn find_cycles(&self) -> Vec<Cycle> {
        let mut order: Vec<NodeIndex> = self.graph.node_indices().collect();
        order.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut stack = Vec::new();
        let mut found = BTreeSet::new();

        for node in order {
            if !visited.contains(&node) {
                self.visit(node, &mut visited, &mut on_stack, &mut stack, &mut found);
            }
        }

        found.into_iter().collect()
    }

    fn visit(
        &self,
        node: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        on_stack: &mut HashSet<NodeIndex>,
        stack: &mut Vec<NodeIndex>,
        found: &mut BTreeSet<Cycle>,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        stack.push(node);

        let mut next: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for target in next {
            if on_stack.contains(&target) {
                if let Some(pos) = stack.iter().position(|n| *n == target) {
                    let members = stack[pos..].iter().map(|n| self.graph[*n].clone()).collect();
                    found.insert(Cycle::canonical(members));
                }
            } else if !visited.contains(&target) {
                self.visit(target, visited, on_stack, stack, found);
            }
        }

        stack.pop();
        on_stack.remove(&node);
    }

    /// Flag every edge that lies on one of `cycles`
    pub fn mark_cycles(&mut self, cycles: &[Cycle]) {
        for cycle in cycles {
            for (from, to) in cycle.edges() {
                let (Some(a), Some(b)) = (self.index.get(from), self.index.get(to)) else {
                    continue;
                };
                if let Some(edge) = self.graph.find_edge(*a, *b) {
                    self.graph[edge].in_cycle = true;
                }
            }
        }
    }
}
