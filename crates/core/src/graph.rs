//! Graph assembly, reverse closure and export view.
//!
//! The assembled graph maps every artifact path to the paths it depends on
//! (`to`) and the paths depending on it (`from`). The closure of a root walks
//! `from` edges, so it collects everything that transitively depends on the
//! root. `BTreeSet`/`BTreeMap` keep every projection independent of the order
//! in which hints were produced.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::ElfArtifact;
use crate::resolver::{pick_preferred, sorted_candidates, Provenance, RawDependencies};

/// Nodes whose path contains this are never expanded nor retained by a closure.
pub const LIBC: &str = "libc.so";

/// Export view: depended-upon path to the paths that depend on it.
pub type ExportView = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Adjacency {
    pub to: BTreeSet<String>,
    pub from: BTreeSet<String>,
}

/// One resolved edge, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Adjacency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match every raw hint against the ELF catalog and build the symmetric graph.
    ///
    /// Hints matching no catalog path are dropped.
    pub fn assemble(results: &[RawDependencies], catalog: &[ElfArtifact]) -> Self {
        let mut graph = Self::new();
        let mut edges = 0usize;
        for raw in results {
            graph.nodes.entry(raw.artifact.clone()).or_default();
            for hint in &raw.hints {
                let Some(target) = resolve_name(&hint.name, catalog) else {
                    debug!(artifact = %raw.artifact, hint = %hint.name, "unmatched dependency");
                    continue;
                };
                let edge = DependencyEdge {
                    from: raw.artifact.clone(),
                    to: target.to_string(),
                    provenance: hint.provenance,
                };
                debug!(from = %edge.from, to = %edge.to, provenance = %edge.provenance, "edge");
                graph.add_edge(&edge.from, &edge.to);
                edges += 1;
            }
        }
        info!(nodes = graph.len(), edges, "assembled dependency graph");
        graph
    }

    /// Record that `from` depends on `to`, creating either node as needed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.nodes.entry(from.to_string()).or_default().to.insert(to.to_string());
        self.nodes.entry(to.to_string()).or_default().from.insert(from.to_string());
    }

    pub fn node(&self, path: &str) -> Option<&Adjacency> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Every node reachable from `root` over `from` edges, pruned to itself.
    ///
    /// A root absent from the graph yields a closure holding only the root.
    pub fn closure(&self, root: &str) -> DependencyGraph {
        if !self.contains(root) {
            warn!(root, "root is not in the dependency graph");
        }

        let mut visited: BTreeMap<String, Adjacency> = BTreeMap::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(path) = queue.pop_front() {
            if path.contains(LIBC) || visited.contains_key(&path) {
                continue;
            }
            let adjacency = self.nodes.get(&path).cloned().unwrap_or_default();
            for dependent in &adjacency.from {
                if !visited.contains_key(dependent) {
                    queue.push_back(dependent.clone());
                }
            }
            visited.insert(path, adjacency);
        }

        let mut closure = DependencyGraph { nodes: visited };
        closure.prune();
        debug!(root, size = closure.len(), "closure extracted");
        closure
    }

    /// Drop every `to` reference to a node outside this graph.
    pub fn prune(&mut self) {
        let retained: BTreeSet<String> = self.nodes.keys().cloned().collect();
        for adjacency in self.nodes.values_mut() {
            adjacency.to.retain(|path| retained.contains(path));
        }
    }

    /// `path -> dependents`, omitting nodes nothing depends on.
    pub fn export_view(&self) -> ExportView {
        self.nodes
            .iter()
            .filter(|(_, adjacency)| !adjacency.from.is_empty())
            .map(|(path, adjacency)| (path.clone(), adjacency.from.iter().cloned().collect()))
            .collect()
    }
}

/// Catalog path a raw dependency name refers to.
///
/// Candidates are the paths containing `name`, sorted. Several candidates are
/// narrowed to 64-bit binaries, preferring the first `system/` one.
pub fn resolve_name<'c>(name: &str, catalog: &'c [ElfArtifact]) -> Option<&'c str> {
    if name.is_empty() {
        return None;
    }
    let candidates = sorted_candidates(catalog, |c| c.path.contains(name));
    pick_preferred(&candidates).map(|artifact| artifact.path.as_str())
}
