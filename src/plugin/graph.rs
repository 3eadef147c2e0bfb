//! Plugin Dependency Graph
//!
//! Directed acyclic graph over loaded plugins built from their declared
//! dependencies and version constraints. Provides cycle detection, a
//! deterministic topological load order (lexicographic tie-break), and
//! per-dependent constraint validation so a single bad plugin can be demoted
//! without failing the batch.
//!
//! The graph is rebuilt whenever the loaded set changes; it is never mutated
//! concurrently (the plugin manager serializes writes).

use crate::manifest::semver::{Version, VersionConstraint};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Errors raised while building or validating the graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("plugin '{plugin_id}' already exists in graph")]
    DuplicateNode { plugin_id: String },

    #[error("plugin '{plugin_id}' not found in graph")]
    UnknownNode { plugin_id: String },

    #[error("invalid version for plugin '{plugin_id}': {cause}")]
    InvalidVersion { plugin_id: String, cause: String },

    #[error("invalid constraint on dependency '{dependency}' of plugin '{plugin_id}': {cause}")]
    InvalidConstraint {
        plugin_id: String,
        dependency: String,
        cause: String,
    },

    #[error("plugin '{dependent}' has missing dependency: {dependency}")]
    MissingDependency {
        dependent: String,
        dependency: String,
    },

    #[error(
        "plugin '{dependent}' requires '{dependency}' version '{required}', \
         but found version '{actual}'"
    )]
    VersionIncompatibility {
        dependent: String,
        dependency: String,
        required: String,
        actual: String,
    },

    #[error("cyclic dependency detected: {}", format_cycle(.path))]
    CyclicDependency { path: Vec<String> },
}

fn format_cycle(path: &[String]) -> String {
    let mut closed: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
    if let Some(first) = path.first() {
        closed.push(first);
    }
    closed.join(" -> ")
}

impl From<GraphError> for crate::plugin::error::PluginError {
    fn from(error: GraphError) -> Self {
        use crate::plugin::error::PluginError;
        match error {
            GraphError::MissingDependency {
                dependent,
                dependency,
            } => PluginError::MissingDependency {
                dependent,
                dependency,
            },
            GraphError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            } => PluginError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            },
            GraphError::CyclicDependency { path } => PluginError::CyclicDependency { path },
            other => PluginError::Generic {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct PluginNode {
    version: Version,
    /// dep_id -> declared constraint
    dependencies: BTreeMap<String, VersionConstraint>,
}

/// Dependency DAG over the loaded plugin set.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, PluginNode>,
    /// dependent -> its dependencies
    adjacency: HashMap<String, BTreeSet<String>>,
    /// dependency -> plugins depending on it
    reverse_adjacency: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin node. Version and constraint strings are validated here
    /// so a malformed manifest surfaces at graph construction, not during
    /// topological sorting.
    pub fn add_plugin(
        &mut self,
        plugin_id: &str,
        version: &str,
        dependencies: &BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(plugin_id) {
            return Err(GraphError::DuplicateNode {
                plugin_id: plugin_id.to_string(),
            });
        }

        let version = Version::parse(version).map_err(|e| GraphError::InvalidVersion {
            plugin_id: plugin_id.to_string(),
            cause: e.to_string(),
        })?;

        let mut parsed_deps = BTreeMap::new();
        for (dep_id, constraint) in dependencies {
            let constraint = VersionConstraint::parse(constraint).map_err(|e| {
                GraphError::InvalidConstraint {
                    plugin_id: plugin_id.to_string(),
                    dependency: dep_id.clone(),
                    cause: e.to_string(),
                }
            })?;
            parsed_deps.insert(dep_id.clone(), constraint);
        }

        for dep_id in parsed_deps.keys() {
            self.adjacency
                .entry(plugin_id.to_string())
                .or_default()
                .insert(dep_id.clone());
            self.reverse_adjacency
                .entry(dep_id.clone())
                .or_default()
                .insert(plugin_id.to_string());
        }

        self.nodes.insert(
            plugin_id.to_string(),
            PluginNode {
                version,
                dependencies: parsed_deps,
            },
        );

        Ok(())
    }

    pub fn remove_plugin(&mut self, plugin_id: &str) -> Result<(), GraphError> {
        let node = self
            .nodes
            .remove(plugin_id)
            .ok_or_else(|| GraphError::UnknownNode {
                plugin_id: plugin_id.to_string(),
            })?;

        for dep_id in node.dependencies.keys() {
            if let Some(dependents) = self.reverse_adjacency.get_mut(dep_id) {
                dependents.remove(plugin_id);
            }
        }
        if let Some(dependents) = self.reverse_adjacency.remove(plugin_id) {
            for dependent in dependents {
                if let Some(deps) = self.adjacency.get_mut(&dependent) {
                    deps.remove(plugin_id);
                }
            }
        }
        self.adjacency.remove(plugin_id);

        Ok(())
    }

    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        self.nodes.contains_key(plugin_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Plugins that directly depend on `plugin_id`.
    pub fn dependents_of(&self, plugin_id: &str) -> BTreeSet<String> {
        self.reverse_adjacency
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Transitive closure of dependencies reachable from `plugin_id`.
    pub fn reachable_from(&self, plugin_id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(plugin_id);

        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.adjacency.get(current) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        queue.push_back(dep);
                    }
                }
            }
        }

        seen
    }

    /// Validate one node's edges: every dependency present and every
    /// constraint satisfied by the loaded version.
    pub fn validate_node(&self, plugin_id: &str) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(plugin_id)
            .ok_or_else(|| GraphError::UnknownNode {
                plugin_id: plugin_id.to_string(),
            })?;

        for (dep_id, constraint) in &node.dependencies {
            let dep_node = self
                .nodes
                .get(dep_id)
                .ok_or_else(|| GraphError::MissingDependency {
                    dependent: plugin_id.to_string(),
                    dependency: dep_id.clone(),
                })?;

            if !constraint.satisfies(&dep_node.version) {
                return Err(GraphError::VersionIncompatibility {
                    dependent: plugin_id.to_string(),
                    dependency: dep_id.clone(),
                    required: constraint.as_str().to_string(),
                    actual: dep_node.version.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Per-dependent violations across the whole graph, in id order. Used by
    /// the plugin manager to demote exactly the offending plugins.
    pub fn node_violations(&self) -> Vec<(String, GraphError)> {
        self.nodes
            .keys()
            .filter_map(|id| self.validate_node(id).err().map(|e| (id.clone(), e)))
            .collect()
    }

    /// Validate the whole graph: all edges resolvable and acyclic.
    pub fn build(&self) -> Result<(), GraphError> {
        if let Some((_, error)) = self.node_violations().into_iter().next() {
            return Err(error);
        }
        if let Some(path) = self.find_shortest_cycle() {
            return Err(GraphError::CyclicDependency { path });
        }
        Ok(())
    }

    /// Find one shortest cycle, if any. For every edge u -> v, a cycle
    /// through that edge has length dist(v, u) + 1; take the minimum.
    pub fn find_shortest_cycle(&self) -> Option<Vec<String>> {
        let mut best: Option<Vec<String>> = None;

        for (u, deps) in &self.adjacency {
            for v in deps {
                if let Some(mut path) = self.shortest_path(v, u) {
                    // path is v ... u; the edge u -> v closes the cycle
                    path.insert(0, u.clone());
                    let shorter = match &best {
                        Some(current) => path.len() < current.len(),
                        None => true,
                    };
                    if shorter {
                        best = Some(path);
                    }
                }
            }
        }

        // Drop the duplicated closing node: [u, v, ..., u] -> [u, v, ...]
        best.map(|mut path| {
            path.pop();
            path
        })
    }

    /// BFS shortest path along dependency edges, inclusive of endpoints.
    fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut previous: HashMap<String, String> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());
        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(prev) = previous.get(&cursor) {
                    path.push(prev.clone());
                    cursor = prev.clone();
                }
                path.reverse();
                return Some(path);
            }
            if let Some(deps) = self.adjacency.get(&current) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        previous.insert(dep.clone(), current.clone());
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        None
    }

    /// Topological load order: dependencies before dependents, ties broken
    /// lexicographically by plugin id. Kahn's algorithm over a sorted ready
    /// set makes the order fully deterministic.
    pub fn topo_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| {
                let degree = self
                    .adjacency
                    .get(id)
                    .map(|deps| deps.iter().filter(|d| self.nodes.contains_key(*d)).count())
                    .unwrap_or(0);
                (id.as_str(), degree)
            })
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(&next) = ready.iter().next() {
            ready.remove(next);
            order.push(next.to_string());

            if let Some(dependents) = self.reverse_adjacency.get(next) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let path = self.find_shortest_cycle().unwrap_or_default();
            return Err(GraphError::CyclicDependency { path });
        }

        Ok(order)
    }

    /// DOT export for diagnosing dependency problems with graphviz.
    pub fn export_dot(&self) -> String {
        let mut lines = vec![
            "digraph PluginDependencies {".to_string(),
            "  rankdir=LR;".to_string(),
            "  node [shape=box, style=rounded];".to_string(),
            String::new(),
        ];

        for (plugin_id, node) in &self.nodes {
            lines.push(format!(
                "  \"{}\" [label=\"{}\\nv{}\"];",
                plugin_id, plugin_id, node.version
            ));
        }
        lines.push(String::new());

        for (plugin_id, deps) in &self.adjacency {
            for dep_id in deps {
                lines.push(format!("  \"{}\" -> \"{}\";", plugin_id, dep_id));
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(id, c)| (id.to_string(), c.to_string()))
            .collect()
    }

    fn graph(nodes: &[(&str, &str, &[(&str, &str)])]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (id, version, dependencies) in nodes {
            graph.add_plugin(id, version, &deps(dependencies)).unwrap();
        }
        graph
    }

    #[test]
    fn test_empty_graph_builds() {
        let graph = DependencyGraph::new();
        assert!(graph.build().is_ok());
        assert!(graph.topo_order().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_plugin("plugin-source-a", "1.0.0", &deps(&[])).unwrap();
        let err = graph
            .add_plugin("plugin-source-a", "2.0.0", &deps(&[]))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[test]
    fn test_invalid_version_rejected_at_insert() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .add_plugin("plugin-source-a", "not-semver", &deps(&[]))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidVersion { .. }));
    }

    #[test]
    fn test_invalid_constraint_rejected_at_insert() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .add_plugin(
                "plugin-processing-a",
                "1.0.0",
                &deps(&[("plugin-source-b", ">=bogus")]),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidConstraint { .. }));
    }

    #[test]
    fn test_topo_order_dependencies_first() {
        let graph = graph(&[
            ("c", "1.0.0", &[("b", "*")]),
            ("b", "1.0.0", &[("a", "*")]),
            ("a", "1.0.0", &[]),
        ]);

        assert!(graph.build().is_ok());
        assert_eq!(graph.topo_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_order_lexicographic_tie_break() {
        let graph = graph(&[
            ("zeta", "1.0.0", &[]),
            ("alpha", "1.0.0", &[]),
            ("mid", "1.0.0", &[]),
        ]);

        assert_eq!(graph.topo_order().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_topo_order_is_valid_linearization() {
        let graph = graph(&[
            ("d", "1.0.0", &[("b", "*"), ("c", "*")]),
            ("c", "1.0.0", &[("a", "*")]),
            ("b", "1.0.0", &[("a", "*")]),
            ("a", "1.0.0", &[]),
        ]);

        let order = graph.topo_order().unwrap();
        let position = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("a") < position("c"));
        assert!(position("b") < position("d"));
        assert!(position("c") < position("d"));
    }

    #[test]
    fn test_missing_dependency_detected() {
        let graph = graph(&[("a", "1.0.0", &[("ghost", "*")])]);

        match graph.build() {
            Err(GraphError::MissingDependency {
                dependent,
                dependency,
            }) => {
                assert_eq!(dependent, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_version_incompatibility_detected() {
        let graph = graph(&[
            ("a", "1.0.0", &[("b", "^2.0.0")]),
            ("b", "1.5.0", &[]),
        ]);

        match graph.build() {
            Err(GraphError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            }) => {
                assert_eq!(dependent, "a");
                assert_eq!(dependency, "b");
                assert_eq!(required, "^2.0.0");
                assert_eq!(actual, "1.5.0");
            }
            other => panic!("expected VersionIncompatibility, got {:?}", other),
        }
    }

    #[test]
    fn test_node_violations_isolate_bad_plugin() {
        let graph = graph(&[
            ("a", "1.0.0", &[("b", "^2.0.0")]),
            ("b", "1.5.0", &[]),
            ("c", "1.0.0", &[("b", "^1.0.0")]),
        ]);

        let violations = graph.node_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].0, "a");
        // b and c are individually valid
        assert!(graph.validate_node("b").is_ok());
        assert!(graph.validate_node("c").is_ok());
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let graph = graph(&[
            ("a", "1.0.0", &[("b", "*")]),
            ("b", "1.0.0", &[("c", "*")]),
            ("c", "1.0.0", &[("a", "*")]),
        ]);

        match graph.build() {
            Err(GraphError::CyclicDependency { path }) => {
                assert_eq!(path.len(), 3);
                // The reported path must actually form a cycle
                for pair in path.windows(2) {
                    assert!(graph.adjacency[&pair[0]].contains(&pair[1]));
                }
                assert!(graph.adjacency[&path[path.len() - 1]].contains(&path[0]));
            }
            other => panic!("expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_shortest_cycle_preferred() {
        // A 2-cycle (d <-> e) alongside a 3-cycle (a -> b -> c -> a)
        let graph = graph(&[
            ("a", "1.0.0", &[("b", "*")]),
            ("b", "1.0.0", &[("c", "*")]),
            ("c", "1.0.0", &[("a", "*")]),
            ("d", "1.0.0", &[("e", "*")]),
            ("e", "1.0.0", &[("d", "*")]),
        ]);

        let cycle = graph.find_shortest_cycle().unwrap();
        assert_eq!(cycle.len(), 2);
        let set: BTreeSet<&str> = cycle.iter().map(|s| s.as_str()).collect();
        assert_eq!(set, BTreeSet::from(["d", "e"]));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = graph(&[("a", "1.0.0", &[("a", "*")])]);
        let cycle = graph.find_shortest_cycle().unwrap();
        assert_eq!(cycle, vec!["a"]);
    }

    #[test]
    fn test_dependents_and_reachability() {
        let graph = graph(&[
            ("c", "1.0.0", &[("b", "*")]),
            ("b", "1.0.0", &[("a", "*")]),
            ("a", "1.0.0", &[]),
        ]);

        assert_eq!(graph.dependents_of("a"), BTreeSet::from(["b".to_string()]));
        assert_eq!(
            graph.reachable_from("c"),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert!(graph.reachable_from("a").is_empty());
    }

    #[test]
    fn test_remove_plugin_cleans_edges() {
        let mut graph = graph(&[
            ("b", "1.0.0", &[("a", "*")]),
            ("a", "1.0.0", &[]),
        ]);

        graph.remove_plugin("a").unwrap();
        assert!(!graph.has_plugin("a"));
        assert!(graph.dependents_of("a").is_empty());
        // b now has a missing dependency
        assert!(matches!(
            graph.validate_node("b"),
            Err(GraphError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_export_dot_contains_nodes_and_edges() {
        let graph = graph(&[
            ("b", "1.2.0", &[("a", "*")]),
            ("a", "1.0.0", &[]),
        ]);

        let dot = graph.export_dot();
        assert!(dot.starts_with("digraph PluginDependencies {"));
        assert!(dot.contains("\"a\" [label=\"a\\nv1.0.0\"];"));
        assert!(dot.contains("\"b\" -> \"a\";"));
    }

    #[test]
    fn test_prerelease_dependency_constraint() {
        // Strict semver: 2.0.0-beta does not satisfy ^2.0.0
        let graph = graph(&[
            ("a", "1.0.0", &[("b", "^2.0.0")]),
            ("b", "2.0.0-beta", &[]),
        ]);
        assert!(matches!(
            graph.build(),
            Err(GraphError::VersionIncompatibility { .. })
        ));
    }
}
