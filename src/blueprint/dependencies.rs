//! Host dependency graph

use std::collections::{BTreeMap, BTreeSet};

/// Host name → hosts it must wait for.
///
/// Iteration order is the sorted host name, which makes cycle reports
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies(BTreeMap<String, Vec<String>>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, deps: Vec<String>) {
        self.0.insert(host.into(), deps);
    }

    /// Dependencies of `host`; empty for unknown hosts
    pub fn get(&self, host: &str) -> &[String] {
        self.0.get(host).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Copy of the map with every host in `satisfied` removed from each
    /// dependency list.
    pub fn filter<S: AsRef<str>>(&self, satisfied: &[S]) -> Self {
        let satisfied: BTreeSet<&str> = satisfied.iter().map(AsRef::as_ref).collect();
        Self(
            self.0
                .iter()
                .map(|(host, deps)| {
                    let remaining = deps
                        .iter()
                        .filter(|d| !satisfied.contains(d.as_str()))
                        .cloned()
                        .collect();
                    (host.clone(), remaining)
                })
                .collect(),
        )
    }

    /// Find a cycle anywhere in the graph.
    ///
    /// Returns a host that lies on the detected cycle.
    pub fn find_circular_dependencies(&self) -> Option<String> {
        let mut on_stack = BTreeSet::new();
        let mut resolved = BTreeSet::new();

        self.0
            .keys()
            .find_map(|host| self.visit(host, &mut on_stack, &mut resolved))
    }

    fn visit<'a>(
        &'a self,
        host: &'a str,
        on_stack: &mut BTreeSet<&'a str>,
        resolved: &mut BTreeSet<&'a str>,
    ) -> Option<String> {
        if on_stack.contains(host) {
            return Some(host.to_string());
        }
        if resolved.contains(host) {
            return None;
        }

        on_stack.insert(host);
        for dep in self.get(host) {
            if let Some(cycle) = self.visit(dep, on_stack, resolved) {
                return Some(cycle);
            }
        }
        on_stack.remove(host);
        resolved.insert(host);
        None
    }
}

impl FromIterator<(String, Vec<String>)> for Dependencies {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(edges: &[(&str, &[&str])]) -> Dependencies {
        edges
            .iter()
            .map(|(host, deps)| {
                (
                    (*host).to_string(),
                    deps.iter().map(|d| (*d).to_string()).collect(),
                )
            })
            .collect()
    }

    /// Whether a cycle is reachable from `start` alone
    fn cycle_from(graph: &Dependencies, start: &str) -> Option<String> {
        graph.visit(start, &mut BTreeSet::new(), &mut BTreeSet::new())
    }

    #[test]
    fn test_acyclic_graph() {
        let graph = deps(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert_eq!(graph.find_circular_dependencies(), None);
        for host in ["a", "b", "c"] {
            assert_eq!(cycle_from(&graph, host), None);
        }
    }

    #[test]
    fn test_two_host_cycle() {
        let graph = deps(&[("a", &["b"]), ("b", &["a"])]);
        let host = graph.find_circular_dependencies().unwrap();
        assert!(host == "a" || host == "b");
    }

    #[test]
    fn test_self_dependency() {
        let graph = deps(&[("a", &["a"])]);
        assert_eq!(graph.find_circular_dependencies(), Some("a".to_string()));
    }

    #[test]
    fn test_reported_host_lies_on_cycle() {
        // entry -> x -> y -> z -> x; entry itself is not on the cycle
        let graph = deps(&[
            ("entry", &["x"]),
            ("x", &["y"]),
            ("y", &["z"]),
            ("z", &["x"]),
        ]);
        let host = graph.find_circular_dependencies().unwrap();
        assert!(["x", "y", "z"].contains(&host.as_str()), "got {host}");
    }

    #[test]
    fn test_cycle_in_second_tree_of_forest() {
        let graph = deps(&[
            ("a", &[]),
            ("b", &["a"]),
            ("m", &["n"]),
            ("n", &["m"]),
        ]);
        assert!(graph.find_circular_dependencies().is_some());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let graph = deps(&[
            ("top", &["left", "right"]),
            ("left", &["bottom"]),
            ("right", &["bottom"]),
            ("bottom", &[]),
        ]);
        assert_eq!(graph.find_circular_dependencies(), None);
    }

    #[test]
    fn test_filter_removes_satisfied_hosts() {
        let graph = deps(&[("a", &[]), ("b", &["a", "local"]), ("c", &["b", "a"])]);
        let filtered = graph.filter(&["a", "local"]);

        assert_eq!(filtered.get("a"), &[] as &[String]);
        assert!(filtered.get("b").is_empty());
        assert_eq!(filtered.get("c"), &["b".to_string()]);
        // original untouched
        assert_eq!(graph.get("b").len(), 2);
    }

    #[test]
    fn test_get_unknown_host() {
        assert!(Dependencies::new().get("nope").is_empty());
    }
}
