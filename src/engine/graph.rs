use std::collections::{BTreeMap, BTreeSet};

use crate::models::analysis::DependencyChange;

/// File-level import graph kept in both directions.
///
/// `dependencies[a]` holds the files `a` imports and `dependents[b]` holds the
/// files importing `b`. Every edge is recorded on both sides.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `path` and report the difference.
    pub fn set_dependencies(&mut self, path: &str, deps: BTreeSet<String>) -> DependencyChange {
        let previous = self.dependencies.remove(path).unwrap_or_default();

        let removed: Vec<String> = previous.difference(&deps).cloned().collect();
        let added: Vec<String> = deps.difference(&previous).cloned().collect();

        for target in &removed {
            self.unlink_dependent(target, path);
        }
        for target in &added {
            self.dependents
                .entry(target.clone())
                .or_default()
                .insert(path.to_string());
        }
        if !deps.is_empty() {
            self.dependencies.insert(path.to_string(), deps);
        }

        DependencyChange {
            path: path.to_string(),
            added,
            removed,
        }
    }

    /// Drop the outgoing edges of a deleted file.
    ///
    /// Incoming edges stay: the importers still reference the path until they
    /// are edited, and they are what makes the deletion breaking.
    pub fn remove_file(&mut self, path: &str) -> DependencyChange {
        self.set_dependencies(path, BTreeSet::new())
    }

    fn unlink_dependent(&mut self, target: &str, dependent: &str) {
        if let Some(set) = self.dependents.get_mut(target) {
            set.remove(dependent);
            if set.is_empty() {
                self.dependents.remove(target);
            }
        }
    }

    pub fn dependencies(&self, path: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(path)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    pub fn dependents(&self, path: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(path)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    pub fn has_dependents(&self, path: &str) -> bool {
        self.dependents.get(path).is_some_and(|s| !s.is_empty())
    }

    /// Direct dependents plus their dependents, excluding `path` itself.
    pub fn affected_components(&self, path: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for direct in self.dependents(path) {
            if direct != path && seen.insert(direct) {
                out.push(direct.to_string());
            }
        }
        let direct: Vec<String> = out.clone();
        for d in &direct {
            for second in self.dependents(d) {
                if second != path && seen.insert(second) {
                    out.push(second.to_string());
                }
            }
        }
        out
    }

    pub fn file_count(&self) -> usize {
        self.dependencies
            .keys()
            .chain(self.dependents.keys())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Every forward edge has its reverse and vice versa.
    pub fn is_symmetric(&self) -> bool {
        let forward = self.dependencies.iter().all(|(from, tos)| {
            tos.iter()
                .all(|to| self.dependents.get(to).is_some_and(|s| s.contains(from)))
        });
        let backward = self.dependents.iter().all(|(to, froms)| {
            froms
                .iter()
                .all(|from| self.dependencies.get(from).is_some_and(|s| s.contains(to)))
        });
        forward && backward
    }
}
