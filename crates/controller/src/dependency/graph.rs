//! Adjacency structure over Terraform objects.

use super::DependencyError;
use crate::crd::Terraform;
use std::collections::{BTreeMap, BTreeSet};

/// Namespaced identity of a Terraform object, ordered by namespace then name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(terraform: &Terraform) -> Self {
        Self::new(terraform.namespace_or_default(), terraform.name())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Dependency to dependents edges, plus the reverse index
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependents: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
    dependencies: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from each object's `dependsOn`
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a Terraform>) -> Self {
        let mut graph = Self::new();
        for terraform in resources {
            let dependent = ObjectKey::of(terraform);
            for dependency in &terraform.spec.depends_on {
                let namespace = dependency
                    .namespace
                    .as_deref()
                    .unwrap_or(&dependent.namespace);
                graph.add_edge(ObjectKey::new(namespace, &dependency.name), dependent.clone());
            }
        }
        graph
    }

    pub fn add_edge(&mut self, dependency: ObjectKey, dependent: ObjectKey) {
        self.dependencies
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());
        self.dependents.entry(dependency).or_default().insert(dependent);
    }

    pub fn dependents_of(&self, key: &ObjectKey) -> Vec<&ObjectKey> {
        self.dependents
            .get(key)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, key: &ObjectKey) -> Vec<&ObjectKey> {
        self.dependencies
            .get(key)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Orders `candidates` so dependencies come before their dependents.
    ///
    /// Only edges between candidates count. Ties break by (namespace, name).
    pub fn topological_order(
        &self,
        candidates: &[ObjectKey],
    ) -> Result<Vec<ObjectKey>, DependencyError> {
        let members: BTreeSet<&ObjectKey> = candidates.iter().collect();
        let mut in_degree: BTreeMap<&ObjectKey, usize> = members
            .iter()
            .map(|key| {
                let degree = self
                    .dependencies_of(key)
                    .into_iter()
                    .filter(|dep| members.contains(dep))
                    .count();
                (*key, degree)
            })
            .collect();

        let mut ready: BTreeSet<&ObjectKey> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut ordered = Vec::with_capacity(members.len());

        while let Some(key) = ready.pop_first() {
            ordered.push(key.clone());
            for dependent in self.dependents_of(key) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if ordered.len() < members.len() {
            let cycle: Vec<ObjectKey> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(key, _)| key.clone())
                .collect();
            return Err(DependencyError::Cycle(cycle));
        }
        Ok(ordered)
    }
}
