//! Finalizer encoding of dependency edges.

use crate::constants::DEPENDENCY_FINALIZER_PREFIX;

/// Lock a dependent places on its dependency to block the dependency's deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLock {
    dependent: String,
}

impl DependencyLock {
    pub fn for_dependent(name: &str) -> Self {
        Self {
            dependent: name.to_string(),
        }
    }

    pub fn parse(finalizer: &str) -> Option<Self> {
        finalizer
            .strip_prefix(DEPENDENCY_FINALIZER_PREFIX)
            .filter(|name| !name.is_empty())
            .map(Self::for_dependent)
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn finalizer(&self) -> String {
        format!("{}{}", DEPENDENCY_FINALIZER_PREFIX, self.dependent)
    }
}

/// Names of dependents still holding a lock among `finalizers`
pub fn blocking_dependents(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter_map(|f| DependencyLock::parse(f))
        .map(|lock| lock.dependent)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_encoding() {
        let lock = DependencyLock::for_dependent("apps");
        assert_eq!(lock.finalizer(), "tf.dependency.of.apps");
        assert_eq!(DependencyLock::parse(&lock.finalizer()), Some(lock));
        assert_eq!(DependencyLock::parse("finalizers.tf.contrib.fluxcd.io"), None);
        assert_eq!(DependencyLock::parse("tf.dependency.of."), None);
    }

    #[test]
    fn test_blocking_dependents() {
        let finalizers = vec![
            "finalizers.tf.contrib.fluxcd.io".to_string(),
            "tf.dependency.of.apps".to_string(),
            "tf.dependency.of.dns".to_string(),
        ];
        assert_eq!(blocking_dependents(&finalizers), vec!["apps", "dns"]);
        assert!(blocking_dependents(&finalizers[..1]).is_empty());
    }
}
