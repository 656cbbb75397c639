//! Generic immutable registry builder shared by the concrete definition
//! registries (C11: commands, events, projections, process managers) built
//! on top of this in `ledgerflow-infra`.
//!
//! Grounded on the teacher's `jobs::executor::JobExecutor` handler map
//! (`HashMap<String, JobHandler>` populated once via `register_handler` and
//! never mutated again after the executor starts): this generalizes that
//! "build a map once, validate, then freeze it" shape into something every
//! definition registry can reuse instead of hand-rolling duplicate-key
//! checks per registry.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate registry key: {0}")]
    DuplicateKey(String),
    #[error("invalid registry entry: {0}")]
    Invalid(String),
}

/// An immutable, built-once lookup table.
#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash, V> Registry<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

/// Accumulates entries under unique keys, then freezes them into a
/// [`Registry`] once a caller-supplied cross-entry validation passes.
#[derive(Debug)]
pub struct RegistryBuilder<K, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone + core::fmt::Display, V> RegistryBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert an entry, failing if `key` was already registered.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), RegistryError> {
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key.to_string()));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Freeze the registry after running `validate` against the full entry
    /// set — the point at which cross-entry invariants (e.g. "a command's
    /// declared events are a subset of registered events") are checked.
    pub fn build_with(
        self,
        validate: impl FnOnce(&HashMap<K, V>) -> Result<(), RegistryError>,
    ) -> Result<Registry<K, V>, RegistryError> {
        validate(&self.entries)?;
        Ok(Registry {
            entries: self.entries,
        })
    }

    /// Freeze the registry with no additional cross-entry validation beyond
    /// the uniqueness already enforced by `insert`.
    pub fn build(self) -> Registry<K, V> {
        Registry {
            entries: self.entries,
        }
    }
}

impl<K: Eq + Hash + Clone + core::fmt::Display, V> Default for RegistryBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_key() {
        let mut builder: RegistryBuilder<String, u32> = RegistryBuilder::new();
        builder.insert("a".to_string(), 1).unwrap();
        let err = builder.insert("a".to_string(), 2).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey(k) if k == "a"));
    }

    #[test]
    fn build_with_runs_cross_entry_validation() {
        let mut builder: RegistryBuilder<String, u32> = RegistryBuilder::new();
        builder.insert("a".to_string(), 1).unwrap();
        let err = builder
            .build_with(|entries| {
                if entries.values().any(|v| *v > 0) {
                    Err(RegistryError::Invalid("no positive values allowed".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(_)));
    }
}
