//! Generic copy-on-write registry.
//!
//! Readers load the current map without locking. Writers take the writer
//! mutex, clone the map, apply their change and swap the new map in. A
//! reader holding an old snapshot keeps it alive through its `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::definition::Deployable;

/// A deployed object and the registry version it was stored under.
#[derive(Debug)]
pub struct RegistryEntry<T> {
    pub version: u64,
    pub value: Arc<T>,
}

impl<T> Clone for RegistryEntry<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            value: Arc::clone(&self.value),
        }
    }
}

/// Result of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The id was not present.
    Deployed,
    /// A strictly older deployment was replaced.
    Updated,
    /// The stored deployment is the same or newer; nothing changed.
    Unchanged,
}

/// Monotonic version source shared by a registry's writers.
#[derive(Debug, Default)]
pub(crate) struct VersionCounter(AtomicU64);

impl VersionCounter {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct Registry<T> {
    entries: ArcSwap<HashMap<String, RegistryEntry<T>>>,
    writer: Mutex<()>,
    versions: VersionCounter,
}

impl<T: Deployable> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
            versions: VersionCounter::default(),
        }
    }

    /// Store `value` unless a deployment at least as recent is already present.
    pub fn register(&self, value: T) -> RegisterOutcome {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.entries.load_full();

        let outcome = match current.get(value.id()) {
            Some(existing) if value.deployed_at() <= existing.value.deployed_at() => {
                return RegisterOutcome::Unchanged;
            }
            Some(_) => RegisterOutcome::Updated,
            None => RegisterOutcome::Deployed,
        };

        let mut next = (*current).clone();
        next.insert(
            value.id().to_string(),
            RegistryEntry {
                version: self.versions.next(),
                value: Arc::new(value),
            },
        );
        self.entries.store(Arc::new(next));
        outcome
    }

    /// Remove an id. Missing ids are a no-op.
    pub fn unregister(&self, id: &str) -> Option<Arc<T>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.entries.load_full();
        if !current.contains_key(id) {
            return None;
        }

        let mut next = (*current).clone();
        let removed = next.remove(id).map(|entry| entry.value);
        self.entries.store(Arc::new(next));
        removed
    }

    /// Replace the whole content in one swap.
    pub fn replace_all(&self, values: Vec<T>) -> usize {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next: HashMap<_, _> = values
            .into_iter()
            .map(|value| {
                (
                    value.id().to_string(),
                    RegistryEntry {
                        version: self.versions.next(),
                        value: Arc::new(value),
                    },
                )
            })
            .collect();
        let count = next.len();
        self.entries.store(Arc::new(next));
        count
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.load().get(id).map(|entry| Arc::clone(&entry.value))
    }

    pub fn entry(&self, id: &str) -> Option<RegistryEntry<T>> {
        self.entries.load().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.load().contains_key(id)
    }

    /// All values, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let entries = self.entries.load();
        let mut values: Vec<_> = entries.values().map(|e| Arc::clone(&e.value)).collect();
        values.sort_by(|a, b| a.id().cmp(b.id()));
        values
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.entries.store(Arc::new(HashMap::new()));
    }
}

impl<T: Deployable> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Dictionary;
    use std::collections::BTreeMap;

    fn dictionary(id: &str, deployed_at: i64, value: &str) -> Dictionary {
        let mut properties = BTreeMap::new();
        properties.insert("key".to_string(), value.to_string());
        Dictionary {
            id: id.to_string(),
            environment_id: None,
            properties,
            deployed_at,
        }
    }

    #[test]
    fn test_register_update_and_skip_stale() {
        let registry = Registry::new();
        assert_eq!(registry.register(dictionary("d", 1, "a")), RegisterOutcome::Deployed);
        assert_eq!(registry.register(dictionary("d", 1, "b")), RegisterOutcome::Unchanged);
        assert_eq!(registry.register(dictionary("d", 0, "c")), RegisterOutcome::Unchanged);
        assert_eq!(registry.get("d").unwrap().properties["key"], "a");

        assert_eq!(registry.register(dictionary("d", 2, "b")), RegisterOutcome::Updated);
        assert_eq!(registry.get("d").unwrap().properties["key"], "b");
    }

    #[test]
    fn test_versions_are_monotonic() {
        let registry = Registry::new();
        registry.register(dictionary("a", 1, "x"));
        registry.register(dictionary("b", 1, "x"));
        let a = registry.entry("a").unwrap().version;
        let b = registry.entry("b").unwrap().version;
        assert!(b > a);
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let registry: Registry<Dictionary> = Registry::new();
        assert!(registry.unregister("ghost").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_old_snapshot_survives_replace() {
        let registry = Registry::new();
        registry.register(dictionary("a", 1, "old"));
        let held = registry.get("a").unwrap();

        registry.replace_all(vec![dictionary("b", 1, "new")]);
        assert_eq!(held.properties["key"], "old");
        assert!(registry.get("a").is_none());
        assert_eq!(registry.snapshot().len(), 1);
    }
}
