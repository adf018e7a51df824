//! API registry and request matching.
//!
//! # Data Flow
//! ```text
//! register/unregister (sync engine, serialized by writer mutex)
//!     → clone entries, apply change
//!     → ApiIndex::build (tiers sorted once)
//!     → ArcSwap::store (single pointer swap)
//!
//! resolve(host, path) (request path, lock-free)
//!     → exact[host]            first path match wins
//!     → wildcard tiers          longest suffix first
//!     → host-less tier
//! ```
//!
//! Within a tier acceptors are ordered by base path length (longest first),
//! then earliest deployment, then api id. Readers always observe either the
//! old or the new index, never a mix.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::definition::{ApiConfiguration, Deployable};
use crate::observability::metrics;
use crate::registry::matcher::{normalize_host, path_matches, wildcard_matches, HostPattern};
use crate::registry::store::{RegisterOutcome, RegistryEntry, VersionCounter};

/// A matched API together with the base path it matched on.
#[derive(Debug, Clone)]
pub struct ResolvedApi {
    pub api: Arc<ApiConfiguration>,
    pub context_path: String,
    pub version: u64,
}

#[derive(Debug, Clone)]
struct Acceptor {
    path: String,
    version: u64,
    api: Arc<ApiConfiguration>,
}

impl Acceptor {
    fn precedence(&self, other: &Self) -> Ordering {
        other
            .path
            .len()
            .cmp(&self.path.len())
            .then(self.api.deployed_at.cmp(&other.api.deployed_at))
            .then_with(|| self.api.id.cmp(&other.api.id))
    }
}

#[derive(Debug, Default)]
struct ApiIndex {
    entries: HashMap<String, RegistryEntry<ApiConfiguration>>,
    exact: HashMap<String, Vec<Acceptor>>,
    /// (suffix, acceptors), longest suffix first.
    wildcard: Vec<(String, Vec<Acceptor>)>,
    default: Vec<Acceptor>,
}

impl ApiIndex {
    fn build(entries: HashMap<String, RegistryEntry<ApiConfiguration>>) -> Self {
        let mut exact: HashMap<String, Vec<Acceptor>> = HashMap::new();
        let mut wildcard: HashMap<String, Vec<Acceptor>> = HashMap::new();
        let mut default = Vec::new();

        for entry in entries.values().filter(|e| e.value.enabled) {
            for vhost in &entry.value.virtual_hosts {
                let acceptor = Acceptor {
                    path: vhost.path.clone(),
                    version: entry.version,
                    api: Arc::clone(&entry.value),
                };
                match HostPattern::parse(vhost.host.as_deref()) {
                    HostPattern::Exact(host) => exact.entry(host).or_default().push(acceptor),
                    HostPattern::Wildcard(suffix) => wildcard.entry(suffix).or_default().push(acceptor),
                    HostPattern::Any => default.push(acceptor),
                }
            }
        }

        for acceptors in exact.values_mut() {
            acceptors.sort_by(Acceptor::precedence);
        }
        let mut wildcard: Vec<_> = wildcard.into_iter().collect();
        for (_, acceptors) in wildcard.iter_mut() {
            acceptors.sort_by(Acceptor::precedence);
        }
        wildcard.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        default.sort_by(Acceptor::precedence);

        Self {
            entries,
            exact,
            wildcard,
            default,
        }
    }

    fn resolve(&self, host: Option<&str>, path: &str) -> Option<&Acceptor> {
        if let Some(host) = host {
            if let Some(found) = self.exact.get(host).and_then(|tier| first_match(tier, path)) {
                return Some(found);
            }
            for (suffix, tier) in &self.wildcard {
                if wildcard_matches(suffix, host) {
                    if let Some(found) = first_match(tier, path) {
                        return Some(found);
                    }
                }
            }
        }

        first_match(&self.default, path)
    }
}

fn first_match<'a>(tier: &'a [Acceptor], path: &str) -> Option<&'a Acceptor> {
    tier.iter().find(|acceptor| path_matches(&acceptor.path, path))
}

pub struct ApiRegistry {
    index: ArcSwap<ApiIndex>,
    writer: Mutex<()>,
    versions: VersionCounter,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(ApiIndex::default()),
            writer: Mutex::new(()),
            versions: VersionCounter::default(),
        }
    }

    /// Deploy or replace an API. A deployment that is not newer than the stored one is skipped.
    pub fn register(&self, api: ApiConfiguration) -> RegisterOutcome {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.index.load_full();

        let outcome = match current.entries.get(&api.id) {
            Some(existing) if api.deployed_at <= existing.value.deployed_at => {
                return RegisterOutcome::Unchanged;
            }
            Some(_) => RegisterOutcome::Updated,
            None => RegisterOutcome::Deployed,
        };

        let mut entries = current.entries.clone();
        tracing::info!(
            api_id = %api.id,
            deployed_at = api.deployed_at,
            action = ?outcome,
            "Registering API"
        );
        entries.insert(
            api.id.clone(),
            RegistryEntry {
                version: self.versions.next(),
                value: Arc::new(api),
            },
        );
        self.swap(entries);
        outcome
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<ApiConfiguration>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.index.load_full();
        if !current.entries.contains_key(id) {
            return None;
        }

        let mut entries = current.entries.clone();
        let removed = entries.remove(id).map(|e| e.value);
        tracing::info!(api_id = %id, "Unregistering API");
        self.swap(entries);
        removed
    }

    /// Replace every deployed API in one swap.
    pub fn replace_all(&self, apis: Vec<ApiConfiguration>) -> usize {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: HashMap<_, _> = apis
            .into_iter()
            .map(|api| {
                (
                    api.id.clone(),
                    RegistryEntry {
                        version: self.versions.next(),
                        value: Arc::new(api),
                    },
                )
            })
            .collect();
        let count = entries.len();
        self.swap(entries);
        count
    }

    /// Find the API serving `(host, path)`.
    pub fn resolve(&self, host: Option<&str>, path: &str) -> Option<Arc<ApiConfiguration>> {
        self.resolve_match(host, path).map(|m| m.api)
    }

    /// Like [`resolve`](Self::resolve), also returning the matched base path.
    pub fn resolve_match(&self, host: Option<&str>, path: &str) -> Option<ResolvedApi> {
        let host = host.and_then(normalize_host);
        let path = if path.is_empty() { "/" } else { path };

        let index = self.index.load();
        index.resolve(host.as_deref(), path).map(|acceptor| ResolvedApi {
            api: Arc::clone(&acceptor.api),
            context_path: acceptor.path.clone(),
            version: acceptor.version,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ApiConfiguration>> {
        self.index.load().entries.get(id).map(|e| Arc::clone(&e.value))
    }

    pub fn entry(&self, id: &str) -> Option<RegistryEntry<ApiConfiguration>> {
        self.index.load().entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.load().entries.contains_key(id)
    }

    /// Every deployed API (enabled or not), ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<ApiConfiguration>> {
        let index = self.index.load();
        let mut apis: Vec<_> = index.entries.values().map(|e| Arc::clone(&e.value)).collect();
        apis.sort_by(|a, b| a.id().cmp(b.id()));
        apis
    }

    pub fn len(&self) -> usize {
        self.index.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.swap(HashMap::new());
    }

    fn swap(&self, entries: HashMap<String, RegistryEntry<ApiConfiguration>>) {
        let count = entries.len();
        self.index.store(Arc::new(ApiIndex::build(entries)));
        metrics::record_apis_deployed(count);
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}
