//! Hash-based differential rewiring: turns a heartbeat response's resolved
//! dependencies into injector `register`/`unregister` calls, touching only
//! the slots that actually changed since the last heartbeat.
//!
//! Grounded on `spec.md` §4.F. The canonical hash input is built with
//! `BTreeMap`s rather than `serde_json::Map` — `serde_json`'s `preserve_order`
//! feature keeps insertion order by default, so sorting has to be explicit,
//! not incidental, to get a stable hash across equivalent topologies.

use crate::client::injector::{make_key, parse_key, Injector, ToolProxy};
use crate::client::proxy::{CrossServiceProxy, LocalWrapperCall, SelfDependencyProxy};
use crate::client::registry::ResolvedDependency;
use crate::error::MeshError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Serialize)]
struct CanonicalEntry {
    capability: String,
    endpoint: String,
    function_name: String,
    status: String,
    agent_id: String,
    kwargs: BTreeMap<String, String>,
}

fn canonical_hash(resolved: &HashMap<String, Vec<ResolvedDependency>>) -> String {
    let canonical: BTreeMap<&str, Vec<CanonicalEntry>> = resolved
        .iter()
        .map(|(func_id, deps)| {
            let entries = deps
                .iter()
                .map(|d| CanonicalEntry {
                    capability: d.capability.clone(),
                    endpoint: d.endpoint.clone(),
                    function_name: d.function_name.clone(),
                    status: d.status.clone(),
                    agent_id: d.agent_id.clone(),
                    kwargs: d.kwargs.clone().into_iter().collect(),
                })
                .collect();
            (func_id.as_str(), entries)
        })
        .collect();

    let canonical_json = serde_json::to_vec(&canonical).expect("canonical map always serializes");
    let digest = Sha256::digest(&canonical_json);
    hex::encode(digest)[..16].to_string()
}

/// Resolves a locally-registered wrapper by function name, for
/// self-dependency proxies.
pub trait LocalWrapperLookup: Send + Sync {
    fn lookup(&self, function_name: &str) -> Option<Arc<dyn LocalWrapperCall>>;
}

/// Drives the injector from successive heartbeat responses for one
/// dependency channel (the regular dependency channel, or — with its own
/// instance — the LLM tools / LLM providers channels, which are
/// structurally identical per `spec.md` §4.F's closing paragraph).
pub struct Rewirer {
    current_agent_id: String,
    injector: Arc<Injector>,
    local_wrappers: Arc<dyn LocalWrapperLookup>,
    last_hash: Mutex<Option<String>>,
    changed_since_start: AtomicBool,
}

impl Rewirer {
    pub fn new(current_agent_id: String, injector: Arc<Injector>, local_wrappers: Arc<dyn LocalWrapperLookup>) -> Self {
        Self {
            current_agent_id,
            injector,
            local_wrappers,
            last_hash: Mutex::new(None),
            changed_since_start: AtomicBool::new(false),
        }
    }

    /// Applies one heartbeat's resolved-dependency snapshot. Returns `true`
    /// if the injector was touched, `false` if the topology hash matched
    /// the previous pass and nothing changed.
    pub async fn apply(&self, resolved: &HashMap<String, Vec<ResolvedDependency>>) -> Result<bool, MeshError> {
        let new_hash = canonical_hash(resolved);

        let mut last_hash = self.last_hash.lock().await;
        if last_hash.as_deref() == Some(new_hash.as_str()) {
            debug!("dependency topology hash unchanged, skipping rewiring");
            return Ok(false);
        }

        let target_keys: std::collections::HashSet<String> = resolved
            .iter()
            .flat_map(|(func_id, deps)| (0..deps.len()).map(move |i| make_key(func_id, i)))
            .collect();

        let existing_keys: std::collections::HashSet<String> = self
            .injector
            .existing_keys()
            .await
            .into_iter()
            .filter(|k| parse_key(k).is_some())
            .collect();

        for stale_key in existing_keys.difference(&target_keys) {
            self.injector.unregister(stale_key).await;
        }

        for (func_id, deps) in resolved {
            for (i, dep) in deps.iter().enumerate() {
                if dep.endpoint.is_empty() || dep.function_name.is_empty() {
                    continue;
                }
                let key = make_key(func_id, i);
                let proxy: Arc<dyn ToolProxy> = if dep.agent_id == self.current_agent_id {
                    match self.local_wrappers.lookup(&dep.function_name) {
                        Some(target) => Arc::new(SelfDependencyProxy::new(target)),
                        None => {
                            debug!(function = %dep.function_name, "self-dependency target not registered locally yet");
                            continue;
                        }
                    }
                } else {
                    Arc::new(
                        CrossServiceProxy::new(&dep.endpoint, &dep.function_name)
                            .with_static_kwargs(dep.kwargs.clone()),
                    )
                };
                self.injector.register(&key, proxy).await;
            }
        }

        info!(hash = %new_hash, target_slots = target_keys.len(), "dependency topology rewired");
        *last_hash = Some(new_hash);
        self.changed_since_start.store(true, Ordering::Relaxed);
        Ok(true)
    }

    pub fn has_changed_since_start(&self) -> bool {
        self.changed_since_start.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoLocalWrappers;
    impl LocalWrapperLookup for NoLocalWrappers {
        fn lookup(&self, _function_name: &str) -> Option<Arc<dyn LocalWrapperCall>> {
            None
        }
    }

    fn dep(agent_id: &str, endpoint: &str, function_name: &str) -> ResolvedDependency {
        ResolvedDependency {
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
            function_name: function_name.to_string(),
            capability: "greeting".to_string(),
            status: "healthy".to_string(),
            ttl: 30,
            kwargs: HashMap::new(),
        }
    }

    #[test]
    fn hash_is_stable_regardless_of_map_iteration_order() {
        let mut a = HashMap::new();
        a.insert("func1".to_string(), vec![dep("other", "http://a", "f")]);
        a.insert("func2".to_string(), vec![dep("other", "http://b", "g")]);

        let mut b = HashMap::new();
        b.insert("func2".to_string(), vec![dep("other", "http://b", "g")]);
        b.insert("func1".to_string(), vec![dep("other", "http://a", "f")]);

        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn hash_changes_when_endpoint_changes() {
        let mut a = HashMap::new();
        a.insert("func1".to_string(), vec![dep("other", "http://a", "f")]);
        let mut b = HashMap::new();
        b.insert("func1".to_string(), vec![dep("other", "http://b", "f")]);
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }

    #[tokio::test]
    async fn unchanged_topology_skips_rewiring() {
        let injector = Arc::new(Injector::new());
        let rewirer = Rewirer::new("self-1".to_string(), injector.clone(), Arc::new(NoLocalWrappers));

        let mut resolved = HashMap::new();
        resolved.insert("func1".to_string(), vec![dep("other", "http://a:9000", "f")]);

        assert!(rewirer.apply(&resolved).await.unwrap());
        assert!(!rewirer.apply(&resolved).await.unwrap());
    }

    #[tokio::test]
    async fn removed_dependency_unregisters_stale_key() {
        let injector = Arc::new(Injector::new());
        let rewirer = Rewirer::new("self-1".to_string(), injector.clone(), Arc::new(NoLocalWrappers));

        let mut resolved = HashMap::new();
        resolved.insert("func1".to_string(), vec![dep("other", "http://a:9000", "f")]);
        rewirer.apply(&resolved).await.unwrap();
        assert!(injector.get("func1:dep_0").await.is_some());

        let empty: HashMap<String, Vec<ResolvedDependency>> = HashMap::new();
        rewirer.apply(&empty).await.unwrap();
        assert!(injector.get("func1:dep_0").await.is_none());
    }

    #[tokio::test]
    async fn self_dependency_without_local_target_is_skipped_not_errored() {
        let injector = Arc::new(Injector::new());
        let rewirer = Rewirer::new("self-1".to_string(), injector.clone(), Arc::new(NoLocalWrappers));

        let mut resolved = HashMap::new();
        resolved.insert("func1".to_string(), vec![dep("self-1", "http://self:9000", "f")]);
        let changed = rewirer.apply(&resolved).await.unwrap();
        assert!(changed);
        assert!(injector.get("func1:dep_0").await.is_none());
    }
}
