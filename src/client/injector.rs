//! The dependency injector: holds the live proxy for every `"<func_id>:dep_<i>"`
//! slot and pushes replacements into registered wrappers when the rewiring
//! pass changes them.
//!
//! Rust has neither weak maps nor runtime signature inspection, so the
//! injection-strategy decision the source makes by inspecting a decorated
//! function's type hints at call time is made once here, explicitly, by the
//! caller describing how many dependency slots a wrapper has when it
//! registers. `function_registry` still holds wrappers via `std::sync::Weak`
//! to keep the "doesn't keep the wrapper alive" property from the source's
//! weak map.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// A callable dependency slot: a cross-service proxy, a self-dependency
/// shortcut, or any test double.
#[async_trait]
pub trait ToolProxy: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, crate::error::MeshError>;
}

/// A consumer of injected dependencies. `update_dep` is called whenever the
/// proxy bound to one of this wrapper's declared slots changes; `None`
/// means the slot was unregistered (capability currently unavailable).
pub trait Wrapper: Send + Sync {
    fn update_dep(&self, index: usize, proxy: Option<Arc<dyn ToolProxy>>);
}

/// Parses `"<func_id>:dep_<i>"` into `(func_id, i)`.
pub fn parse_key(key: &str) -> Option<(&str, usize)> {
    let (func_id, suffix) = key.rsplit_once(":dep_")?;
    let index = suffix.parse().ok()?;
    Some((func_id, index))
}

pub fn make_key(func_id: &str, index: usize) -> String {
    format!("{func_id}:dep_{index}")
}

struct Inner {
    dependencies: HashMap<String, Arc<dyn ToolProxy>>,
    function_registry: HashMap<String, Weak<dyn Wrapper>>,
    dependency_mapping: HashMap<String, HashSet<String>>,
}

/// Thread/task-safe dependency injector. Reads (`get`) only take the
/// `RwLock`'s shared lock; all mutation goes through `mutation_lock` to
/// serialize the read-modify-write register/unregister sequences.
pub struct Injector {
    state: RwLock<Inner>,
    mutation_lock: Mutex<()>,
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Injector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Inner {
                dependencies: HashMap::new(),
                function_registry: HashMap::new(),
                dependency_mapping: HashMap::new(),
            }),
            mutation_lock: Mutex::new(()),
        }
    }

    /// Lock-free-ish read of the proxy currently bound to `key`.
    pub async fn get(&self, key: &str) -> Option<Arc<dyn ToolProxy>> {
        self.state.read().await.dependencies.get(key).cloned()
    }

    pub async fn existing_keys(&self) -> HashSet<String> {
        self.state.read().await.dependencies.keys().cloned().collect()
    }

    /// Registers a wrapper (by weak reference) as the consumer of `key`, so
    /// future `register`/`unregister` calls on that key push updates into it.
    pub async fn bind_wrapper(&self, func_id: &str, wrapper: &Arc<dyn Wrapper>, key: &str) {
        let _guard = self.mutation_lock.lock().await;
        let mut state = self.state.write().await;
        state
            .function_registry
            .insert(func_id.to_string(), Arc::downgrade(wrapper));
        state
            .dependency_mapping
            .entry(key.to_string())
            .or_default()
            .insert(func_id.to_string());
    }

    /// Assigns `dependencies[key] = proxy`, atomically replacing any
    /// existing proxy, and pushes the update to every consuming wrapper.
    pub async fn register(&self, key: &str, proxy: Arc<dyn ToolProxy>) {
        let _guard = self.mutation_lock.lock().await;
        let consumers = {
            let mut state = self.state.write().await;
            state.dependencies.insert(key.to_string(), proxy.clone());
            state.dependency_mapping.get(key).cloned().unwrap_or_default()
        };
        self.notify_consumers(key, &consumers, Some(proxy)).await;
    }

    /// Removes `key` and pushes `None` to every consuming wrapper.
    pub async fn unregister(&self, key: &str) {
        let _guard = self.mutation_lock.lock().await;
        let consumers = {
            let mut state = self.state.write().await;
            state.dependencies.remove(key);
            state.dependency_mapping.get(key).cloned().unwrap_or_default()
        };
        self.notify_consumers(key, &consumers, None).await;
    }

    async fn notify_consumers(&self, key: &str, consumers: &HashSet<String>, proxy: Option<Arc<dyn ToolProxy>>) {
        let Some((_func_id, index)) = parse_key(key) else {
            warn!(key, "malformed dependency key, skipping wrapper notification");
            return;
        };
        let state = self.state.read().await;
        for func_id in consumers {
            if let Some(weak) = state.function_registry.get(func_id) {
                if let Some(wrapper) = weak.upgrade() {
                    wrapper.update_dep(index, proxy.clone());
                } else {
                    debug!(func_id, "wrapper dropped, skipping stale dependency update");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingWrapper {
        calls: AtomicUsize,
        last_bound: std::sync::Mutex<Option<usize>>,
    }

    impl Wrapper for RecordingWrapper {
        fn update_dep(&self, index: usize, proxy: Option<Arc<dyn ToolProxy>>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_bound.lock().unwrap() = proxy.map(|_| index);
        }
    }

    struct EchoProxy;

    #[async_trait]
    impl ToolProxy for EchoProxy {
        async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, crate::error::MeshError> {
            Ok(args)
        }
    }

    #[test]
    fn key_roundtrip() {
        let key = make_key("func_abc", 2);
        assert_eq!(key, "func_abc:dep_2");
        assert_eq!(parse_key(&key), Some(("func_abc", 2)));
    }

    #[tokio::test]
    async fn register_pushes_update_to_bound_wrapper() {
        let injector = Injector::new();
        let wrapper: Arc<dyn Wrapper> = Arc::new(RecordingWrapper {
            calls: AtomicUsize::new(0),
            last_bound: std::sync::Mutex::new(None),
        });
        let key = make_key("func_abc", 0);
        injector.bind_wrapper("func_abc", &wrapper, &key).await;

        injector.register(&key, Arc::new(EchoProxy)).await;
        assert!(injector.get(&key).await.is_some());

        injector.unregister(&key).await;
        assert!(injector.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn dropped_wrapper_does_not_panic_on_notify() {
        let injector = Injector::new();
        {
            let wrapper: Arc<dyn Wrapper> = Arc::new(RecordingWrapper {
                calls: AtomicUsize::new(0),
                last_bound: std::sync::Mutex::new(None),
            });
            let key = make_key("func_xyz", 0);
            injector.bind_wrapper("func_xyz", &wrapper, &key).await;
        }
        // wrapper dropped here; only the injector's weak ref remains
        injector.register(&make_key("func_xyz", 0), Arc::new(EchoProxy)).await;
    }
}
