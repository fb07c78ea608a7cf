//! Hash-based differential rewiring for the LLM tools and LLM providers
//! heartbeat channels.
//!
//! Grounded on `original_source/src/runtime/python/_mcp_mesh/pipeline/
//! mcp_heartbeat/llm_tools_resolution.py`: `spec.md` §4.F's closing
//! paragraph abbreviates these two channels as "structurally identical" to
//! the dependency channel, but they carry tool/provider *catalog data* for
//! LLM agents rather than callable proxy slots, so they get their own
//! key space (`llm_tool:<function_id>:<index>`, `llm_provider:<capability>`)
//! instead of going through `Injector`'s wrapper-notify path. Each channel
//! tracks its own hash independently, matching the Python source's separate
//! `_last_llm_tools_hash` global and the registry's independent
//! `llm_tools`/`llm_providers` heartbeat response keys.

use crate::client::registry::{LlmToolInfo, ResolvedLlmProvider};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Serialize)]
struct ToolEntry<'a> {
    function_name: &'a str,
    capability: &'a str,
    endpoint: &'a str,
    agent_id: &'a str,
}

fn hash_tools(tools: &HashMap<String, Vec<LlmToolInfo>>) -> String {
    let canonical: BTreeMap<&str, Vec<ToolEntry>> = tools
        .iter()
        .map(|(function_id, entries)| {
            let entries = entries
                .iter()
                .map(|t| ToolEntry {
                    function_name: &t.function_name,
                    capability: &t.capability,
                    endpoint: &t.endpoint,
                    agent_id: &t.agent_id,
                })
                .collect();
            (function_id.as_str(), entries)
        })
        .collect();
    let canonical_json = serde_json::to_vec(&canonical).expect("canonical map always serializes");
    hex::encode(Sha256::digest(&canonical_json))[..16].to_string()
}

#[derive(Serialize)]
struct ProviderEntry<'a> {
    agent_id: &'a str,
    endpoint: &'a str,
    function_name: &'a str,
    model: &'a Option<String>,
    vendor: &'a Option<String>,
    version: &'a Option<String>,
}

fn hash_providers(providers: &HashMap<String, ResolvedLlmProvider>) -> String {
    let canonical: BTreeMap<&str, ProviderEntry> = providers
        .iter()
        .map(|(capability, p)| {
            (
                capability.as_str(),
                ProviderEntry {
                    agent_id: &p.agent_id,
                    endpoint: &p.endpoint,
                    function_name: &p.function_name,
                    model: &p.model,
                    vendor: &p.vendor,
                    version: &p.version,
                },
            )
        })
        .collect();
    let canonical_json = serde_json::to_vec(&canonical).expect("canonical map always serializes");
    hex::encode(Sha256::digest(&canonical_json))[..16].to_string()
}

/// Tracks the current LLM tool catalog, refreshed only when its hash
/// changes. Resilience policy matches the Python source: call `apply` only
/// when a heartbeat actually produced a response; skip it entirely on
/// connection errors so the last-known catalog survives a flaky registry.
pub struct LlmToolsCatalog {
    last_hash: Mutex<Option<String>>,
    tools: RwLock<HashMap<String, Vec<LlmToolInfo>>>,
}

impl Default for LlmToolsCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmToolsCatalog {
    pub fn new() -> Self {
        Self {
            last_hash: Mutex::new(None),
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Applies one heartbeat's `llm_tools` snapshot. Returns `true` if the
    /// catalog was replaced, `false` if the hash matched the previous pass.
    pub async fn apply(&self, llm_tools: &HashMap<String, Vec<LlmToolInfo>>) -> bool {
        let new_hash = hash_tools(llm_tools);

        let mut last_hash = self.last_hash.lock().await;
        if last_hash.as_deref() == Some(new_hash.as_str()) {
            debug!("llm tools catalog unchanged, skipping update");
            return false;
        }

        let function_count = llm_tools.len();
        let tool_count: usize = llm_tools.values().map(|v| v.len()).sum();
        *self.tools.write().await = llm_tools.clone();
        *last_hash = Some(new_hash);
        info!(function_count, tool_count, "llm tools catalog updated");
        true
    }

    pub async fn tools_for(&self, function_id: &str) -> Vec<LlmToolInfo> {
        self.tools.read().await.get(function_id).cloned().unwrap_or_default()
    }
}

/// Tracks the current resolved-LLM-provider-per-capability map, with the
/// same hash-gated refresh policy as [`LlmToolsCatalog`].
pub struct LlmProvidersCatalog {
    last_hash: Mutex<Option<String>>,
    providers: RwLock<HashMap<String, ResolvedLlmProvider>>,
}

impl Default for LlmProvidersCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvidersCatalog {
    pub fn new() -> Self {
        Self {
            last_hash: Mutex::new(None),
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn apply(&self, llm_providers: &HashMap<String, ResolvedLlmProvider>) -> bool {
        let new_hash = hash_providers(llm_providers);

        let mut last_hash = self.last_hash.lock().await;
        if last_hash.as_deref() == Some(new_hash.as_str()) {
            debug!("llm providers catalog unchanged, skipping update");
            return false;
        }

        let provider_count = llm_providers.len();
        *self.providers.write().await = llm_providers.clone();
        *last_hash = Some(new_hash);
        info!(provider_count, "llm providers catalog updated");
        true
    }

    pub async fn provider_for(&self, capability: &str) -> Option<ResolvedLlmProvider> {
        self.providers.read().await.get(capability).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, endpoint: &str) -> LlmToolInfo {
        LlmToolInfo {
            function_name: name.to_string(),
            capability: "chat".to_string(),
            endpoint: endpoint.to_string(),
            agent_id: "agent-1".to_string(),
            input_schema: None,
        }
    }

    fn provider(name: &str, endpoint: &str) -> ResolvedLlmProvider {
        ResolvedLlmProvider {
            agent_id: "agent-1".to_string(),
            endpoint: endpoint.to_string(),
            function_name: name.to_string(),
            model: Some("gpt-test".to_string()),
            capability: Some("chat".to_string()),
            status: Some("healthy".to_string()),
            vendor: None,
            version: None,
        }
    }

    #[tokio::test]
    async fn tools_catalog_skips_unchanged_snapshot() {
        let catalog = LlmToolsCatalog::new();
        let mut snapshot = HashMap::new();
        snapshot.insert("func1".to_string(), vec![tool("search", "http://a:9000")]);

        assert!(catalog.apply(&snapshot).await);
        assert!(!catalog.apply(&snapshot).await);
        assert_eq!(catalog.tools_for("func1").await.len(), 1);
    }

    #[tokio::test]
    async fn tools_catalog_clears_on_empty_response() {
        let catalog = LlmToolsCatalog::new();
        let mut snapshot = HashMap::new();
        snapshot.insert("func1".to_string(), vec![tool("search", "http://a:9000")]);
        catalog.apply(&snapshot).await;

        let empty = HashMap::new();
        assert!(catalog.apply(&empty).await);
        assert!(catalog.tools_for("func1").await.is_empty());
    }

    #[tokio::test]
    async fn providers_catalog_updates_on_endpoint_change() {
        let catalog = LlmProvidersCatalog::new();
        let mut snapshot = HashMap::new();
        snapshot.insert("chat".to_string(), provider("chat_fn", "http://a:9000"));
        assert!(catalog.apply(&snapshot).await);

        let mut changed = HashMap::new();
        changed.insert("chat".to_string(), provider("chat_fn", "http://b:9000"));
        assert!(catalog.apply(&changed).await);
        assert_eq!(catalog.provider_for("chat").await.unwrap().endpoint, "http://b:9000");
    }
}
