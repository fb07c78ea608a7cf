//! Registry HTTP handlers.
//!
//! `ApiState`/`ApiRoutes`/`build_http_router`/`ApiError` shape grounded on
//! `FlexNetOS-noa_ark_os/server/api/src/routes.rs`; wire request/response
//! fields (`HeartbeatRequest`/`ToolRegistration`/`ResolvedDependency`) are
//! kept symmetric with `client/registry.rs` so the shipped client and
//! registry speak the same JSON without sharing types across the
//! client/server boundary.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::{info, warn};

use crate::error::MeshError;
use crate::model::{
    default_thresholds, Agent, AgentStatus, Capability, ChangeEvent, ChangeEventType, Dependency,
    ResolutionEntry, Stability, Tool,
};
use crate::resolution::resolve_all;
use crate::semver_constraint::{Constraint, Version};
use crate::server::metrics::{self, MetricsHandle};
use crate::store::{AgentFilter, Store};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

struct AppStateInner {
    store: Store,
    watch_tx: broadcast::Sender<ChangeEvent>,
    metrics: MetricsHandle,
    started_at: Instant,
    /// Last dependency-resolution hash seen per agent, populated by the full
    /// heartbeat and consulted by the fast HEAD heartbeat to decide whether
    /// topology changed since the client's last poll.
    topology_hashes: RwLock<HashMap<String, String>>,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        let (watch_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(AppStateInner {
                store,
                watch_tx,
                metrics: MetricsHandle::global(),
                started_at: Instant::now(),
                topology_hashes: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    fn publish(&self, event: ChangeEvent) {
        let _ = self.inner.watch_tx.send(event);
    }
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        use crate::error::ErrorKind;
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::SecurityViolation => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RemoteToolError => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %err, "internal registry error");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/agents/heartbeat", post(heartbeat))
        .route("/agents/heartbeat/:id", head(fast_heartbeat))
        .route("/agents", get(list_agents))
        .route("/agents/:id", get(get_agent).delete(unregister_agent))
        .route("/capabilities", get(list_capabilities))
        .route("/health/:id", get(agent_health))
        .route("/metrics", get(registry_metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/watch", get(watch))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DependencyRegistration {
    capability: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolRegistration {
    function_name: String,
    capability: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    dependencies: Vec<DependencyRegistration>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    agent_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_version")]
    version: String,
    http_host: String,
    http_port: u16,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tools: Vec<ToolRegistration>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize)]
struct ResolvedDependencyWire {
    agent_id: String,
    endpoint: String,
    function_name: String,
    capability: String,
    status: String,
    ttl: u64,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponseWire {
    status: String,
    message: String,
    agent_id: String,
    dependencies_resolved: HashMap<String, Vec<ResolvedDependencyWire>>,
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponseWire>, ApiError> {
    let name = req.name.clone().unwrap_or_else(|| req.agent_id.clone());
    let agent_type = req.agent_type.clone().unwrap_or_else(|| "default".to_string());
    let (timeout_threshold, eviction_threshold) = default_thresholds(&agent_type);

    let endpoint = format!("http://{}:{}", req.http_host, req.http_port);

    let tools: Vec<Tool> = req
        .tools
        .iter()
        .map(|t| Tool {
            function_name: t.function_name.clone(),
            capability: Some(t.capability.clone()),
            version: t.version.clone(),
            tags: t.tags.clone(),
            dependencies: t
                .dependencies
                .iter()
                .map(|d| Dependency {
                    capability: d.capability.clone(),
                    tags: d.tags.clone(),
                    version_constraint: d.version.clone(),
                    namespace: d.namespace.clone(),
                })
                .collect(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    let capabilities: Vec<Capability> = req
        .tools
        .iter()
        .map(|t| Capability {
            name: t.capability.clone(),
            version: t.version.clone(),
            description: t.description.clone(),
            tags: t.tags.clone(),
            category: None,
            stability: Stability::Stable,
            input_schema: t.input_schema.clone(),
            security_requirements: vec![],
            compatibility_versions: vec![],
        })
        .collect();

    let now = chrono::Utc::now();
    let agent = Agent {
        agent_id: req.agent_id.clone(),
        agent_type,
        name,
        namespace: req.namespace.clone(),
        version: req.version.clone(),
        endpoint,
        labels: HashMap::new(),
        status: AgentStatus::Pending,
        created_at: now,
        updated_at: now,
        last_heartbeat: None,
        resource_version: "0".to_string(),
        health_interval: 30,
        timeout_threshold,
        eviction_threshold,
        tools,
        capabilities,
    };

    let stored = state.store().register_or_update(&agent).await?;
    let updated = state.store().update_heartbeat(&stored.agent_id).await?;
    state.publish(ChangeEvent {
        event_type: ChangeEventType::Modified,
        agent_id: updated.agent_id.clone(),
        timestamp: now,
        resource_version: updated.resource_version.clone(),
        object: json!(updated),
    });
    metrics::record_registration(&updated.agent_type);
    metrics::record_heartbeat(&updated.agent_type);

    let dependencies_resolved = resolve_dependencies_for_tools(&state, &updated).await?;
    let topology_hash = hash_dependencies_resolved(&dependencies_resolved);
    state
        .inner
        .topology_hashes
        .write()
        .await
        .insert(updated.agent_id.clone(), topology_hash);

    info!(agent_id = %updated.agent_id, "heartbeat processed");
    Ok(Json(HeartbeatResponseWire {
        status: "success".to_string(),
        message: "heartbeat processed".to_string(),
        agent_id: updated.agent_id,
        dependencies_resolved,
    }))
}

/// Resolves every tool's declared dependencies in declared order, preserving
/// unavailable slots so positional (`dep_<i>`) addressing on the client side
/// stays aligned with what was registered.
async fn resolve_dependencies_for_tools(
    state: &AppState,
    agent: &Agent,
) -> Result<HashMap<String, Vec<ResolvedDependencyWire>>, ApiError> {
    let mut dependencies_resolved = HashMap::new();
    for tool in &agent.tools {
        if tool.dependencies.is_empty() {
            continue;
        }
        let resolved = resolve_all(state.store(), &tool.dependencies, &agent.namespace).await?;
        let wire: Vec<ResolvedDependencyWire> = resolved
            .into_iter()
            .map(|entry| match entry {
                ResolutionEntry::Available {
                    capability,
                    agent_id,
                    function_name,
                    endpoint,
                    ..
                } => ResolvedDependencyWire {
                    agent_id,
                    endpoint,
                    function_name,
                    capability,
                    status: "available".to_string(),
                    ttl: agent.health_interval as u64,
                },
                ResolutionEntry::Unavailable { capability } => ResolvedDependencyWire {
                    agent_id: String::new(),
                    endpoint: String::new(),
                    function_name: String::new(),
                    capability,
                    status: "unavailable".to_string(),
                    ttl: 0,
                },
            })
            .collect();
        dependencies_resolved.insert(tool.function_name.clone(), wire);
    }
    Ok(dependencies_resolved)
}

/// Canonicalizes the resolution map (sorted keys, at every level) to a JSON
/// string and truncates a SHA-256 digest to 16 hex chars, mirroring the
/// hashing scheme the client side uses to detect dependency-topology changes.
fn hash_dependencies_resolved(resolved: &HashMap<String, Vec<ResolvedDependencyWire>>) -> String {
    let canonical: BTreeMap<&String, Vec<serde_json::Value>> = resolved
        .iter()
        .map(|(k, v)| {
            let entries = v
                .iter()
                .map(|w| {
                    json!({
                        "agent_id": w.agent_id,
                        "endpoint": w.endpoint,
                        "function_name": w.function_name,
                        "capability": w.capability,
                        "status": w.status,
                    })
                })
                .collect();
            (k, entries)
        })
        .collect();
    let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(canonical_json.as_bytes());
    hex::encode(digest)[..16].to_string()
}

async fn fast_heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> StatusCode {
    let agent = match state.store().get_agent(&agent_id).await {
        Ok(agent) => agent,
        Err(_) => return StatusCode::GONE,
    };
    if agent.status == AgentStatus::Expired || agent.status == AgentStatus::Offline {
        return StatusCode::GONE;
    }

    let current_hash = match resolve_dependencies_for_tools(&state, &agent).await {
        Ok(resolved) => Some(hash_dependencies_resolved(&resolved)),
        Err(_) => None,
    };

    if state.store().update_heartbeat(&agent_id).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let Some(current_hash) = current_hash else {
        return StatusCode::OK;
    };
    let previous = state.inner.topology_hashes.read().await.get(&agent_id).cloned();
    match previous {
        Some(previous) if previous != current_hash => StatusCode::ACCEPTED,
        Some(_) => StatusCode::OK,
        None => StatusCode::OK,
    }
}

#[derive(Debug, Deserialize)]
struct ListAgentsQuery {
    namespace: Option<String>,
    status: Option<String>,
    capability: Option<String>,
}

async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<Json<Vec<Agent>>, ApiError> {
    let status = match query.status {
        Some(s) => AgentStatus::parse(&s)?,
        None => AgentStatus::Healthy,
    };
    let filter = AgentFilter {
        namespace: query.namespace,
        status: Some(status),
        capability: query.capability,
        labels: HashMap::new(),
    };
    let agents = state.store().list_agents(&filter).await?;
    Ok(Json(agents))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.store().get_agent(&agent_id).await?))
}

async fn unregister_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let agent = state.store().get_agent(&agent_id).await?;
    state.store().unregister(&agent_id).await?;
    state.inner.topology_hashes.write().await.remove(&agent_id);
    state.publish(ChangeEvent {
        event_type: ChangeEventType::Deleted,
        agent_id: agent.agent_id,
        timestamp: chrono::Utc::now(),
        resource_version: agent.resource_version,
        object: json!(null),
    });
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CapabilitySearchQuery {
    name: Option<String>,
    description_contains: Option<String>,
    category: Option<String>,
    tags: Option<String>,
    stability: Option<String>,
    version_constraint: Option<String>,
    #[serde(default)]
    fuzzy_match: bool,
    #[serde(default)]
    include_deprecated: bool,
    agent_namespace: Option<String>,
    agent_status: Option<String>,
}

#[derive(Debug, Serialize)]
struct CapabilityRecord {
    name: String,
    version: String,
    description: Option<String>,
    tags: Vec<String>,
    category: Option<String>,
    stability: &'static str,
    agent_id: String,
    agent_name: String,
}

async fn list_capabilities(
    State(state): State<AppState>,
    Query(query): Query<CapabilitySearchQuery>,
) -> Result<Json<Vec<CapabilityRecord>>, ApiError> {
    let status = match &query.agent_status {
        Some(s) => Some(AgentStatus::parse(s)?),
        None => Some(AgentStatus::Healthy),
    };
    let filter = AgentFilter {
        namespace: query.agent_namespace.clone(),
        status,
        capability: None,
        labels: HashMap::new(),
    };

    let wanted_tags: Vec<String> = query
        .tags
        .as_deref()
        .map(|csv| csv.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let wanted_stability = query.stability.as_deref().map(Stability::parse).transpose()?;
    let version_constraint = query.version_constraint.as_deref().map(Constraint::parse).transpose()?;

    let agents = state.store().list_agents(&filter).await?;
    let mut records = Vec::new();
    for agent in &agents {
        for cap in &agent.capabilities {
            if !query.include_deprecated && cap.stability == Stability::Deprecated {
                continue;
            }
            if let Some(name) = &query.name {
                let matches = if query.fuzzy_match {
                    cap.name.to_lowercase().contains(&name.to_lowercase())
                } else {
                    cap.name == *name
                };
                if !matches {
                    continue;
                }
            }
            if let Some(substr) = &query.description_contains {
                let found = cap
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&substr.to_lowercase()));
                if !found {
                    continue;
                }
            }
            if let Some(category) = &query.category {
                if cap.category.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            if !wanted_tags.is_empty() {
                let cap_tags: Vec<String> = cap.tags.iter().map(|t| t.to_lowercase()).collect();
                if !wanted_tags.iter().all(|t| cap_tags.contains(t)) {
                    continue;
                }
            }
            if let Some(stability) = wanted_stability {
                if cap.stability != stability {
                    continue;
                }
            }
            if let Some(constraint) = &version_constraint {
                match Version::parse(&cap.version) {
                    Ok(version) if constraint.satisfies(&version) => {}
                    _ => continue,
                }
            }

            records.push(CapabilityRecord {
                name: cap.name.clone(),
                version: cap.version.clone(),
                description: cap.description.clone(),
                tags: cap.tags.clone(),
                category: cap.category.clone(),
                stability: cap.stability.as_str(),
                agent_id: agent.agent_id.clone(),
                agent_name: agent.name.clone(),
            });
        }
    }

    Ok(Json(records))
}

async fn agent_health(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = state.store().get_agent(&agent_id).await?;
    let time_since_heartbeat = agent
        .last_heartbeat
        .map(|t| (chrono::Utc::now() - t).num_seconds().max(0));
    let is_expired = agent.status == AgentStatus::Expired || agent.status == AgentStatus::Offline;
    let message = match time_since_heartbeat {
        Some(secs) => format!("last heartbeat {secs}s ago, status {}", agent.status.as_str()),
        None => format!("no heartbeat received yet, status {}", agent.status.as_str()),
    };
    Ok(Json(json!({
        "agent_id": agent.agent_id,
        "status": agent.status.as_str(),
        "last_heartbeat": agent.last_heartbeat,
        "time_since_heartbeat": time_since_heartbeat,
        "timeout_threshold": agent.timeout_threshold,
        "eviction_threshold": agent.eviction_threshold,
        "is_expired": is_expired,
        "message": message,
    })))
}

async fn registry_metrics(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let mut stats = state.store().stats().await?;
    if let Some(obj) = stats.as_object_mut() {
        obj.insert(
            "uptime_seconds".to_string(),
            json!(state.inner.started_at.elapsed().as_secs()),
        );
    }
    Ok(Json(stats))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.inner.metrics.render();
    ([("content-type", "text/plain; version=0.0.4")], body)
}

async fn watch(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.inner.watch_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|data| Ok(Event::default().event(event_type_name(&event.event_type)).data(data))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_type_name(t: &ChangeEventType) -> &'static str {
    match t {
        ChangeEventType::Added => "ADDED",
        ChangeEventType::Modified => "MODIFIED",
        ChangeEventType::Deleted => "DELETED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes_test.db");
        std::mem::forget(dir);
        let store = Store::connect(&StoreConfig {
            database_path: path.to_string_lossy().to_string(),
            max_connections: 5,
        })
        .await
        .unwrap();
        AppState::new(store)
    }

    #[tokio::test]
    async fn heartbeat_registers_and_returns_agent_id() {
        let state = test_state().await;
        let router = build_router(state);

        let body = json!({
            "agent_id": "hello-world-abc123",
            "name": "hello-world",
            "version": "1.0.0",
            "http_host": "localhost",
            "http_port": 9000,
            "namespace": "default",
            "tools": [{
                "function_name": "greet",
                "capability": "greeting",
                "version": "1.0.0"
            }]
        });

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/agents/heartbeat")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["agent_id"], "hello-world-abc123");
    }

    #[tokio::test]
    async fn get_unknown_agent_returns_404() {
        let state = test_state().await;
        let router = build_router(state);

        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/agents/does-not-exist")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
