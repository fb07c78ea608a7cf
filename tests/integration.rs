//! End-to-end scenarios from the registry spec, driven in-process against
//! axum's router via `tower::ServiceExt::oneshot` and a temp-file SQLite
//! store, per the pattern established in `src/server/routes.rs`'s own tests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mcp_mesh::server::{build_router, AppState};
use mcp_mesh::store::{Store, StoreConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn new_state() -> AppState {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("integration_test.db");
    std::mem::forget(dir);
    let store = Store::connect(&StoreConfig {
        database_path: path.to_string_lossy().to_string(),
        max_connections: 5,
    })
    .await
    .unwrap();
    AppState::new(store)
}

async fn post_heartbeat(router: &axum::Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/agents/heartbeat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, parsed)
}

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, parsed)
}

#[tokio::test]
async fn solo_agent_registers_and_is_discoverable() {
    let state = new_state().await;
    let router = build_router(state);

    let (status, body) = post_heartbeat(
        &router,
        json!({
            "agent_id": "hello-abc12345",
            "name": "hello",
            "version": "1.0.0",
            "http_host": "hello",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{
                "function_name": "greet",
                "capability": "greeting",
                "version": "1.0.0"
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_id"], "hello-abc12345");

    let (status, agents) = get_json(&router, "/agents?capability=greeting").await;
    assert_eq!(status, StatusCode::OK);
    let agents = agents.as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agent_id"], "hello-abc12345");
    assert_eq!(agents[0]["status"], "healthy");
}

#[tokio::test]
async fn dependency_resolves_once_provider_is_registered() {
    let state = new_state().await;
    let router = build_router(state);

    // system-* registers first, providing "info".
    post_heartbeat(
        &router,
        json!({
            "agent_id": "system-xyz",
            "name": "system",
            "version": "1.0.0",
            "http_host": "system",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{
                "function_name": "get_info",
                "capability": "info",
                "version": "1.0.0"
            }]
        }),
    )
    .await;

    // hello-* registers second, declaring a dependency on "info".
    let (status, body) = post_heartbeat(
        &router,
        json!({
            "agent_id": "hello-abc12345",
            "name": "hello",
            "version": "1.0.0",
            "http_host": "hello",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{
                "function_name": "greet",
                "capability": "greeting",
                "version": "1.0.0",
                "dependencies": [{"capability": "info"}]
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let resolved = &body["dependencies_resolved"]["greet"];
    let resolved = resolved.as_array().expect("greet dependency resolved");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["capability"], "info");
    assert_eq!(resolved[0]["agent_id"], "system-xyz");
    assert_eq!(resolved[0]["endpoint"], "http://system:8080");
    assert_eq!(resolved[0]["status"], "available");
}

#[tokio::test]
async fn provider_expiry_removes_it_from_resolution() {
    let state = new_state().await;
    let router = build_router(state.clone());

    post_heartbeat(
        &router,
        json!({
            "agent_id": "system-xyz",
            "name": "system",
            "version": "1.0.0",
            "http_host": "system",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{"function_name": "get_info", "capability": "info", "version": "1.0.0"}]
        }),
    )
    .await;

    // Back-date system-xyz's last_heartbeat past its eviction threshold
    // (default 120s for an unrecognized agent_type) and run the reaper.
    sqlx::query("UPDATE agents SET last_heartbeat = datetime('now', '-1000 seconds') WHERE id = ?")
        .bind("system-xyz")
        .execute(state.store().raw_pool_for_tests())
        .await
        .unwrap();
    mcp_mesh::health::sweep(state.store()).await.unwrap();

    let (_, providers) = get_json(&router, "/agents?capability=info").await;
    let providers = providers.as_array().unwrap();
    assert!(
        providers.iter().all(|a| a["status"] != "healthy"),
        "expired provider should no longer be healthy: {providers:?}"
    );

    let (status, body) = post_heartbeat(
        &router,
        json!({
            "agent_id": "hello-abc12345",
            "name": "hello",
            "version": "1.0.0",
            "http_host": "hello",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{
                "function_name": "greet",
                "capability": "greeting",
                "version": "1.0.0",
                "dependencies": [{"capability": "info"}]
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let resolved = body["dependencies_resolved"]["greet"]
        .as_array()
        .expect("greet dependency resolution recorded even when unavailable");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["status"], "unavailable");
    assert_eq!(resolved[0]["capability"], "info");
    assert_eq!(resolved[0]["endpoint"], "");
}

#[tokio::test]
async fn version_constraint_tie_break_picks_highest_satisfying_version() {
    let state = new_state().await;
    let router = build_router(state);

    for (agent_id, version) in [("math-v1", "1.0.0"), ("math-v2", "1.2.3"), ("math-v3", "2.0.0")] {
        post_heartbeat(
            &router,
            json!({
                "agent_id": agent_id,
                "name": agent_id,
                "version": "1.0.0",
                "http_host": agent_id,
                "http_port": 8080,
                "namespace": "default",
                "tools": [{"function_name": "compute", "capability": "math", "version": version}]
            }),
        )
        .await;
    }

    let (status, body) = post_heartbeat(
        &router,
        json!({
            "agent_id": "consumer-1",
            "name": "consumer",
            "version": "1.0.0",
            "http_host": "consumer",
            "http_port": 8080,
            "namespace": "default",
            "tools": [{
                "function_name": "add",
                "capability": "adder",
                "version": "1.0.0",
                "dependencies": [{"capability": "math", "version": "^1.0.0"}]
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let resolved = body["dependencies_resolved"]["add"].as_array().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["agent_id"], "math-v2");
}

#[tokio::test]
async fn unknown_agent_heartbeat_returns_404() {
    let state = new_state().await;
    let router = build_router(state);

    let request = Request::builder()
        .method("HEAD")
        .uri("/agents/heartbeat/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}
