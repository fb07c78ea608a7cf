//! Registry service entry point: persistent store, health monitor reaper,
//! and the axum HTTP surface, wired together and served until shutdown.
//!
//! Bind/serve/graceful-shutdown sequence grounded on
//! `FlexNetOS-noa_ark_os/server/api/src/lib.rs`'s `ApiServer::run`.

use mcp_mesh::config::{resolve_config, resolve_config_int, ConfigKey};
use mcp_mesh::health::{self, HealthMonitorConfig};
use mcp_mesh::server::{build_router, AppState};
use mcp_mesh::store::{Store, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = resolve_config(ConfigKey::RegistryHost, None).unwrap_or_else(|| "0.0.0.0".to_string());
    let port = resolve_config_int(ConfigKey::RegistryPort, None).unwrap_or(8000) as u16;
    let db_path = resolve_config(ConfigKey::DbPath, None).unwrap_or_else(|| "mcp_mesh_registry.db".to_string());
    let check_interval = resolve_config_int(ConfigKey::HealthCheckInterval, None).unwrap_or(30) as u64;

    let store = Store::connect(&StoreConfig {
        database_path: db_path,
        ..Default::default()
    })
    .await?;

    let health_store = Arc::new(store.clone());
    tokio::spawn(health::run(
        health_store,
        HealthMonitorConfig {
            check_interval: Duration::from_secs(check_interval),
        },
    ));

    let app = build_router(AppState::new(store));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "registry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
