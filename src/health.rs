//! The health monitor: a background reaper that walks live agents each tick
//! and advances anyone past their timeout/eviction thresholds.
//!
//! State machine grounded on `original_source/src/mcp_mesh/server/models.py`'s
//! `AgentRegistration.status` transitions (`pending -> healthy -> degraded ->
//! expired -> offline`) and `HealthConfiguration.check_interval`; the timer
//! task shape is grounded on the teacher's `health_monitor`-style background
//! task spawned alongside the HTTP server.

use crate::model::AgentStatus;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Runs until the process exits; intended to be spawned as a background
/// tokio task alongside the HTTP server.
pub async fn run(store: Arc<Store>, config: HealthMonitorConfig) {
    let mut ticker = tokio::time::interval(config.check_interval);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&store).await {
            warn!(error = %err, "health sweep failed");
        }
    }
}

/// One reaper pass: computes the next status for every `healthy`/`degraded`
/// agent based on elapsed time since `last_heartbeat`, and applies any
/// transitions in bulk per target status.
#[instrument(skip(store))]
pub async fn sweep(store: &Store) -> Result<usize, crate::error::MeshError> {
    let agents = store.list_live_agents().await?;
    let now = Utc::now();

    let mut to_degrade = Vec::new();
    let mut to_expire = Vec::new();

    for agent in &agents {
        let Some(last_heartbeat) = agent.last_heartbeat else {
            continue;
        };
        let elapsed = (now - last_heartbeat).num_seconds().max(0) as u64;

        if elapsed >= agent.eviction_threshold as u64 {
            if agent.status != AgentStatus::Expired {
                to_expire.push(agent.agent_id.clone());
            }
        } else if elapsed >= agent.timeout_threshold as u64 {
            if agent.status != AgentStatus::Degraded {
                to_degrade.push(agent.agent_id.clone());
            }
        }
    }

    let transitioned = to_degrade.len() + to_expire.len();
    if !to_degrade.is_empty() {
        info!(count = to_degrade.len(), "marking agents degraded");
        store.mark_unhealthy(&to_degrade, AgentStatus::Degraded).await?;
    }
    if !to_expire.is_empty() {
        info!(count = to_expire.len(), "marking agents expired");
        store.mark_unhealthy(&to_expire, AgentStatus::Expired).await?;
    }
    Ok(transitioned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, Capability, Stability};
    use crate::store::StoreConfig;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;

    async fn test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health_test.db");
        std::mem::forget(dir);
        Store::connect(&StoreConfig {
            database_path: path.to_string_lossy().to_string(),
            max_connections: 5,
        })
        .await
        .unwrap()
    }

    fn agent_with_thresholds(id: &str, timeout: u32, eviction: u32) -> Agent {
        let now = Utc::now();
        Agent {
            agent_id: id.to_string(),
            agent_type: "default".to_string(),
            name: id.to_string(),
            namespace: "default".to_string(),
            version: "1.0.0".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            labels: HashMap::new(),
            status: AgentStatus::Pending,
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
            resource_version: "0".to_string(),
            health_interval: 30,
            timeout_threshold: timeout,
            eviction_threshold: eviction,
            tools: vec![],
            capabilities: vec![Capability {
                name: "greeting".to_string(),
                version: "1.0.0".to_string(),
                description: None,
                tags: vec![],
                category: None,
                stability: Stability::Stable,
                input_schema: None,
                security_requirements: vec![],
                compatibility_versions: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn stale_heartbeat_degrades_then_expires() {
        let store = test_store().await;
        let agent = agent_with_thresholds("stale-1", 60, 120);
        store.register_or_update(&agent).await.unwrap();
        store.update_heartbeat("stale-1").await.unwrap();

        // backdate the heartbeat past the timeout threshold but not eviction
        sqlx_backdate(&store, "stale-1", 90).await;
        sweep(&store).await.unwrap();
        let updated = store.get_agent("stale-1").await.unwrap();
        assert_eq!(updated.status, AgentStatus::Degraded);

        sqlx_backdate(&store, "stale-1", 150).await;
        sweep(&store).await.unwrap();
        let updated = store.get_agent("stale-1").await.unwrap();
        assert_eq!(updated.status, AgentStatus::Expired);
    }

    #[tokio::test]
    async fn fresh_heartbeat_is_left_alone() {
        let store = test_store().await;
        let agent = agent_with_thresholds("fresh-1", 60, 120);
        store.register_or_update(&agent).await.unwrap();
        store.update_heartbeat("fresh-1").await.unwrap();

        let transitioned = sweep(&store).await.unwrap();
        assert_eq!(transitioned, 0);
        let updated = store.get_agent("fresh-1").await.unwrap();
        assert_eq!(updated.status, AgentStatus::Healthy);
    }

    async fn sqlx_backdate(store: &Store, agent_id: &str, seconds_ago: i64) {
        let backdated = Utc::now() - ChronoDuration::seconds(seconds_ago);
        let pool = store.raw_pool_for_tests();
        sqlx::query("UPDATE agents SET last_heartbeat = ? WHERE id = ?")
            .bind(backdated)
            .bind(agent_id)
            .execute(pool)
            .await
            .unwrap();
    }
}
