//! The persistent store: agents, capabilities, health events, and change
//! events, backed by an embedded SQLite database.
//!
//! Schema and index list are grounded directly on
//! `original_source/src/mcp_mesh/server/database.py`'s `DatabaseSchema`.
//! Rather than hand-roll the Python source's LIFO connection-pool list, this
//! module uses `sqlx::SqlitePool` configured with the same bound (≤10
//! connections) — `sqlx` already does the pooling the source implements by
//! hand.

use crate::error::MeshError;
use crate::model::{
    Agent, AgentStatus, Capability, ChangeEvent, ChangeEventType, Stability, Tool,
};
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL DEFAULT 'default',
        agent_type TEXT NOT NULL DEFAULT 'default',
        version TEXT NOT NULL DEFAULT '1.0.0',
        endpoint TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        labels TEXT NOT NULL DEFAULT '{}',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        resource_version TEXT NOT NULL,
        last_heartbeat TIMESTAMP,
        health_interval INTEGER NOT NULL DEFAULT 30,
        timeout_threshold INTEGER NOT NULL DEFAULT 60,
        eviction_threshold INTEGER NOT NULL DEFAULT 120,
        tools TEXT NOT NULL DEFAULT '[]',
        UNIQUE(name, namespace)
    )",
    "CREATE TABLE IF NOT EXISTS capabilities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        version TEXT NOT NULL DEFAULT '1.0.0',
        tags TEXT NOT NULL DEFAULT '[]',
        category TEXT,
        stability TEXT NOT NULL DEFAULT 'stable',
        input_schema TEXT,
        security_requirements TEXT NOT NULL DEFAULT '[]',
        compatibility_versions TEXT NOT NULL DEFAULT '[]',
        FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE,
        UNIQUE(agent_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS agent_health (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        status TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT 'heartbeat',
        timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS registry_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        resource_version TEXT NOT NULL,
        data TEXT
    )",
];

const INDEX_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_agents_namespace ON agents(namespace)",
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
    "CREATE INDEX IF NOT EXISTS idx_agents_heartbeat ON agents(last_heartbeat)",
    "CREATE INDEX IF NOT EXISTS idx_capabilities_name ON capabilities(name)",
    "CREATE INDEX IF NOT EXISTS idx_capabilities_agent ON capabilities(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_capabilities_composite ON capabilities(name, agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_health_agent_ts ON agent_health(agent_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON registry_events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_type_timestamp ON registry_events(event_type, timestamp)",
];

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "mcp_mesh_registry.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct AgentFilter {
    pub namespace: Option<String>,
    pub status: Option<AgentStatus>,
    pub capability: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Escape hatch for integration tests that need to manipulate rows
    /// directly (e.g. back-dating `last_heartbeat` to exercise the reaper
    /// without sleeping for real thresholds).
    pub fn raw_pool_for_tests(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(config))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, MeshError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database_path))
            .map_err(|e| MeshError::Internal(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), MeshError> {
        for stmt in SCHEMA_SQL {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        for stmt in INDEX_SQL {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    fn now_ms_resource_version() -> String {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        ms.to_string()
    }

    /// Upsert by `agent_id`; replaces the capability set atomically; emits
    /// `MODIFIED`. Matches `database.py`'s `register_agent`.
    #[instrument(skip(self, agent))]
    pub async fn register_or_update(&self, agent: &Agent) -> Result<Agent, MeshError> {
        agent.validate()?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT name, namespace FROM agents WHERE name = ? AND namespace = ? AND id != ?")
                .bind(&agent.name)
                .bind(&agent.namespace)
                .bind(&agent.agent_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(MeshError::Conflict(format!(
                "agent '{}' in namespace '{}' already registered under a different agent_id",
                agent.name, agent.namespace
            )));
        }

        let now = Utc::now();
        let resource_version = Self::now_ms_resource_version();
        let labels_json = serde_json::to_string(&agent.labels)?;
        let tools_json = serde_json::to_string(&agent.tools)?;

        sqlx::query(
            "INSERT INTO agents (id, name, namespace, agent_type, version, endpoint, status,
                labels, created_at, updated_at, resource_version, last_heartbeat,
                health_interval, timeout_threshold, eviction_threshold, tools)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, namespace=excluded.namespace, agent_type=excluded.agent_type,
                version=excluded.version, endpoint=excluded.endpoint, labels=excluded.labels,
                updated_at=excluded.updated_at, resource_version=excluded.resource_version,
                health_interval=excluded.health_interval, timeout_threshold=excluded.timeout_threshold,
                eviction_threshold=excluded.eviction_threshold, tools=excluded.tools",
        )
        .bind(&agent.agent_id)
        .bind(&agent.name)
        .bind(&agent.namespace)
        .bind(&agent.agent_type)
        .bind(&agent.version)
        .bind(&agent.endpoint)
        .bind(agent.status.as_str())
        .bind(&labels_json)
        .bind(now)
        .bind(now)
        .bind(&resource_version)
        .bind(agent.last_heartbeat)
        .bind(agent.health_interval)
        .bind(agent.timeout_threshold)
        .bind(agent.eviction_threshold)
        .bind(&tools_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM capabilities WHERE agent_id = ?")
            .bind(&agent.agent_id)
            .execute(&mut *tx)
            .await?;
        for cap in &agent.capabilities {
            sqlx::query(
                "INSERT INTO capabilities (agent_id, name, description, version, tags, category,
                    stability, input_schema, security_requirements, compatibility_versions)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&agent.agent_id)
            .bind(&cap.name)
            .bind(&cap.description)
            .bind(&cap.version)
            .bind(serde_json::to_string(&cap.tags)?)
            .bind(&cap.category)
            .bind(serde_json::to_string(&cap.stability)?.trim_matches('"'))
            .bind(cap.input_schema.as_ref().map(|v| v.to_string()))
            .bind(serde_json::to_string(&cap.security_requirements)?)
            .bind(serde_json::to_string(&cap.compatibility_versions)?)
            .execute(&mut *tx)
            .await?;
        }

        let stored = self.get_agent_tx(&mut tx, &agent.agent_id).await?;
        self.emit_event_tx(&mut tx, ChangeEventType::Modified, &stored, &resource_version)
            .await?;

        tx.commit().await?;
        Ok(stored)
    }

    /// Delete + emit `DELETED`; `not_found` if absent.
    #[instrument(skip(self))]
    pub async fn unregister(&self, agent_id: &str) -> Result<(), MeshError> {
        let mut tx = self.pool.begin().await?;
        let agent = self.get_agent_tx(&mut tx, agent_id).await?;
        let resource_version = Self::now_ms_resource_version();
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        self.emit_event_tx(&mut tx, ChangeEventType::Deleted, &agent, &resource_version)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, MeshError> {
        let mut conn = self.pool.acquire().await?;
        self.get_agent_conn(&mut conn, agent_id).await
    }

    async fn get_agent_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        agent_id: &str,
    ) -> Result<Agent, MeshError> {
        let row = sqlx::query(
            "SELECT id, name, namespace, agent_type, version, endpoint, status, labels,
                created_at, updated_at, resource_version, last_heartbeat,
                health_interval, timeout_threshold, eviction_threshold, tools
             FROM agents WHERE id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| MeshError::NotFound(format!("agent '{agent_id}'")))?;

        let caps = sqlx::query(
            "SELECT name, description, version, tags, category, stability, input_schema,
                security_requirements, compatibility_versions
             FROM capabilities WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_all(&mut **tx)
        .await?;

        row_to_agent(row, caps)
    }

    async fn get_agent_conn(
        &self,
        conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
        agent_id: &str,
    ) -> Result<Agent, MeshError> {
        let row = sqlx::query(
            "SELECT id, name, namespace, agent_type, version, endpoint, status, labels,
                created_at, updated_at, resource_version, last_heartbeat,
                health_interval, timeout_threshold, eviction_threshold, tools
             FROM agents WHERE id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&mut **conn)
        .await?
        .ok_or_else(|| MeshError::NotFound(format!("agent '{agent_id}'")))?;

        let caps = sqlx::query(
            "SELECT name, description, version, tags, category, stability, input_schema,
                security_requirements, compatibility_versions
             FROM capabilities WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_all(&mut **conn)
        .await?;

        row_to_agent(row, caps)
    }

    pub async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, MeshError> {
        let mut sql = String::from(
            "SELECT id, name, namespace, agent_type, version, endpoint, status, labels,
                created_at, updated_at, resource_version, last_heartbeat,
                health_interval, timeout_threshold, eviction_threshold, tools
             FROM agents WHERE 1=1",
        );
        if filter.namespace.is_some() {
            sql.push_str(" AND namespace = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.capability.is_some() {
            sql.push_str(" AND id IN (SELECT agent_id FROM capabilities WHERE name = ?)");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ns) = &filter.namespace {
            query = query.bind(ns);
        }
        if let Some(status) = &filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(cap) = &filter.capability {
            query = query.bind(cap);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut agents = Vec::with_capacity(rows.len());
        for row in rows {
            let agent_id: String = row.get("id");
            let caps = sqlx::query(
                "SELECT name, description, version, tags, category, stability, input_schema,
                    security_requirements, compatibility_versions
                 FROM capabilities WHERE agent_id = ?",
            )
            .bind(&agent_id)
            .fetch_all(&self.pool)
            .await?;
            let agent = row_to_agent(row, caps)?;
            if !filter.labels.is_empty()
                && !filter
                    .labels
                    .iter()
                    .all(|(k, v)| agent.labels.get(k) == Some(v))
            {
                continue;
            }
            agents.push(agent);
        }
        Ok(agents)
    }

    /// Sets `last_heartbeat=now`, `status=healthy`, bumps `resource_version`;
    /// appends a health event with source `heartbeat`; emits `MODIFIED`.
    #[instrument(skip(self))]
    pub async fn update_heartbeat(&self, agent_id: &str) -> Result<Agent, MeshError> {
        let mut tx = self.pool.begin().await?;
        let existing = self.get_agent_tx(&mut tx, agent_id).await?;
        let _ = existing;
        let now = Utc::now();
        let resource_version = Self::now_ms_resource_version();

        sqlx::query(
            "UPDATE agents SET last_heartbeat = ?, status = 'healthy', updated_at = ?, resource_version = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(&resource_version)
        .bind(agent_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO agent_health (agent_id, status, source) VALUES (?, 'healthy', 'heartbeat')")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        let updated = self.get_agent_tx(&mut tx, agent_id).await?;
        self.emit_event_tx(&mut tx, ChangeEventType::Modified, &updated, &resource_version)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Returns `agent_id`s of `healthy` providers of `capability`, never
    /// `degraded`/`expired`. Matches `database.py`'s
    /// `find_agents_by_capability`.
    pub async fn find_providers(&self, capability: &str) -> Result<Vec<Agent>, MeshError> {
        let rows = sqlx::query(
            "SELECT DISTINCT a.id, a.name, a.namespace, a.agent_type, a.version, a.endpoint,
                a.status, a.labels, a.created_at, a.updated_at, a.resource_version,
                a.last_heartbeat, a.health_interval, a.timeout_threshold, a.eviction_threshold, a.tools
             FROM agents a
             JOIN capabilities c ON c.agent_id = a.id
             WHERE c.name = ? AND a.status = 'healthy'",
        )
        .bind(capability)
        .fetch_all(&self.pool)
        .await?;

        let mut agents = Vec::with_capacity(rows.len());
        for row in rows {
            let agent_id: String = row.get("id");
            let caps = sqlx::query(
                "SELECT name, description, version, tags, category, stability, input_schema,
                    security_requirements, compatibility_versions
                 FROM capabilities WHERE agent_id = ?",
            )
            .bind(&agent_id)
            .fetch_all(&self.pool)
            .await?;
            agents.push(row_to_agent(row, caps)?);
        }
        Ok(agents)
    }

    /// Bulk transition for the reaper.
    #[instrument(skip(self, agent_ids))]
    pub async fn mark_unhealthy(
        &self,
        agent_ids: &[String],
        new_status: AgentStatus,
    ) -> Result<(), MeshError> {
        if agent_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for agent_id in agent_ids {
            let resource_version = Self::now_ms_resource_version();
            sqlx::query("UPDATE agents SET status = ?, updated_at = ?, resource_version = ? WHERE id = ?")
                .bind(new_status.as_str())
                .bind(Utc::now())
                .bind(&resource_version)
                .bind(agent_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO agent_health (agent_id, status, source) VALUES (?, ?, 'timeout')")
                .bind(agent_id)
                .bind(new_status.as_str())
                .execute(&mut *tx)
                .await?;
            let agent = self.get_agent_tx(&mut tx, agent_id).await?;
            self.emit_event_tx(&mut tx, ChangeEventType::Modified, &agent, &resource_version)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// `status ∈ {healthy, degraded}` agents, for the reaper's tick.
    pub async fn list_live_agents(&self) -> Result<Vec<Agent>, MeshError> {
        let rows = sqlx::query(
            "SELECT id, name, namespace, agent_type, version, endpoint, status, labels,
                created_at, updated_at, resource_version, last_heartbeat,
                health_interval, timeout_threshold, eviction_threshold, tools
             FROM agents WHERE status IN ('healthy', 'degraded')",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut agents = Vec::with_capacity(rows.len());
        for row in rows {
            agents.push(row_to_agent(row, Vec::new())?);
        }
        Ok(agents)
    }

    async fn emit_event_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        event_type: ChangeEventType,
        agent: &Agent,
        resource_version: &str,
    ) -> Result<(), MeshError> {
        let data = json!(agent);
        sqlx::query(
            "INSERT INTO registry_events (event_type, agent_id, resource_version, data) VALUES (?, ?, ?, ?)",
        )
        .bind(serde_json::to_string(&event_type)?.trim_matches('"'))
        .bind(&agent.agent_id)
        .bind(resource_version)
        .bind(data.to_string())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn recent_events(&self, since_resource_version: Option<&str>) -> Result<Vec<ChangeEvent>, MeshError> {
        let rows = if let Some(rv) = since_resource_version {
            sqlx::query(
                "SELECT event_type, agent_id, timestamp, resource_version, data FROM registry_events
                 WHERE resource_version > ? ORDER BY id ASC",
            )
            .bind(rv)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT event_type, agent_id, timestamp, resource_version, data FROM registry_events ORDER BY id ASC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| {
                let event_type: String = row.get("event_type");
                let data: String = row.get("data");
                Ok(ChangeEvent {
                    event_type: match event_type.as_str() {
                        "ADDED" => ChangeEventType::Added,
                        "DELETED" => ChangeEventType::Deleted,
                        _ => ChangeEventType::Modified,
                    },
                    agent_id: row.get("agent_id"),
                    timestamp: row.get("timestamp"),
                    resource_version: row.get("resource_version"),
                    object: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<serde_json::Value, MeshError> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;
        let healthy: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents WHERE status = 'healthy'")
            .fetch_one(&self.pool)
            .await?;
        let degraded: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents WHERE status = 'degraded'")
            .fetch_one(&self.pool)
            .await?;
        let expired: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents WHERE status = 'expired'")
            .fetch_one(&self.pool)
            .await?;
        let capabilities: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT name) FROM capabilities")
            .fetch_one(&self.pool)
            .await?;
        Ok(json!({
            "total_agents": total.0,
            "healthy_agents": healthy.0,
            "degraded_agents": degraded.0,
            "expired_agents": expired.0,
            "unique_capability_types": capabilities.0,
        }))
    }
}

fn row_to_agent(row: sqlx::sqlite::SqliteRow, cap_rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Agent, MeshError> {
    let labels_json: String = row.get("labels");
    let tools_json: String = row.get("tools");
    let status: String = row.get("status");

    let capabilities = cap_rows
        .into_iter()
        .map(|c| -> Result<Capability, MeshError> {
            let tags: String = c.get("tags");
            let stability: String = c.get("stability");
            let input_schema: Option<String> = c.get("input_schema");
            let security_requirements: String = c.get("security_requirements");
            let compatibility_versions: String = c.get("compatibility_versions");
            Ok(Capability {
                name: c.get("name"),
                version: c.get("version"),
                description: c.get("description"),
                tags: serde_json::from_str(&tags)?,
                category: c.get("category"),
                stability: match stability.as_str() {
                    "beta" => Stability::Beta,
                    "alpha" => Stability::Alpha,
                    "deprecated" => Stability::Deprecated,
                    _ => Stability::Stable,
                },
                input_schema: input_schema.and_then(|s| serde_json::from_str(&s).ok()),
                security_requirements: serde_json::from_str(&security_requirements)?,
                compatibility_versions: serde_json::from_str(&compatibility_versions)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tools: Vec<Tool> = serde_json::from_str(&tools_json)?;

    Ok(Agent {
        agent_id: row.get("id"),
        agent_type: row.get("agent_type"),
        name: row.get("name"),
        namespace: row.get("namespace"),
        version: row.get("version"),
        endpoint: row.get("endpoint"),
        labels: serde_json::from_str(&labels_json)?,
        status: AgentStatus::parse(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_heartbeat: row.get("last_heartbeat"),
        resource_version: row.get("resource_version"),
        health_interval: row.get::<i64, _>("health_interval") as u32,
        timeout_threshold: row.get::<i64, _>("timeout_threshold") as u32,
        eviction_threshold: row.get::<i64, _>("eviction_threshold") as u32,
        tools,
        capabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // leak the tempdir so the file survives for the pool's lifetime in the test
        std::mem::forget(dir);
        Store::connect(&StoreConfig {
            database_path: path.to_string_lossy().to_string(),
            max_connections: 5,
        })
        .await
        .unwrap()
    }

    fn sample_agent(id: &str, name: &str) -> Agent {
        let now = Utc::now();
        Agent {
            agent_id: id.to_string(),
            agent_type: "default".to_string(),
            name: name.to_string(),
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
            timeout_threshold: 60,
            eviction_threshold: 120,
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
    async fn register_then_heartbeat_marks_healthy() {
        let store = test_store().await;
        let agent = sample_agent("hello-abc12345", "hello");
        store.register_or_update(&agent).await.unwrap();

        let updated = store.update_heartbeat("hello-abc12345").await.unwrap();
        assert_eq!(updated.status, AgentStatus::Healthy);
        assert!(updated.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn duplicate_name_namespace_conflicts() {
        let store = test_store().await;
        let a = sample_agent("agent-one", "dup");
        let b = sample_agent("agent-two", "dup");
        store.register_or_update(&a).await.unwrap();
        let err = store.register_or_update(&b).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn find_providers_excludes_non_healthy() {
        let store = test_store().await;
        let agent = sample_agent("hello-abc12345", "hello");
        store.register_or_update(&agent).await.unwrap();

        let providers = store.find_providers("greeting").await.unwrap();
        assert!(providers.is_empty(), "pending agent should not be a provider");

        store.update_heartbeat("hello-abc12345").await.unwrap();
        let providers = store.find_providers("greeting").await.unwrap();
        assert_eq!(providers.len(), 1);
    }

    #[tokio::test]
    async fn unregister_removes_agent_and_cascades_capabilities() {
        let store = test_store().await;
        let agent = sample_agent("hello-abc12345", "hello");
        store.register_or_update(&agent).await.unwrap();
        store.unregister("hello-abc12345").await.unwrap();

        let err = store.get_agent("hello-abc12345").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
