//! Registry-side data model: Agent, Capability, Tool, Dependency, and the
//! resolution/change-event records the HTTP surface exchanges.
//!
//! Grounded on `original_source/src/mcp_mesh/server/models.py`'s
//! `AgentRegistration`/`AgentCapability` for field set and validation rules,
//! reshaped into the tagged-variant style spec's Design Notes call for in
//! place of the source's untyped dicts.

use crate::error::MeshError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn agent_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap())
}

fn capability_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap())
}

pub fn validate_agent_name(name: &str) -> Result<(), MeshError> {
    if name.len() > 63 || !agent_name_re().is_match(name) {
        return Err(MeshError::Validation(format!(
            "agent name '{name}' must be lowercase alphanumeric with hyphens, 1-63 chars, start/end alphanumeric"
        )));
    }
    Ok(())
}

pub fn validate_namespace(namespace: &str) -> Result<(), MeshError> {
    if namespace.len() > 63 || !agent_name_re().is_match(namespace) {
        return Err(MeshError::Validation(format!(
            "namespace '{namespace}' must be lowercase alphanumeric with hyphens, 1-63 chars"
        )));
    }
    Ok(())
}

pub fn validate_capability_name(name: &str) -> Result<(), MeshError> {
    if !capability_name_re().is_match(name) {
        return Err(MeshError::Validation(format!(
            "capability name '{name}' must start with a letter and contain only letters, digits, '_', '-'"
        )));
    }
    Ok(())
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), MeshError> {
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(MeshError::Validation(format!(
            "endpoint '{endpoint}' must be a valid HTTP/HTTPS URL"
        )));
    }
    Ok(())
}

/// Stability level of a `Capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Beta,
    Alpha,
    Deprecated,
}

impl Default for Stability {
    fn default() -> Self {
        Self::Stable
    }
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Alpha => "alpha",
            Self::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MeshError> {
        match s {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "alpha" => Ok(Self::Alpha),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(MeshError::Validation(format!("unknown stability '{other}'"))),
        }
    }
}

/// A capability an agent provides. Fields `security_requirements` and
/// `compatibility_versions` are persisted verbatim but never consulted by
/// the resolution engine — spec.md §9 flags these explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stability: Stability,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub security_requirements: Vec<String>,
    #[serde(default)]
    pub compatibility_versions: Vec<String>,
}

/// A declared dependency on a capability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Dependency {
    pub capability: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version_constraint: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A function an agent exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub function_name: String,
    /// Empty/None means the tool exposes itself but advertises no capability.
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Healthy,
    Degraded,
    Expired,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Expired => "expired",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MeshError> {
        match s {
            "pending" => Ok(Self::Pending),
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "expired" => Ok(Self::Expired),
            "offline" => Ok(Self::Offline),
            other => Err(MeshError::Validation(format!("unknown agent status '{other}'"))),
        }
    }
}

/// Canonical record for one registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub agent_type: String,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub status: AgentStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    /// Opaque monotonic token; generated from a millisecond epoch but
    /// consumers must treat it as an opaque string, not a number.
    pub resource_version: String,
    pub health_interval: u32,
    pub timeout_threshold: u32,
    pub eviction_threshold: u32,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Agent {
    pub fn validate(&self) -> Result<(), MeshError> {
        validate_agent_name(&self.name)?;
        validate_namespace(&self.namespace)?;
        validate_endpoint(&self.endpoint)?;
        for cap in &self.capabilities {
            validate_capability_name(&cap.name)?;
        }
        Ok(())
    }
}

/// Default timeout/eviction thresholds per agent_type, matching
/// `original_source/.../models.py`'s `HealthConfiguration.agent_type_configs`.
pub fn default_thresholds(agent_type: &str) -> (u32, u32) {
    match agent_type {
        "file-agent" => (90, 180),
        "worker" => (45, 90),
        "critical" => (30, 60),
        _ => (60, 120),
    }
}

/// One resolved dependency slot in a heartbeat response, per spec.md §4.B/§4.F.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionEntry {
    Available {
        capability: String,
        agent_id: String,
        function_name: String,
        endpoint: String,
        #[serde(default)]
        kwargs: HashMap<String, String>,
    },
    Unavailable {
        capability: String,
    },
}

impl ResolutionEntry {
    pub fn capability(&self) -> &str {
        match self {
            ResolutionEntry::Available { capability, .. } => capability,
            ResolutionEntry::Unavailable { capability } => capability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Added,
    Modified,
    Deleted,
}

/// Append-only change event, the unit the watch stream and health monitor
/// emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    pub agent_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub resource_version: String,
    pub object: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_validation() {
        assert!(validate_agent_name("hello-world").is_ok());
        assert!(validate_agent_name("Hello").is_err());
        assert!(validate_agent_name("-leading-hyphen").is_err());
        assert!(validate_agent_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn capability_name_validation() {
        assert!(validate_capability_name("greeting").is_ok());
        assert!(validate_capability_name("Greeting_v2").is_ok());
        assert!(validate_capability_name("2fast").is_err());
    }

    #[test]
    fn endpoint_validation_requires_scheme() {
        assert!(validate_endpoint("http://host:8080").is_ok());
        assert!(validate_endpoint("host:8080").is_err());
    }

    #[test]
    fn resolution_entry_serializes_tagged() {
        let entry = ResolutionEntry::Unavailable {
            capability: "info".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["capability"], "info");
    }

    #[test]
    fn default_thresholds_match_agent_type_table() {
        assert_eq!(default_thresholds("critical"), (30, 60));
        assert_eq!(default_thresholds("unknown-type"), (60, 120));
    }
}
