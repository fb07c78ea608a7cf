//! The resolution engine: turns a declared `Dependency` into a concrete
//! provider, or an explicit `Unavailable` marker.
//!
//! Candidate gathering is grounded on `store.rs`'s `find_providers` (already
//! restricted to `healthy` agents); the tie-break order is grounded on
//! `original_source/src/mcp_mesh/server/models.py`'s `ServiceDiscoveryQuery`
//! and the registry's namespace-aware capability search.

use crate::error::MeshError;
use crate::model::{Agent, Dependency, ResolutionEntry, Tool};
use crate::semver_constraint::{Constraint, Version};
use crate::store::Store;
use std::collections::HashMap;
use tracing::instrument;

/// Resolves one dependency against the live agent set.
///
/// Tie-break order, applied in sequence until one candidate remains:
/// 1. Candidates in the same namespace as the requesting agent beat others.
/// 2. Higher capability version wins.
/// 3. Lexicographically smaller `agent_id` wins (deterministic final tie-break).
#[instrument(skip(store), fields(capability = %dependency.capability))]
pub async fn resolve_dependency(
    store: &Store,
    dependency: &Dependency,
    requesting_namespace: &str,
) -> Result<ResolutionEntry, MeshError> {
    let candidates = store.find_providers(&dependency.capability).await?;
    if candidates.is_empty() {
        return Ok(ResolutionEntry::Unavailable {
            capability: dependency.capability.clone(),
        });
    }

    let constraint = match &dependency.version_constraint {
        Some(c) => Some(Constraint::parse(c)?),
        None => None,
    };

    let mut scored: Vec<(Agent, crate::model::Capability, Version)> = Vec::new();
    for agent in candidates {
        if let Some(ns) = &dependency.namespace {
            if &agent.namespace != ns {
                continue;
            }
        }
        let mut matched = None;
        for cap in &agent.capabilities {
            if cap.name != dependency.capability {
                continue;
            }
            if !dependency.tags.is_empty() && !dependency.tags.iter().all(|t| cap.tags.contains(t)) {
                continue;
            }
            let version = match Version::parse(&cap.version) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(c) = &constraint {
                if !c.satisfies(&version) {
                    continue;
                }
            }
            matched = Some((cap.clone(), version));
            break;
        }
        if let Some((cap, version)) = matched {
            scored.push((agent, cap, version));
        }
    }

    if scored.is_empty() {
        return Ok(ResolutionEntry::Unavailable {
            capability: dependency.capability.clone(),
        });
    }

    scored.sort_by(|(a_agent, _, a_ver), (b_agent, _, b_ver)| {
        let a_local = a_agent.namespace == requesting_namespace;
        let b_local = b_agent.namespace == requesting_namespace;
        b_local
            .cmp(&a_local)
            .then_with(|| b_ver.cmp(a_ver))
            .then_with(|| a_agent.agent_id.cmp(&b_agent.agent_id))
    });

    let (winner, cap, _) = &scored[0];
    let function_name = winner
        .tools
        .iter()
        .find(|t| t.capability.as_deref() == Some(cap.name.as_str()))
        .map(|t: &Tool| t.function_name.clone())
        .unwrap_or_else(|| cap.name.clone());

    Ok(ResolutionEntry::Available {
        capability: dependency.capability.clone(),
        agent_id: winner.agent_id.clone(),
        function_name,
        endpoint: winner.endpoint.clone(),
        kwargs: HashMap::new(),
    })
}

/// Resolves every dependency a tool declares, preserving declaration order.
pub async fn resolve_all(
    store: &Store,
    dependencies: &[Dependency],
    requesting_namespace: &str,
) -> Result<Vec<ResolutionEntry>, MeshError> {
    let mut out = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        out.push(resolve_dependency(store, dep, requesting_namespace).await?);
    }
    Ok(out)
}
