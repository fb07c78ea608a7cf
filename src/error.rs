//! Error kinds shared by the store, resolution engine, HTTP surface, and
//! client pipeline.
//!
//! The registry never leaks internal detail to callers: `MeshError` carries
//! enough information for the HTTP layer to pick a status code, but its
//! `Display` is safe to return verbatim only for the kinds that are meant to
//! be client-facing (`validation_error`, `not_found`, `conflict`,
//! `security_violation`). Unexpected errors are logged with their full detail
//! and collapsed to a generic message at the boundary.

use thiserror::Error;

/// The error kinds named in the registry's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    SecurityViolation,
    Conflict,
    Transient,
    RemoteToolError,
    Internal,
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("registry temporarily unavailable: {0}")]
    Transient(String),

    #[error("remote tool error: {0}")]
    RemoteToolError(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MeshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshError::NotFound(_) => ErrorKind::NotFound,
            MeshError::Validation(_) | MeshError::InvalidVersion(_) | MeshError::InvalidUrl(_) => {
                ErrorKind::ValidationError
            }
            MeshError::SecurityViolation(_) => ErrorKind::SecurityViolation,
            MeshError::Conflict(_) => ErrorKind::Conflict,
            MeshError::Transient(_) | MeshError::Store(_) => ErrorKind::Transient,
            MeshError::RemoteToolError(_) => ErrorKind::RemoteToolError,
            MeshError::Network(_) | MeshError::Serialization(_) | MeshError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Client-side heartbeat loop swallows anything transient; only 410
    /// (modeled as `NotFound` on the client) changes behavior.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping_matches_status_policy() {
        assert_eq!(
            MeshError::NotFound("agent".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MeshError::Validation("bad name".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            MeshError::Conflict("name collision".into()).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn transient_errors_are_swallowed_client_side() {
        assert!(MeshError::Transient("pool exhausted".into()).is_transient());
        assert!(!MeshError::Validation("bad".into()).is_transient());
    }
}
