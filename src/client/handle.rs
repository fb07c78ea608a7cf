//! Agent handle for controlling the runtime and receiving events.
//!
//! The AgentHandle is returned when starting an agent and provides:
//! - Async event stream for topology updates
//! - Current state queries
//! - Shutdown control

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::events::{HealthStatus, MeshEvent};

/// Internal state shared between handle and runtime.
pub struct HandleState {
    /// Current dependency endpoints (capability -> endpoint)
    pub dependencies: HashMap<String, String>,

    /// Current health status
    pub health_status: HealthStatus,

    /// Whether shutdown has been requested
    pub shutdown_requested: bool,

    /// Agent ID assigned by registry
    pub agent_id: Option<String>,
}

impl Default for HandleState {
    fn default() -> Self {
        Self {
            dependencies: HashMap::new(),
            health_status: HealthStatus::Healthy,
            shutdown_requested: false,
            agent_id: None,
        }
    }
}

/// Handle to a running agent runtime.
///
/// This is the primary interface for language SDKs to interact with the Rust core.
/// It provides async event streaming and state queries.
pub struct AgentHandle {
    /// Event receiver (from runtime)
    event_rx: Arc<Mutex<mpsc::Receiver<MeshEvent>>>,

    /// Shared state
    state: Arc<RwLock<HandleState>>,

    /// Shutdown signal sender
    shutdown_tx: mpsc::Sender<()>,
}

impl AgentHandle {
    /// Create a new handle with the given channels.
    pub fn new(
        event_rx: mpsc::Receiver<MeshEvent>,
        state: Arc<RwLock<HandleState>>,
        shutdown_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            event_rx: Arc::new(Mutex::new(event_rx)),
            state,
            shutdown_tx,
        }
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> Arc<RwLock<HandleState>> {
        self.state.clone()
    }
}

impl AgentHandle {
    /// Wait for the next mesh event. Returns `None` once the runtime has
    /// shut down and the event channel is drained.
    pub async fn next_event(&self) -> Option<MeshEvent> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Snapshot of current dependency endpoints (capability -> endpoint).
    pub async fn dependencies(&self) -> HashMap<String, String> {
        self.state.read().await.dependencies.clone()
    }

    /// Current agent health status.
    pub async fn status(&self) -> HealthStatus {
        self.state.read().await.health_status
    }

    /// Agent ID assigned by the registry, if registration has completed.
    pub async fn agent_id(&self) -> Option<String> {
        self.state.read().await.agent_id.clone()
    }

    /// Whether shutdown has been requested.
    pub async fn is_shutdown_requested(&self) -> bool {
        self.state.read().await.shutdown_requested
    }

    /// Request graceful shutdown of the agent runtime.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            state.shutdown_requested = true;
        }
        let _ = self.shutdown_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_state() {
        let (event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let _handle = AgentHandle::new(event_rx, state.clone(), shutdown_tx);

        // Update state
        {
            let mut s = state.write().await;
            s.agent_id = Some("test-agent".to_string());
            s.dependencies.insert("date-service".to_string(), "http://localhost:9001".to_string());
        }

        {
            let s = state.read().await;
            assert_eq!(s.agent_id, Some("test-agent".to_string()));
            assert_eq!(s.dependencies.len(), 1);
        }

        // Send an event
        event_tx
            .send(MeshEvent::dependency_available(
                "weather".to_string(),
                "http://localhost:9002".to_string(),
                "get_weather".to_string(),
                "weather-agent".to_string(),
            ))
            .await
            .unwrap();

        drop(event_tx);
    }

    #[tokio::test]
    async fn test_handle_shutdown() {
        let (_event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let handle = AgentHandle::new(event_rx, state.clone(), shutdown_tx);

        handle.shutdown().await;

        assert!(handle.is_shutdown_requested().await);
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
