//! Prometheus metrics handle for the registry's `/metrics/prometheus`
//! endpoint.
//!
//! Grounded on `FlexNetOS-noa_ark_os/server/api/src/lib.rs`'s
//! `MetricsHandle`: a process-wide recorder installed once behind a
//! `OnceLock`, with double-checked locking so concurrent first-callers don't
//! race to install two recorders.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};

#[derive(Clone)]
pub struct MetricsHandle {
    inner: &'static OnceLock<PrometheusHandle>,
    install_lock: &'static Mutex<()>,
}

impl MetricsHandle {
    pub fn global() -> Self {
        static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
        static LOCK: Mutex<()> = Mutex::new(());
        Self {
            inner: &HANDLE,
            install_lock: &LOCK,
        }
    }

    /// Installs the recorder on first call; subsequent calls reuse it.
    pub fn ensure_installed(&self) -> &PrometheusHandle {
        if let Some(handle) = self.inner.get() {
            return handle;
        }
        let _guard = self.install_lock.lock().unwrap();
        if let Some(handle) = self.inner.get() {
            return handle;
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install prometheus recorder");
        let _ = self.inner.set(handle);
        self.inner.get().expect("just set")
    }

    pub fn render(&self) -> String {
        self.ensure_installed().render()
    }
}

pub fn record_heartbeat(agent_type: &str) {
    metrics::counter!("mesh_heartbeats_total", "agent_type" => agent_type.to_string()).increment(1);
}

pub fn record_registration(agent_type: &str) {
    metrics::counter!("mesh_registrations_total", "agent_type" => agent_type.to_string()).increment(1);
}

pub fn record_health_transition(status: &str) {
    metrics::counter!("mesh_health_transitions_total", "status" => status.to_string()).increment(1);
}

pub fn set_live_agent_count(count: i64) {
    metrics::gauge!("mesh_live_agents").set(count as f64);
}
