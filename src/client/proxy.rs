//! Tool proxies: the callables a dependency slot is bound to.
//!
//! `CrossServiceProxy` issues one fresh HTTP request per call (no pooled
//! client, matching `spec.md` §4.H and `original_source/`'s per-call
//! `httpx.AsyncClient` usage); `SelfDependencyProxy` bypasses HTTP entirely
//! and calls the local wrapper directly so a self-dependent tool keeps its
//! own injection chain intact.

use crate::client::injector::ToolProxy;
use crate::error::MeshError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// One JSON-RPC request/response round trip to a peer's `/mcp/` endpoint.
pub struct CrossServiceProxy {
    endpoint: String,
    function_name: String,
    session_id: Option<String>,
    static_kwargs: std::collections::HashMap<String, String>,
}

impl CrossServiceProxy {
    pub fn new(endpoint: &str, function_name: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            function_name: function_name.to_string(),
            session_id: None,
            static_kwargs: std::collections::HashMap::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_static_kwargs(mut self, kwargs: std::collections::HashMap<String, String>) -> Self {
        self.static_kwargs = kwargs;
        self
    }

    fn mcp_url(&self) -> String {
        format!("{}/mcp/", self.endpoint)
    }

    fn envelope(&self, mut arguments: Value) -> Value {
        if !arguments.is_object() {
            arguments = json!({});
        }
        if let Some(obj) = arguments.as_object_mut() {
            for (k, v) in &self.static_kwargs {
                obj.entry(k.clone()).or_insert_with(|| json!(v));
            }
            if let Some(session_id) = &self.session_id {
                obj.insert("session_id".to_string(), json!(session_id));
            }
        }
        json!({
            "jsonrpc": "2.0",
            "id": next_id(),
            "method": "tools/call",
            "params": {
                "name": self.function_name,
                "arguments": arguments,
            }
        })
    }

    async fn send(&self, arguments: Value, accept: &str) -> Result<reqwest::Response, MeshError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(MeshError::Network)?;

        let mut request = client
            .post(self.mcp_url())
            .header("Accept", accept)
            .json(&self.envelope(arguments));

        if let Some(session_id) = &self.session_id {
            request = request.header("X-Session-ID", session_id);
        }

        request.send().await.map_err(MeshError::Network)
    }

    /// Parses either a bare JSON-RPC response or an SSE stream whose
    /// `data:` lines each carry one.
    fn parse_response(body: &str) -> Result<Value, MeshError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with("event:") || trimmed.starts_with("data:") {
            for line in body.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    return extract_result(serde_json::from_str(data)?);
                }
            }
            return Err(MeshError::RemoteToolError("SSE stream had no data frame".to_string()));
        }
        extract_result(serde_json::from_str(body)?)
    }
}

fn extract_result(envelope: Value) -> Result<Value, MeshError> {
    if let Some(error) = envelope.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("remote tool error")
            .to_string();
        return Err(MeshError::RemoteToolError(message));
    }
    let result = envelope.get("result").cloned().unwrap_or(Value::Null);
    Ok(unwrap_content(result))
}

/// `{"content":[{"type":"text","text":"..."}]}` collapses to the bare string
/// when it is the sole content item, matching the common MCP tool-call
/// result shape.
fn unwrap_content(result: Value) -> Value {
    if let Some(content) = result.get("content").and_then(Value::as_array) {
        if content.len() == 1 {
            if let Some(text) = content[0].get("text").and_then(Value::as_str) {
                if content[0].get("type").and_then(Value::as_str) == Some("text") {
                    return Value::String(text.to_string());
                }
            }
        }
    }
    result
}

#[async_trait]
impl ToolProxy for CrossServiceProxy {
    async fn call(&self, args: Value) -> Result<Value, MeshError> {
        debug!(endpoint = %self.endpoint, function = %self.function_name, "calling cross-service proxy");
        let response = self.send(args, "application/json, text/event-stream").await?;
        let status = response.status();
        let body = response.text().await.map_err(MeshError::Network)?;
        if !status.is_success() {
            warn!(%status, "remote tool call returned non-success status");
            return Err(MeshError::RemoteToolError(format!("HTTP {status}: {body}")));
        }
        Self::parse_response(&body)
    }
}

impl CrossServiceProxy {
    /// Streaming variant: same envelope, `Accept: text/event-stream` only,
    /// yielding the JSON-decoded payload of each `data:` frame in order.
    pub async fn call_streaming(&self, args: Value) -> Result<Vec<Value>, MeshError> {
        let response = self.send(args, "text/event-stream").await?;
        let status = response.status();
        let body = response.text().await.map_err(MeshError::Network)?;
        if !status.is_success() {
            return Err(MeshError::RemoteToolError(format!("HTTP {status}: {body}")));
        }
        let mut chunks = Vec::new();
        for line in body.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                chunks.push(extract_result(serde_json::from_str(data)?)?);
            }
        }
        Ok(chunks)
    }
}

/// Bypasses HTTP for a dependency that resolves back to this same agent,
/// calling the local wrapper directly so its own injected dependencies stay
/// intact.
pub struct SelfDependencyProxy {
    target: Arc<dyn LocalWrapperCall>,
}

/// A locally-callable wrapper, invoked directly instead of over HTTP.
#[async_trait]
pub trait LocalWrapperCall: Send + Sync {
    async fn call_local(&self, args: Value) -> Result<Value, MeshError>;
}

impl SelfDependencyProxy {
    pub fn new(target: Arc<dyn LocalWrapperCall>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ToolProxy for SelfDependencyProxy {
    async fn call(&self, args: Value) -> Result<Value, MeshError> {
        self.target.call_local(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_sole_text_content() {
        let result = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(unwrap_content(result), json!("hello"));
    }

    #[test]
    fn leaves_multi_content_untouched() {
        let result = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(unwrap_content(result.clone()), result);
    }

    #[test]
    fn extract_result_raises_remote_tool_error_on_jsonrpc_error() {
        let envelope = json!({"jsonrpc": "2.0", "id": 1, "error": {"message": "boom"}});
        let err = extract_result(envelope).unwrap_err();
        assert!(matches!(err, MeshError::RemoteToolError(msg) if msg == "boom"));
    }

    #[test]
    fn parses_plain_json_response() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": {"content": [{"type": "text", "text": "hi"}]}}).to_string();
        let value = CrossServiceProxy::parse_response(&body).unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[test]
    fn parses_sse_response() {
        let inner = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        let body = format!("event: message\ndata: {inner}\n\n");
        let value = CrossServiceProxy::parse_response(&body).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }
}
