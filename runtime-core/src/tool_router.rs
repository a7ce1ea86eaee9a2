//! ToolRouter: registry + policy + timeout + call dispatch (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::error::AgentError;
use crate::tool::{Tool, ToolCallContext, ToolCallOutcome, ToolDefinition, ToolResult};
use crate::tool_policy::{PolicyDecision, ToolPolicy};

/// Proxy for an out-of-process tool server. The router tolerates
/// disconnection and transparently reconnects, refreshing the tool catalog
/// on the next request (spec §4.3).
#[async_trait]
pub trait ExternalToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, AgentError>;
    async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolCallContext,
    ) -> Result<ToolCallOutcome, AgentError>;
    async fn reconnect(&self) -> Result<(), AgentError>;
}

fn looks_like_disconnect(err: &AgentError) -> bool {
    matches!(err, AgentError::Other(m) if m.to_lowercase().contains("disconnect")
        || m.to_lowercase().contains("connection"))
}

pub type EventSink = Arc<dyn Fn(ToolRouterEvent) + Send + Sync>;

/// Event raised around a call; the caller ([`crate::agent_runner::AgentRunner`])
/// turns these into `tool.called` / `tool.result` log entries.
#[derive(Clone, Debug)]
pub enum ToolRouterEvent {
    Called { tool_call_id: String, name: String, args: Value },
    Result { tool_call_id: String, success: bool, duration_ms: u64 },
}

pub struct ToolRouter {
    tools: DashMap<String, Arc<dyn Tool>>,
    external: Option<Arc<dyn ExternalToolSource>>,
    external_names: DashMap<String, ()>,
    default_timeout: Duration,
    event_sink: Option<EventSink>,
}

impl ToolRouter {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: DashMap::new(),
            external: None,
            external_names: DashMap::new(),
            default_timeout,
            event_sink: None,
        }
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_external_source(mut self, source: Arc<dyn ExternalToolSource>) -> Self {
        self.external = Some(source);
        self
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister_tool(&self, name: &str) {
        self.tools.remove(name);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.external_names.contains_key(name)
    }

    pub fn get_tool_count(&self) -> usize {
        self.tools.len() + self.external_names.len()
    }

    /// Refreshes the external catalog (adds/removes entries) and returns the
    /// full listing. Builtin tools are listed from the local registry only.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut out: Vec<ToolDefinition> = self.tools.iter().map(|e| e.value().definition()).collect();
        if let Some(ext) = &self.external {
            match ext.list_tools().await {
                Ok(defs) => {
                    let fresh: std::collections::HashSet<String> =
                        defs.iter().map(|d| d.name.clone()).collect();
                    self.external_names.retain(|k, _| fresh.contains(k));
                    for d in &defs {
                        self.external_names.insert(d.name.clone(), ());
                    }
                    out.extend(defs);
                }
                Err(e) => warn!("external tool catalog refresh failed: {e}"),
            }
        }
        out
    }

    fn get_definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| t.definition())
    }

    /// `callTool` (spec §4.3 steps 1-4).
    pub async fn call_tool(
        &self,
        tool_call_id: &str,
        name: &str,
        params: Value,
        ctx: &ToolCallContext,
    ) -> ToolResult {
        let start = std::time::Instant::now();
        if let Some(sink) = &self.event_sink {
            sink(ToolRouterEvent::Called {
                tool_call_id: tool_call_id.to_string(),
                name: name.to_string(),
                args: params.clone(),
            });
        }

        let ctx_with_call_id = ToolCallContext { tool_call_id: Some(tool_call_id.to_string()), ..ctx.clone() };
        let result = self.call_tool_inner(name, params, &ctx_with_call_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = match result {
            Ok(mut r) => {
                r.duration_ms = duration_ms;
                r
            }
            Err(e) => ToolResult::err(e.to_string(), duration_ms),
        };

        if let Some(sink) = &self.event_sink {
            sink(ToolRouterEvent::Result {
                tool_call_id: tool_call_id.to_string(),
                success: result.success,
                duration_ms,
            });
        }
        result
    }

    async fn call_tool_inner(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolCallContext,
    ) -> Result<ToolResult, AgentError> {
        // Step 2: policy check, only when an agent context is present.
        if let Some(agent_ctx) = &ctx.agent_context {
            if let Some(def) = self.get_definition(name) {
                if let PolicyDecision::Deny(reason) = ToolPolicy::check(agent_ctx, &def) {
                    return Ok(ToolResult::err(reason, 0));
                }
            }
        }

        if let Some(tool) = self.tools.get(name).map(|e| e.clone()) {
            return self.race_with_timeout(tool.call(params, ctx)).await;
        }

        if self.external_names.contains_key(name) {
            if let Some(ext) = self.external.clone() {
                let outcome = ext.call(name, params.clone(), ctx).await;
                let outcome = match outcome {
                    Err(e) if looks_like_disconnect(&e) => {
                        warn!("external tool source disconnected, reconnecting");
                        ext.reconnect().await?;
                        let _ = self.list_tools().await;
                        ext.call(name, params, ctx).await
                    }
                    other => other,
                };
                return match outcome {
                    Ok(ToolCallOutcome::Content(v)) => Ok(ToolResult::ok(v, 0)),
                    Ok(other) => Ok(ToolResult::ok(serde_json::to_value(other).unwrap(), 0)),
                    Err(e) => Ok(ToolResult::err(e.to_string(), 0)),
                };
            }
        }

        // Step 1.
        Ok(ToolResult::err(format!("Tool not found: {name}"), 0))
    }

    async fn race_with_timeout(
        &self,
        fut: impl std::future::Future<Output = Result<ToolCallOutcome, AgentError>>,
    ) -> Result<ToolResult, AgentError> {
        match tokio::time::timeout(self.default_timeout, fut).await {
            Ok(Ok(ToolCallOutcome::Content(v))) => Ok(ToolResult::ok(v, 0)),
            Ok(Ok(other)) => Ok(ToolResult::ok(serde_json::to_value(other).unwrap(), 0)),
            Ok(Err(e)) => Ok(ToolResult::err(e.to_string(), 0)),
            Err(_) => Ok(ToolResult::err(
                format!("tool call timed out after {:?}", self.default_timeout),
                0,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolRisk, ToolSource};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes input".to_string(),
                parameters: serde_json::json!({}),
                risk_level: ToolRisk::Low,
                mutating: false,
                supports_parallel: true,
                source: ToolSource::Builtin,
            }
        }
        async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError> {
            Ok(ToolCallOutcome::Content(args))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: String::new(),
                parameters: serde_json::json!({}),
                risk_level: ToolRisk::Low,
                mutating: false,
                supports_parallel: true,
                source: ToolSource::Builtin,
            }
        }
        async fn call(&self, _args: Value, _ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ToolCallOutcome::Content(Value::Null))
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_typed_error() {
        let router = ToolRouter::new(Duration::from_secs(1));
        let r = router
            .call_tool("c1", "nope", Value::Null, &ToolCallContext::new())
            .await;
        assert!(!r.success);
        assert_eq!(r.error.unwrap(), "Tool not found: nope");
    }

    #[tokio::test]
    async fn registered_tool_is_called() {
        let router = ToolRouter::new(Duration::from_secs(1));
        router.register_tool(Arc::new(EchoTool));
        let r = router
            .call_tool("c1", "echo", serde_json::json!({"x": 1}), &ToolCallContext::new())
            .await;
        assert!(r.success);
        assert_eq!(r.result.unwrap(), serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn timeout_surfaces_as_failed_result() {
        let router = ToolRouter::new(Duration::from_millis(20));
        router.register_tool(Arc::new(SlowTool));
        let r = router
            .call_tool("c1", "slow", Value::Null, &ToolCallContext::new())
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("timed out"));
    }
}
