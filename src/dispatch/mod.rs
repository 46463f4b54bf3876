//! MCP message dispatch.
//!
//! The transport hands raw JSON-RPC bytes plus a request context to a
//! [`Dispatcher`]; `None` back means the message was a notification and the
//! HTTP layer answers `202` with an empty body. [`McpDispatcher`] is the
//! gateway's own implementation over the synthesized tool catalog.

use crate::auth::{inject, resolve_token, AuthContext, ProcessEnv};
use crate::error::Result;
use crate::session::Session;
use crate::spec::ParsedSpec;
use crate::types::{
    error_codes, JsonRpcRequest, JsonRpcResponse, Tool, MCP_PROTOCOL_VERSION,
};
use crate::upstream::UpstreamClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a dispatch needs, scoped to one request. Credentials derived
/// during the call stay inside this context and die with it.
#[derive(Clone)]
pub struct RequestContext {
    pub session: Arc<Session>,
    pub spec: Arc<ParsedSpec>,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Process one JSON-RPC message. Returns the serialized reply, or
    /// `None` when the message was a notification.
    async fn handle(&self, ctx: RequestContext, raw: Vec<u8>) -> Result<Option<Vec<u8>>>;
}

/// Dispatcher over the synthesized tool catalog of a parsed spec.
pub struct McpDispatcher {
    upstream: UpstreamClient,
    debug_auth: bool,
}

impl McpDispatcher {
    pub fn new(upstream: UpstreamClient, debug_auth: bool) -> Self {
        Self {
            upstream,
            debug_auth,
        }
    }

    fn reply(response: JsonRpcResponse) -> Result<Option<Vec<u8>>> {
        Ok(Some(serde_json::to_vec(&response)?))
    }

    fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "openapi-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    fn handle_tools_list(&self, ctx: &RequestContext, request: &JsonRpcRequest) -> JsonRpcResponse {
        // Session overrides replace the spec's catalog when installed.
        let tools: Vec<Tool> = match ctx.session.tools_override() {
            Some(tools) => tools,
            None => ctx.spec.tools.iter().map(|b| b.tool.clone()).collect(),
        };

        JsonRpcResponse::success(request.id.clone(), json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> JsonRpcResponse {
        let params = request.params();
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                request.id.clone(),
                error_codes::INVALID_PARAMS,
                "Missing tool name",
            );
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let Some(binding) = ctx.spec.binding(tool_name) else {
            return JsonRpcResponse::error(
                request.id.clone(),
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", tool_name),
            );
        };

        // Resolve credentials for this call only; nothing is written back
        // to shared state.
        let resolved = resolve_token(
            &ctx.spec.auth,
            &ctx.spec.header_case,
            Some(&arguments),
            &ctx.session.auth_headers,
            ctx.spec.record.api_key_token.as_deref(),
            &ProcessEnv,
            self.debug_auth,
        );
        let auth_ctx = AuthContext {
            endpoint: ctx.spec.endpoint.clone(),
            token: resolved.token,
            kind: ctx.spec.auth.kind,
            location: ctx.spec.auth.location,
            param_name: ctx.spec.auth.param_name.clone(),
            api_host: ctx.spec.auth.api_host.clone(),
            host_headers: ctx.spec.auth.host_headers.clone(),
        };
        if self.debug_auth {
            debug!(
                tool = %tool_name,
                source = ?resolved.source,
                authenticated = auth_ctx.has_token(),
                "Resolved upstream credentials"
            );
        }

        let outcome = async {
            let request = self.upstream.build_request(&ctx.spec, binding, &arguments)?;
            let request = inject(&request, &auth_ctx)?;
            self.upstream.execute(request).await
        }
        .await;

        match outcome {
            Ok(response) => {
                info!(
                    tool = %tool_name,
                    status = response.status,
                    "Tool call completed"
                );
                JsonRpcResponse::success(
                    request.id.clone(),
                    json!({
                        "content": [{"type": "text", "text": response.body}],
                        "isError": response.is_error(),
                    }),
                )
            },
            Err(e) => {
                warn!(tool = %tool_name, error = %e, "Tool call failed");
                JsonRpcResponse::error(
                    request.id.clone(),
                    error_codes::INTERNAL_ERROR,
                    e.to_string(),
                )
            },
        }
    }
}

#[async_trait]
impl Dispatcher for McpDispatcher {
    async fn handle(&self, ctx: RequestContext, raw: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let request: JsonRpcRequest = match serde_json::from_slice(&raw) {
            Ok(request) => request,
            Err(e) => {
                return Self::reply(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            },
        };

        if request.is_notification() {
            debug!(method = %request.method, "Acknowledged notification");
            return Ok(None);
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request),
            "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
            "tools/list" => self.handle_tools_list(&ctx, &request),
            "tools/call" => self.handle_tools_call(&ctx, &request).await,
            other => JsonRpcResponse::error(
                request.id.clone(),
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        };

        Self::reply(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::session::DEFAULT_SESSION_TTL;
    use crate::store::{FileFormat, SpecRecord};
    use chrono::Utc;
    use std::collections::HashMap;

    fn context() -> RequestContext {
        let content = r#"{
            "openapi": "3.0.0",
            "servers": [{"url": "https://api.example.com"}],
            "paths": {"/forecast": {"get": {"operationId": "getForecast"}}}
        }"#;
        let now = Utc::now();
        let spec = ParsedSpec::from_record(SpecRecord {
            id: 1,
            name: "weather".to_string(),
            title: "Weather".to_string(),
            version: "1".to_string(),
            spec_content: content.to_string(),
            endpoint_path: "/weather".to_string(),
            file_format: FileFormat::Json,
            file_size: content.len() as i64,
            api_key_token: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        RequestContext {
            session: Session::new("s1", DEFAULT_SESSION_TTL, HashMap::new()),
            spec: Arc::new(spec),
        }
    }

    fn dispatcher() -> McpDispatcher {
        McpDispatcher::new(UpstreamClient::new(&UpstreamConfig::default()).unwrap(), false)
    }

    #[tokio::test]
    async fn test_initialize_reply() {
        let raw = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_vec();
        let reply = dispatcher().handle(context(), raw).await.unwrap().unwrap();

        let response: JsonRpcResponse = serde_json::from_slice(&reply).unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "openapi-mcp");
    }

    #[tokio::test]
    async fn test_notification_returns_none() {
        let raw = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_vec();
        assert!(dispatcher().handle(context(), raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tools_list_returns_synthesized_tools() {
        let raw = br#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#.to_vec();
        let reply = dispatcher().handle(context(), raw).await.unwrap().unwrap();

        let response: JsonRpcResponse = serde_json::from_slice(&reply).unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "getForecast");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let raw = br#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#.to_vec();
        let reply = dispatcher().handle(context(), raw).await.unwrap().unwrap();

        let response: JsonRpcResponse = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error_reply() {
        let reply = dispatcher()
            .handle(context(), b"{ nope".to_vec())
            .await
            .unwrap()
            .unwrap();

        let response: JsonRpcResponse = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_tool_call() {
        let raw =
            br#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope"}}"#.to_vec();
        let reply = dispatcher().handle(context(), raw).await.unwrap().unwrap();

        let response: JsonRpcResponse = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }
}
