//! Outbound HTTP client for upstream API calls.
//!
//! One shared client is built at startup; per-call credentials are applied
//! by the auth injector on a cloned request, so nothing here carries state
//! between requests.

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::spec::ParsedSpec;
use crate::tools::ToolBinding;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Request};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Upstream call outcome surfaced to the tool result.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Materialize the HTTP request described by an operation binding and
    /// the tool-call arguments. Path parameters substitute into the
    /// template, query parameters append, header parameters apply, and a
    /// `body` argument becomes the JSON body.
    pub fn build_request(
        &self,
        spec: &ParsedSpec,
        binding: &ToolBinding,
        args: &Value,
    ) -> Result<Request> {
        let mut path = binding.path.clone();
        for param in &binding.path_params {
            let value = args
                .get(param)
                .map(render_arg)
                .ok_or_else(|| {
                    Error::Validation(format!("missing required path parameter: {}", param))
                })?;
            path = path.replace(&format!("{{{}}}", param), &value);
        }

        let url = format!("{}{}", spec.base_url(), path);
        let method = Method::from_bytes(binding.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::Validation(format!("invalid HTTP method: {}", binding.method)))?;

        let mut builder = self.client.request(method, &url);

        let query: Vec<(String, String)> = binding
            .query_params
            .iter()
            .filter_map(|param| args.get(param).map(|v| (param.clone(), render_arg(v))))
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        for param in &binding.header_params {
            let Some(value) = args.get(param) else { continue };
            let name = HeaderName::from_bytes(param.as_bytes())
                .map_err(|_| Error::Validation(format!("invalid header parameter: {}", param)))?;
            let value = HeaderValue::from_str(&render_arg(value))
                .map_err(|_| Error::Validation(format!("invalid header value for {}", param)))?;
            builder = builder.header(name, value);
        }

        if binding.has_body {
            if let Some(body) = args.get("body") {
                builder = builder.json(body);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Validation(format!("failed to build upstream request: {}", e)))
    }

    /// Execute a fully-prepared (already injected) request.
    pub async fn execute(&self, request: Request) -> Result<UpstreamResponse> {
        debug!(method = %request.method(), url = %request.url(), "Calling upstream API");

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Network(format!("upstream request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read upstream response: {}", e)))?;

        Ok(UpstreamResponse { status, body })
    }
}

/// Scalar arguments render without JSON quoting; everything else serializes.
fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileFormat, SpecRecord};
    use chrono::Utc;
    use serde_json::json;

    fn spec_with(paths: &str) -> ParsedSpec {
        let content = format!(
            r#"{{
                "openapi": "3.0.0",
                "servers": [{{"url": "https://api.example.com/v2"}}],
                "paths": {paths}
            }}"#
        );
        let now = Utc::now();
        ParsedSpec::from_record(SpecRecord {
            id: 1,
            name: "t".to_string(),
            title: "t".to_string(),
            version: "1".to_string(),
            file_size: content.len() as i64,
            spec_content: content,
            endpoint_path: "/t".to_string(),
            file_format: FileFormat::Json,
            api_key_token: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    #[test]
    fn test_path_and_query_materialization() {
        let spec = spec_with(
            r#"{
                "/pets/{petId}": {
                    "get": {
                        "operationId": "getPet",
                        "parameters": [
                            {"name": "petId", "in": "path", "required": true},
                            {"name": "verbose", "in": "query"}
                        ]
                    }
                }
            }"#,
        );
        let client = UpstreamClient::new(&Default::default()).unwrap();
        let binding = spec.binding("getPet").unwrap();

        let request = client
            .build_request(&spec, binding, &json!({"petId": "42", "verbose": true}))
            .unwrap();

        assert_eq!(request.url().path(), "/v2/pets/42");
        assert_eq!(request.url().query(), Some("verbose=true"));
    }

    #[test]
    fn test_missing_path_param_rejected() {
        let spec = spec_with(
            r#"{
                "/pets/{petId}": {
                    "get": {
                        "operationId": "getPet",
                        "parameters": [{"name": "petId", "in": "path", "required": true}]
                    }
                }
            }"#,
        );
        let client = UpstreamClient::new(&Default::default()).unwrap();
        let binding = spec.binding("getPet").unwrap();

        let err = client.build_request(&spec, binding, &json!({})).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_json_body_from_args() {
        let spec = spec_with(
            r#"{
                "/pets": {
                    "post": {
                        "operationId": "createPet",
                        "requestBody": {
                            "content": {"application/json": {"schema": {"type": "object"}}}
                        }
                    }
                }
            }"#,
        );
        let client = UpstreamClient::new(&Default::default()).unwrap();
        let binding = spec.binding("createPet").unwrap();

        let request = client
            .build_request(&spec, binding, &json!({"body": {"name": "Rex"}}))
            .unwrap();

        let body = request.body().unwrap().as_bytes().unwrap();
        assert_eq!(body, br#"{"name":"Rex"}"#.as_slice());
    }
}
