//! Tool synthesis: one MCP tool per OpenAPI operation.
//!
//! Pure over the parsed document. Each binding remembers enough of the
//! operation to materialize the upstream HTTP request at call time.

use crate::types::Tool;
use serde_json::{json, Map, Value};

const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch"];

/// A synthesized tool plus the operation it was derived from.
#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub tool: Tool,
    pub method: String,
    pub path: String,
    pub path_params: Vec<String>,
    pub query_params: Vec<String>,
    pub header_params: Vec<String>,
    pub has_body: bool,
}

/// Walk `paths` and synthesize one tool per operation. Duplicate names are
/// deduplicated after sorting, keeping the first occurrence.
pub fn synthesize_tools(document: &Value) -> Vec<ToolBinding> {
    let mut bindings = Vec::new();

    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return bindings;
    };

    for (path, item) in paths {
        let Some(item) = item.as_object() else { continue };
        for &method in HTTP_METHODS {
            let Some(operation) = item.get(method) else { continue };
            bindings.push(bind_operation(path, method, operation, item));
        }
    }

    bindings.sort_by(|a, b| a.tool.name.cmp(&b.tool.name));
    bindings.dedup_by(|a, b| a.tool.name == b.tool.name);
    bindings
}

fn bind_operation(path: &str, method: &str, operation: &Value, path_item: &Map<String, Value>) -> ToolBinding {
    let name = operation
        .get("operationId")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| slug_name(method, path));

    let description = operation
        .get("summary")
        .or_else(|| operation.get("description"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("{} {}", method.to_ascii_uppercase(), path));

    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut path_params = Vec::new();
    let mut query_params = Vec::new();
    let mut header_params = Vec::new();

    // Path-item parameters apply to every operation under the path.
    let shared = path_item.get("parameters").and_then(Value::as_array);
    let own = operation.get("parameters").and_then(Value::as_array);
    for param in shared.into_iter().flatten().chain(own.into_iter().flatten()) {
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let location = param.get("in").and_then(Value::as_str).unwrap_or("query");
        match location {
            "path" => path_params.push(name.to_string()),
            "query" => query_params.push(name.to_string()),
            "header" => header_params.push(name.to_string()),
            _ => continue,
        }

        let schema = param
            .get("schema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "string"}));
        properties.insert(name.to_string(), schema);

        let is_required = location == "path"
            || param.get("required").and_then(Value::as_bool).unwrap_or(false);
        if is_required {
            required.push(Value::String(name.to_string()));
        }
    }

    let has_body = operation
        .get("requestBody")
        .and_then(|rb| rb.get("content"))
        .and_then(|c| c.get("application/json"))
        .is_some();
    if has_body {
        let body_schema = operation
            .get("requestBody")
            .and_then(|rb| rb.get("content"))
            .and_then(|c| c.get("application/json"))
            .and_then(|m| m.get("schema"))
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"}));
        properties.insert("body".to_string(), body_schema);
    }

    let mut input_schema = Map::new();
    input_schema.insert("type".to_string(), Value::String("object".to_string()));
    input_schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        input_schema.insert("required".to_string(), Value::Array(required));
    }

    ToolBinding {
        tool: Tool {
            name,
            description: Some(description),
            input_schema: Value::Object(input_schema),
        },
        method: method.to_string(),
        path: path.to_string(),
        path_params,
        query_params,
        header_params,
        has_body,
    }
}

/// `get /pets/{petId}` becomes `get_pets_petId`.
fn slug_name(method: &str, path: &str) -> String {
    let mut slug = String::from(method);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        slug.push('_');
        slug.push_str(&segment.replace(['{', '}'], ""));
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn petstore() -> Value {
        serde_json::from_str(
            r#"{
                "paths": {
                    "/pets": {
                        "get": {
                            "operationId": "listPets",
                            "summary": "List all pets",
                            "parameters": [
                                {"name": "limit", "in": "query", "schema": {"type": "integer"}}
                            ]
                        },
                        "post": {
                            "operationId": "createPet",
                            "requestBody": {
                                "content": {
                                    "application/json": {
                                        "schema": {"type": "object", "properties": {"name": {"type": "string"}}}
                                    }
                                }
                            }
                        }
                    },
                    "/pets/{petId}": {
                        "get": {
                            "parameters": [
                                {"name": "petId", "in": "path", "required": true, "schema": {"type": "string"}}
                            ]
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_one_tool_per_operation() {
        let bindings = synthesize_tools(&petstore());
        assert_eq!(bindings.len(), 3);
    }

    #[test]
    fn test_operation_id_preferred_over_slug() {
        let bindings = synthesize_tools(&petstore());
        let names: Vec<&str> = bindings.iter().map(|b| b.tool.name.as_str()).collect();
        assert!(names.contains(&"listPets"));
        assert!(names.contains(&"get_pets_petId"));
    }

    #[test]
    fn test_path_params_are_required() {
        let bindings = synthesize_tools(&petstore());
        let get_pet = bindings.iter().find(|b| b.tool.name == "get_pets_petId").unwrap();
        assert_eq!(get_pet.path_params, vec!["petId"]);
        let required = get_pet.tool.input_schema["required"].as_array().unwrap();
        assert_eq!(required[0], "petId");
    }

    #[test]
    fn test_request_body_surfaces_as_body_property() {
        let bindings = synthesize_tools(&petstore());
        let create = bindings.iter().find(|b| b.tool.name == "createPet").unwrap();
        assert!(create.has_body);
        assert!(create.tool.input_schema["properties"]["body"].is_object());
    }

    #[test]
    fn test_empty_document() {
        assert!(synthesize_tools(&json!({})).is_empty());
    }
}
