//! Original header-case recovery.
//!
//! Upstream APIs such as RapidAPI require exact header casing, so the raw
//! spec text is re-scanned for the spellings declared in
//! `components.securitySchemes` and `components.parameters`. Only schemes
//! referenced by the document's global `security` list are mapped; schemes
//! declared but never referenced stay out of the namespace.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Mapping from `lowercase(header_name)` to the original spelling.
#[derive(Debug, Clone, Default)]
pub struct HeaderCaseMap {
    entries: HashMap<String, String>,
}

impl HeaderCaseMap {
    /// Build the map from raw spec bytes. JSON is attempted first, then
    /// YAML; if neither parses the map is empty and callers fall back to
    /// canonical-case names.
    pub fn from_raw(raw: &str) -> Self {
        let document = match serde_json::from_str::<Value>(raw) {
            Ok(doc) => doc,
            Err(_) => match serde_yaml::from_str::<Value>(raw) {
                Ok(doc) => doc,
                Err(_) => return Self::default(),
            },
        };
        Self::from_document(&document)
    }

    fn from_document(document: &Value) -> Self {
        let mut entries = HashMap::new();

        // Schemes count as used only when some global security requirement
        // names them.
        let used_schemes: HashSet<&str> = document
            .get("security")
            .and_then(Value::as_array)
            .map(|requirements| {
                requirements
                    .iter()
                    .filter_map(Value::as_object)
                    .flat_map(|req| req.keys().map(String::as_str))
                    .collect()
            })
            .unwrap_or_default();

        let components = document.get("components");

        if let Some(schemes) = components
            .and_then(|c| c.get("securitySchemes"))
            .and_then(Value::as_object)
        {
            for (name, scheme) in schemes {
                if !used_schemes.contains(name.as_str()) {
                    continue;
                }
                let scheme_type = scheme.get("type").and_then(Value::as_str);
                match scheme_type {
                    Some("apiKey") => {
                        if scheme.get("in").and_then(Value::as_str) == Some("header") {
                            if let Some(header) = scheme.get("name").and_then(Value::as_str) {
                                entries
                                    .insert(header.to_ascii_lowercase(), header.to_string());
                            }
                        }
                    },
                    Some("http") => {
                        if matches!(
                            scheme.get("scheme").and_then(Value::as_str),
                            Some("bearer") | Some("basic")
                        ) {
                            entries
                                .insert("authorization".to_string(), "Authorization".to_string());
                        }
                    },
                    _ => {},
                }
            }
        }

        // Header parameters keep their declared spelling regardless of the
        // security list.
        if let Some(parameters) = components
            .and_then(|c| c.get("parameters"))
            .and_then(Value::as_object)
        {
            for param in parameters.values() {
                if param.get("in").and_then(Value::as_str) != Some("header") {
                    continue;
                }
                if let Some(name) = param.get("name").and_then(Value::as_str) {
                    entries.insert(name.to_ascii_lowercase(), name.to_string());
                }
            }
        }

        Self { entries }
    }

    /// Original spelling for a lowercased header name, if recovered.
    pub fn original(&self, lower: &str) -> Option<&str> {
        self.entries.get(lower).map(String::as_str)
    }

    /// Original spelling, or the supplied canonical name when the raw text
    /// yielded nothing.
    pub fn original_or<'a>(&'a self, lower: &str, fallback: &'a str) -> &'a str {
        self.original(lower).unwrap_or(fallback)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAPIDAPI_SPEC: &str = r#"{
        "openapi": "3.0.0",
        "security": [{"RapidAPIKey": []}],
        "components": {
            "securitySchemes": {
                "RapidAPIKey": {"type": "apiKey", "in": "header", "name": "X-RapidAPI-Key"},
                "UnusedKey": {"type": "apiKey", "in": "header", "name": "X-Unused-Key"}
            },
            "parameters": {
                "HostHeader": {"name": "X-RapidAPI-Host", "in": "header", "schema": {"type": "string"}}
            }
        }
    }"#;

    #[test]
    fn test_referenced_scheme_recovered() {
        let map = HeaderCaseMap::from_raw(RAPIDAPI_SPEC);
        assert_eq!(map.original("x-rapidapi-key"), Some("X-RapidAPI-Key"));
    }

    #[test]
    fn test_unreferenced_scheme_absent() {
        let map = HeaderCaseMap::from_raw(RAPIDAPI_SPEC);
        assert_eq!(map.original("x-unused-key"), None);
    }

    #[test]
    fn test_header_parameters_always_mapped() {
        let map = HeaderCaseMap::from_raw(RAPIDAPI_SPEC);
        assert_eq!(map.original("x-rapidapi-host"), Some("X-RapidAPI-Host"));
    }

    #[test]
    fn test_no_global_security_means_no_scheme_entries() {
        let raw = r#"{
            "components": {
                "securitySchemes": {
                    "Key": {"type": "apiKey", "in": "header", "name": "X-Api-Key"}
                }
            }
        }"#;
        let map = HeaderCaseMap::from_raw(raw);
        assert_eq!(map.original("x-api-key"), None);
    }

    #[test]
    fn test_http_bearer_maps_authorization() {
        let raw = r#"
openapi: 3.0.0
security:
  - BearerAuth: []
components:
  securitySchemes:
    BearerAuth:
      type: http
      scheme: bearer
"#;
        let map = HeaderCaseMap::from_raw(raw);
        assert_eq!(map.original("authorization"), Some("Authorization"));
    }

    #[test]
    fn test_unparseable_input_yields_empty_map() {
        let map = HeaderCaseMap::from_raw("{not json: [and not yaml");
        assert!(map.is_empty());
        assert_eq!(map.original_or("x-api-key", "x-api-key"), "x-api-key");
    }
}
