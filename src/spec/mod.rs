//! Parsed-spec catalog with atomic reload.
//!
//! Each stored spec is parsed once into an immutable [`ParsedSpec`]; the
//! catalog swaps whole snapshots so readers never observe a partial reload.

use crate::error::{Error, Result};
use crate::store::{FileFormat, SpecRecord, SpecStore};
use crate::tools::{synthesize_tools, ToolBinding};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub mod header_case;
pub mod security;

pub use header_case::HeaderCaseMap;
pub use security::{extract_auth, AuthDescriptor, AuthKind, AuthLocation};

/// One loaded spec: the canonical document plus the raw bytes retained for
/// header-case recovery, and everything derived from them.
#[derive(Debug)]
pub struct ParsedSpec {
    /// Tenant key (leading endpoint-path segment, lowercased).
    pub endpoint: String,
    pub document: Value,
    pub raw_content: String,
    pub header_case: HeaderCaseMap,
    pub auth: AuthDescriptor,
    pub tools: Vec<ToolBinding>,
    pub record: SpecRecord,
}

impl ParsedSpec {
    /// Parse a stored record. The document parse follows the declared
    /// format; the casing map re-scans the raw text independently.
    pub fn from_record(record: SpecRecord) -> Result<Self> {
        let document: Value = match record.file_format {
            FileFormat::Json => serde_json::from_str(&record.spec_content)?,
            FileFormat::Yaml => serde_yaml::from_str(&record.spec_content)?,
        };
        if !document.is_object() {
            return Err(Error::Validation(format!(
                "spec {} is not an OpenAPI document",
                record.name
            )));
        }

        let header_case = HeaderCaseMap::from_raw(&record.spec_content);
        let auth = extract_auth(&document, &header_case);
        let tools = synthesize_tools(&document);

        Ok(Self {
            endpoint: record.tenant_key(),
            raw_content: record.spec_content.clone(),
            document,
            header_case,
            auth,
            tools,
            record,
        })
    }

    /// Base URL for upstream calls: `servers[0].url` as written, or an
    /// https URL built from the extracted host.
    pub fn base_url(&self) -> String {
        self.document
            .get("servers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .and_then(|server| server.get("url"))
            .and_then(Value::as_str)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}", self.auth.api_host))
    }

    pub fn binding(&self, tool_name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|b| b.tool.name == tool_name)
    }
}

#[derive(Default)]
struct CatalogInner {
    by_tenant: HashMap<String, Arc<ParsedSpec>>,
}

/// Snapshot registry of parsed specs keyed by tenant. Reads are lock-free;
/// a reload builds a fresh snapshot and swaps it in atomically.
pub struct SpecCatalog {
    inner: ArcSwap<CatalogInner>,
}

impl Default for SpecCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecCatalog {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(CatalogInner::default()),
        }
    }

    /// Replace the catalog from the store's active specs. Specs that fail
    /// to parse are logged and skipped; the rest load. Returns the names
    /// that loaded.
    pub async fn load_from(&self, store: &dyn SpecStore) -> Result<Vec<String>> {
        let records = store.list_active().await?;

        let mut by_tenant = HashMap::new();
        let mut loaded = Vec::new();
        for record in records {
            let name = record.name.clone();
            match ParsedSpec::from_record(record) {
                Ok(spec) => {
                    info!(spec = %name, tenant = %spec.endpoint, tools = spec.tools.len(), "Loaded spec");
                    by_tenant.insert(spec.endpoint.clone(), Arc::new(spec));
                    loaded.push(name);
                },
                Err(e) => {
                    warn!(spec = %name, error = %e, "Skipping spec that failed to parse");
                },
            }
        }

        self.inner.store(Arc::new(CatalogInner { by_tenant }));
        Ok(loaded)
    }

    /// Look up the spec serving a tenant key.
    pub fn get(&self, tenant: &str) -> Option<Arc<ParsedSpec>> {
        self.inner.load().by_tenant.get(&tenant.to_ascii_lowercase()).cloned()
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.inner.load().by_tenant.keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn len(&self) -> usize {
        self.inner.load().by_tenant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
