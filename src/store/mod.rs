//! Spec-record persistence contract.
//!
//! The gateway consumes stored OpenAPI specifications through [`SpecStore`].
//! The production implementation is backed by the `openapi_specs` table and
//! lives outside this crate; [`MemorySpecStore`] serves tests and demo runs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Storage format of the raw spec text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Yaml,
    Json,
}

/// One stored OpenAPI specification.
///
/// `spec_content` holds the exact bytes fed to the parser; header-case
/// recovery depends on them being unaltered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRecord {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub version: String,
    pub spec_content: String,
    pub endpoint_path: String,
    pub file_format: FileFormat,
    pub file_size: i64,
    pub api_key_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpecRecord {
    /// Leading path segment, lowercased. This is the tenant key used for
    /// routing requests to this spec.
    pub fn tenant_key(&self) -> String {
        self.endpoint_path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// Fields supplied when inserting a new spec record.
#[derive(Debug, Clone)]
pub struct NewSpecRecord {
    pub name: String,
    pub title: String,
    pub version: String,
    pub spec_content: String,
    pub endpoint_path: String,
    pub file_format: FileFormat,
    pub api_key_token: Option<String>,
}

/// Access methods the gateway requires from the spec store.
#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<SpecRecord>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<SpecRecord>>;
    async fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<SpecRecord>>;
    async fn insert(&self, new: NewSpecRecord) -> Result<SpecRecord>;
    async fn set_active(&self, name: &str, active: bool) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn update_api_key_token(&self, name: &str, token: Option<&str>) -> Result<()>;
}

/// In-memory spec store. Enforces the same uniqueness rules as the
/// relational schema: `name` and `endpoint_path` are each globally unique.
#[derive(Default)]
pub struct MemorySpecStore {
    records: RwLock<Vec<SpecRecord>>,
    next_id: AtomicI64,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn list_active(&self) -> Result<Vec<SpecRecord>> {
        Ok(self.records.read().iter().filter(|r| r.is_active).cloned().collect())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<SpecRecord>> {
        Ok(self.records.read().iter().find(|r| r.name == name).cloned())
    }

    async fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<SpecRecord>> {
        Ok(self.records.read().iter().find(|r| r.endpoint_path == endpoint).cloned())
    }

    async fn insert(&self, new: NewSpecRecord) -> Result<SpecRecord> {
        if !new.endpoint_path.starts_with('/') {
            return Err(Error::Validation(format!(
                "endpoint_path must begin with '/': {}",
                new.endpoint_path
            )));
        }

        let mut records = self.records.write();
        if records.iter().any(|r| r.name == new.name) {
            return Err(Error::Conflict(format!("spec name already exists: {}", new.name)));
        }
        if records.iter().any(|r| r.endpoint_path == new.endpoint_path) {
            return Err(Error::Conflict(format!(
                "endpoint_path already exists: {}",
                new.endpoint_path
            )));
        }

        let now = Utc::now();
        let record = SpecRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: new.name,
            title: new.title,
            version: new.version,
            file_size: new.spec_content.len() as i64,
            spec_content: new.spec_content,
            endpoint_path: new.endpoint_path,
            file_format: new.file_format,
            api_key_token: new.api_key_token,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn set_active(&self, name: &str, active: bool) -> Result<()> {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.name == name) {
            Some(record) => {
                record.is_active = active;
                record.updated_at = Utc::now();
                Ok(())
            },
            None => Err(Error::NotFound(format!("spec not found: {}", name))),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.name != name);
        if records.len() == before {
            return Err(Error::NotFound(format!("spec not found: {}", name)));
        }
        Ok(())
    }

    async fn update_api_key_token(&self, name: &str, token: Option<&str>) -> Result<()> {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.name == name) {
            Some(record) => {
                record.api_key_token = token.map(String::from);
                record.updated_at = Utc::now();
                Ok(())
            },
            None => Err(Error::NotFound(format!("spec not found: {}", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, endpoint: &str) -> NewSpecRecord {
        NewSpecRecord {
            name: name.to_string(),
            title: "Sample API".to_string(),
            version: "1.0.0".to_string(),
            spec_content: "{}".to_string(),
            endpoint_path: endpoint.to_string(),
            file_format: FileFormat::Json,
            api_key_token: None,
        }
    }

    #[tokio::test]
    async fn test_insert_list_deactivate_roundtrip() {
        let store = MemorySpecStore::new();
        store.insert(sample("weather", "/weather")).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);

        store.set_active("weather", false).await.unwrap();
        let active = store.list_active().await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_uniqueness_conflicts() {
        let store = MemorySpecStore::new();
        store.insert(sample("weather", "/weather")).await.unwrap();

        let err = store.insert(sample("weather", "/other")).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let err = store.insert(sample("other", "/weather")).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_endpoint_path_must_be_rooted() {
        let store = MemorySpecStore::new();
        let err = store.insert(sample("bad", "nope")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_tenant_key_is_lowercased_first_segment() {
        let store = MemorySpecStore::new();
        let record = store.insert(sample("geo", "/GeoData/v2")).await.unwrap();
        assert_eq!(record.tenant_key(), "geodata");
    }

    #[tokio::test]
    async fn test_update_api_key_token() {
        let store = MemorySpecStore::new();
        store.insert(sample("weather", "/weather")).await.unwrap();
        store.update_api_key_token("weather", Some("tok")).await.unwrap();

        let record = store.get_by_name("weather").await.unwrap().unwrap();
        assert_eq!(record.api_key_token.as_deref(), Some("tok"));
    }
}
