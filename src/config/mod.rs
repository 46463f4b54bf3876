//! Configuration for the openapi-mcp gateway.
//!
//! Supports YAML and TOML files plus environment overrides. The database
//! connection string always comes from `DATABASE_URL`; the `DEBUG` variable
//! toggles verbose authentication tracing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Postgres connection string, normally injected via `DATABASE_URL`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Verbose auth-resolution tracing, toggled by the `DEBUG` env var.
    #[serde(skip)]
    pub debug_auth: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    /// Path suffix under each tenant that serves the MCP endpoint.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Session lifetime; `touch` extends a session by this much.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Interval between expiry sweeps of the session store.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Heartbeat period for GET notification streams. 0 disables heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Run without session identity. Deployments fronted by their own
    /// session cookie set this; clients must then send no session id.
    #[serde(default)]
    pub stateless: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_base_path() -> String {
    "/mcp".to_string()
}
fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    5 * 60
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            session_ttl_secs: default_session_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stateless: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl McpConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        if self.heartbeat_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.heartbeat_interval_secs))
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("yaml");

        match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| Error::Validation(format!("Failed to parse YAML: {}", e))),
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::Validation(format!("Failed to parse TOML: {}", e))),
            _ => Err(Error::Validation(format!(
                "Unsupported config format: {}",
                extension
            ))),
        }
    }

    /// Discover and load configuration from standard locations
    pub fn discover_and_load() -> Result<Self> {
        let mut search_paths = vec![
            PathBuf::from("openapi-mcp.yaml"),
            PathBuf::from("openapi-mcp.toml"),
        ];

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".openapi-mcp/config.yaml"));
        }

        search_paths.push(PathBuf::from("/etc/openapi-mcp/config.yaml"));

        for path in search_paths {
            if path.exists() {
                let mut config = Self::from_file(&path)?;
                config.apply_env();
                return Ok(config);
            }
        }

        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = Some(url);
            }
        }
        self.debug_auth = std::env::var("DEBUG").map(|v| v != "0" && !v.is_empty()).unwrap_or(false);
    }

    /// Validate the parts that must be present before serving.
    pub fn validate(&self) -> Result<()> {
        match &self.database_url {
            None => Err(Error::Validation("DATABASE_URL is required".to_string())),
            Some(url) if !url.starts_with("postgresql://") => Err(Error::Validation(
                "DATABASE_URL must begin with postgresql://".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.mcp.base_path, "/mcp");
        assert_eq!(config.mcp.session_ttl_secs, 86400);
        assert_eq!(config.mcp.cleanup_interval_secs, 300);
        assert_eq!(
            config.mcp.heartbeat_interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_heartbeat_zero_disables() {
        let mcp = McpConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(mcp.heartbeat_interval(), None);
    }

    #[test]
    fn test_database_url_validation() {
        let mut config = GatewayConfig::default();
        assert!(config.validate().is_err());

        config.database_url = Some("mysql://nope".to_string());
        assert!(config.validate().is_err());

        config.database_url = Some("postgresql://localhost/openapi_mcp".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9999\nmcp:\n  heartbeat_interval_secs: 5\n"
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.mcp.heartbeat_interval_secs, 5);
        // Untouched fields keep defaults.
        assert_eq!(config.mcp.base_path, "/mcp");
    }
}
