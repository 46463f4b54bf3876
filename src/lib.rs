//! openapi-mcp Library
//!
//! Multi-tenant gateway that exposes OpenAPI 3.x services as MCP tool
//! servers over a Streamable-HTTP transport. This library can be embedded
//! in other applications.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod session;
pub mod spec;
pub mod store;
pub mod tools;
pub mod transport;
pub mod types;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use server::GatewayServer;
