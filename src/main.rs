//! openapi-mcp - OpenAPI to MCP gateway
//!
//! Loads a catalog of OpenAPI 3.x specifications and exposes one MCP tool
//! per HTTP operation over a Streamable-HTTP transport. Tool calls
//! materialize the described upstream request, inject credentials resolved
//! per request, and return the upstream response as the tool result.

use clap::{Parser, Subcommand};
use openapi_mcp::store::{FileFormat, MemorySpecStore, NewSpecRecord, SpecStore};
use openapi_mcp::{config::GatewayConfig, error, spec::ParsedSpec, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "openapi-mcp")]
#[command(about = "OpenAPI to MCP gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "OPENAPI_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "OPENAPI_MCP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,

        /// OpenAPI spec files served from an in-memory store. Each file is
        /// mounted under /<file-stem>. Without this flag the store is
        /// expected to be populated externally.
        #[arg(long = "spec", value_name = "FILE")]
        specs: Vec<PathBuf>,
    },

    /// Parse a spec file and report what the gateway would expose
    Validate {
        /// Spec file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List specs loaded from the given files
    List {
        /// OpenAPI spec files
        #[arg(value_name = "FILE")]
        specs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level)?;

    info!("openapi-mcp v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { host, port, specs } => {
            let mut config = if let Some(path) = &cli.config {
                GatewayConfig::from_file(path)?
            } else {
                GatewayConfig::discover_and_load()?
            };
            config.apply_env();
            config.validate()?;

            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let store = Arc::new(MemorySpecStore::new());
            for path in &specs {
                let record = store.insert(record_from_file(path)?).await?;
                info!(spec = %record.name, endpoint = %record.endpoint_path, "Imported spec");
            }

            let server = openapi_mcp::GatewayServer::new(config, store).await?;
            server.run().await?;
        },

        Commands::Validate { file } => {
            let record = record_from_file(&file)?;
            let store = MemorySpecStore::new();
            let record = store.insert(record).await?;
            match ParsedSpec::from_record(record) {
                Ok(spec) => {
                    println!("✓ {} parses", file.display());
                    println!("  title:    {}", spec.record.title);
                    println!("  version:  {}", spec.record.version);
                    println!("  endpoint: {}", spec.record.endpoint_path);
                    println!("  auth:     {:?}", spec.auth.kind);
                    println!("  tools:    {}", spec.tools.len());
                },
                Err(e) => {
                    eprintln!("✗ {} failed to parse:", file.display());
                    eprintln!("{}", e);
                    std::process::exit(1);
                },
            }
        },

        Commands::List { specs } => {
            let store = MemorySpecStore::new();
            for path in &specs {
                store.insert(record_from_file(path)?).await?;
            }
            println!("Loaded specs:");
            for record in store.list_active().await? {
                println!(
                    "  - {} ({} v{}): {}",
                    record.name, record.title, record.version, record.endpoint_path
                );
            }
        },
    }

    Ok(())
}

/// Build a spec record from a file, mounting it under the file stem.
fn record_from_file(path: &Path) -> Result<NewSpecRecord> {
    let content = std::fs::read_to_string(path)?;

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let file_format = match extension {
        "json" => FileFormat::Json,
        _ => FileFormat::Yaml,
    };

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(String::from)
        .ok_or_else(|| error::Error::Validation(format!("bad spec path: {}", path.display())))?;

    let document: serde_json::Value = match file_format {
        FileFormat::Json => serde_json::from_str(&content)?,
        FileFormat::Yaml => serde_yaml::from_str(&content)?,
    };
    let info = document.get("info");
    let title = info
        .and_then(|i| i.get("title"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&name)
        .to_string();
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("0.0.0")
        .to_string();

    Ok(NewSpecRecord {
        endpoint_path: format!("/{}", name.to_ascii_lowercase()),
        name,
        title,
        version,
        spec_content: content,
        file_format,
        api_key_token: None,
    })
}

fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    Ok(())
}
