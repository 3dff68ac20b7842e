//! Vault Gateway: multi-tenant de-identification gateway
//!
//! A single-process server that exposes de-identification tools over
//! JSON-RPC 2.0 on one HTTP endpoint. Every request carries its own
//! credential and vault routing; nothing tenant-specific is shared between
//! requests.
//!
//! Usage:
//!   vault-gateway                                   # Default port 3000
//!   vault-gateway --port 8080                       # Custom port
//!   vault-gateway --vault-id v1 --vault-url https://abc.vault.example.com
//!   VAULT_ID=v1 VAULT_URL=... vault-gateway         # Fallbacks from the environment

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gateway_protocol::RouteDefaults;
use gateway_protocol::route::extract_cluster_id;
use gateway_server::GatewayServer;
use gateway_services::{
    ClientFactory, ClientSettings, DehydrateFileTool, DehydrateTool, PollSettings, RehydrateTool,
};
use gateway_transport::{TransportConfig, TransportServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vault-gateway", about = "Vault Gateway: multi-tenant de-identification server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Vault used when a request does not name one
    #[arg(long, env = "VAULT_ID")]
    vault_id: Option<String>,

    /// Vault URL used when a request does not name one
    #[arg(long, env = "VAULT_URL")]
    vault_url: Option<String>,

    /// Account sent upstream when a request does not name one
    #[arg(long, env = "ACCOUNT_ID")]
    account_id: Option<String>,

    /// Workspace sent upstream when a request does not name one
    #[arg(long, env = "WORKSPACE_ID")]
    workspace_id: Option<String>,

    /// Send all upstream calls to this base URL instead of the vault URL
    #[arg(long, env = "DETECT_ENDPOINT_OVERRIDE")]
    upstream_url: Option<String>,

    /// Upstream request timeout in seconds
    #[arg(long, default_value = "60")]
    request_timeout_secs: u64,

    /// Delay between file run status checks, in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Maximum file run status checks before giving up
    #[arg(long, default_value = "60")]
    poll_attempts: u32,

    /// Enable permissive CORS
    #[arg(long)]
    enable_cors: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn route_defaults(&self) -> RouteDefaults {
        RouteDefaults {
            vault_id: self.vault_id.clone(),
            vault_url: self.vault_url.clone(),
            account_id: self.account_id.clone(),
            workspace_id: self.workspace_id.clone(),
        }
    }

    fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            endpoint_override: self.upstream_url.clone(),
            poll: PollSettings {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.poll_attempts,
            },
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let route_defaults = cli.route_defaults();
    if let Some(ref url) = route_defaults.vault_url {
        if !url.trim().is_empty() && extract_cluster_id(url.trim()).is_none() {
            warn!("Default vault URL is malformed; requests relying on it will be rejected: {url}");
        }
    }

    let factory = ClientFactory::new(cli.client_settings()).context("Failed to build upstream client")?;

    let mut server = GatewayServer::new(factory);
    server.register_tool(DehydrateTool)?;
    server.register_tool(RehydrateTool)?;
    server.register_tool(DehydrateFileTool)?;
    server.initialize();

    let server = Arc::new(server);

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        route_defaults: route_defaults.clone(),
        enable_cors: cli.enable_cors,
        ..TransportConfig::default()
    };

    let mut transport = TransportServer::start_with_observer(transport_config, server.clone(), None)
        .await
        .context("Failed to start transport")?;

    let endpoint = format!("http://{}:{}/mcp", cli.hostname, transport.port());

    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Vault Gateway running!");
    println!();
    println!("  Endpoint:       {endpoint}");
    println!("  Tools:          {}", server.registry().names().join(", "));
    println!(
        "  Default vault:  {}",
        route_defaults.vault_id.as_deref().unwrap_or("(none, set per request)")
    );
    if let Some(ref upstream) = cli.upstream_url {
        println!("  Upstream:       {upstream} (override)");
    }
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down...");
    server.shutdown();
    transport.stop().await;
    println!("  Server stopped.");
    Ok(())
}
