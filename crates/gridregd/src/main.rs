//! gridregd — the grid registry daemon.
//!
//! Reads `gridreg.toml`, hosts every VDB whose replica list names this
//! node, replicates to the other replicas, and serves the registry REST API.
//!
//! # Usage
//!
//! ```text
//! gridregd run --config /etc/gridreg/gridreg.toml
//! gridregd check-config --config /etc/gridreg/gridreg.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use gridreg_core::{RegistryConfig, StaticSchema};
use gridreg_registry::{HttpTransport, RegistryService, StoreLocation};

#[derive(Parser)]
#[command(name = "gridregd", about = "Grid registry daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the registry service.
    Run {
        /// Path to gridreg.toml.
        #[arg(long, default_value = "/etc/gridreg/gridreg.toml")]
        config: PathBuf,

        /// Override the listen address from the config file.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Override the data directory from the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the hostname this node is known by.
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Validate a config file and print which VDBs this node would host.
    CheckConfig {
        #[arg(long, default_value = "/etc/gridreg/gridreg.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            listen,
            data_dir,
            hostname,
        } => {
            let mut config = RegistryConfig::from_file(&config)?;
            if let Some(listen) = listen {
                config.listen = listen.to_string();
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(hostname) = hostname {
                config.hostname = hostname;
            }
            config.validate()?;
            run(config).await
        }
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gridregd=debug,gridreg=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: RegistryConfig) -> anyhow::Result<()> {
    info!(hostname = %config.hostname, "grid registry starting");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    // ── Registry service ───────────────────────────────────────

    let schema = Arc::new(StaticSchema::from_config(&config.vdb));
    let transport = Arc::new(HttpTransport::new(config.registry.request_timeout()));
    let service = Arc::new(RegistryService::new(
        config.hostname.clone(),
        StoreLocation::Directory(config.data_dir.clone()),
        config.registry.clone(),
        schema,
        transport,
    ));

    for vdb in &config.vdb {
        service
            .create_vdb(&vdb.name, &vdb.replicas)
            .await
            .with_context(|| format!("failed to configure VDB {}", vdb.name))?;
    }
    info!(vdbs = config.vdb.len(), "VDBs configured");

    // ── API server ─────────────────────────────────────────────

    let router = gridreg_api::build_router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(config.listen.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    service.shutdown().await;
    info!("grid registry stopped");
    Ok(())
}

fn check_config(path: &std::path::Path) -> anyhow::Result<()> {
    let config = RegistryConfig::from_file(path)?;
    println!("config OK: hostname {}", config.hostname);
    for vdb in &config.vdb {
        let role = if config.hosts_vdb(vdb) { "hosted" } else { "forwarded" };
        println!(
            "  {:<16} {:<10} {} replica(s), {} table schema(s)",
            vdb.name,
            role,
            vdb.replicas.len(),
            vdb.table.len()
        );
    }
    Ok(())
}
