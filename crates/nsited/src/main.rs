//! `nsited`: the nsite gateway daemon.
//!
//! Serves static sites published on nostr relays, with their files fetched
//! from blossom mirrors.
//!
//! # Usage
//!
//! ```text
//! nsited start                                  # serve on 0.0.0.0:3000
//! nsited start -c nsited.toml                   # start with a config file
//! nsited start -l 127.0.0.1:8080 --memory       # override listen address, in-memory cache
//! nsited resolve npub1….example.com /about.html # resolve one request and print it
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use nsite_blossom::HttpMirrorClient;
use nsite_cache::{CacheFabric, open_backend};
use nsite_engine::{Gateway, GatewayParts, InvalidationListener};
use nsite_http::{GatewayServer, GatewayServerConfig};
use nsite_relay::{PoolConfig, RelayPool};
use nsite_resolver::{HickoryDns, Nip05Directory, QUERY_TIMEOUT};
use tracing::info;

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "nsited", version, about = "nsite gateway daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache location (`in-memory`, `fjall://<dir>` or a directory).
    #[arg(long, global = true, env = "NSITE_CACHE_LOCATION")]
    cache_location: Option<String>,

    /// Keep the cache in memory regardless of configuration.
    #[arg(short, long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Start {
        /// Override the listen address (e.g. "127.0.0.1:3000").
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Resolve one request and print the response headers.
    Resolve {
        /// Request hostname.
        host: String,

        /// Request path.
        #[arg(default_value = "/")]
        path: String,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    // CLI args override config file values.
    if let Some(location) = cli.cache_location {
        config.cache.location = location;
    }
    if cli.memory {
        config.cache.location = "in-memory".to_string();
    }

    match cli.command {
        Commands::Start { listen } => {
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            cmd_start(config).await
        }
        Commands::Resolve { host, path } => cmd_resolve(config, &host, &path).await,
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The gateway and the relay pool it runs on.
struct Node {
    gateway: Arc<Gateway>,
    pool: Arc<RelayPool>,
    cache: CacheFabric,
}

fn build_node(config: &CliConfig) -> Result<Node> {
    let backend = open_backend(&config.cache.location)
        .with_context(|| format!("failed to open cache at {}", config.cache.location))?;
    let cache = CacheFabric::new(backend, config.cache_settings());

    let pool = Arc::new(RelayPool::new(PoolConfig::default()).context("failed to create relay pool")?);
    let dns = Arc::new(HickoryDns::from_system_conf().context("failed to read DNS configuration")?);
    let directory =
        Arc::new(Nip05Directory::new(QUERY_TIMEOUT).context("failed to create name directory")?);
    let mirrors = Arc::new(HttpMirrorClient::new().context("failed to create mirror client")?);

    let gateway = Gateway::new(
        config.gateway_config()?,
        GatewayParts {
            cache: cache.clone(),
            relays: pool.clone(),
            dns,
            directory,
            mirrors,
        },
    );
    Ok(Node {
        gateway: Arc::new(gateway),
        pool,
        cache,
    })
}

// -----------------------------------------------------------------------
// nsited start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting nsited");
    info!(
        listen = %config.server.listen_addr,
        cache = %config.cache.location,
        lookup_relays = config.relays.lookup.len(),
        subscription_relays = config.relays.subscription.len(),
        extra_mirrors = config.mirrors.extra.len(),
        "gateway configuration"
    );

    let node = build_node(&config)?;
    let listener = InvalidationListener::spawn(
        node.cache.clone(),
        node.pool.clone(),
        &config.relays.subscription,
    );

    let server = GatewayServer::new(GatewayServerConfig {
        gateway: Arc::clone(&node.gateway),
    });
    server
        .serve_with_shutdown(&config.server.listen_addr, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down");
    listener.shutdown().await;
    node.pool.shutdown();
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// -----------------------------------------------------------------------
// nsited resolve
// -----------------------------------------------------------------------

async fn cmd_resolve(config: CliConfig, host: &str, path: &str) -> Result<()> {
    let node = build_node(&config)?;
    let result = node.gateway.resolve_content(host, path).await;
    node.pool.shutdown();

    let content = match result {
        Ok(content) => content,
        Err(e) => {
            println!("{}", e.status());
            println!();
            println!("{e}");
            return Ok(());
        }
    };

    println!("{}", content.status);
    println!("identity: {}", content.identity);
    println!("record: {} ({})", content.record.path, content.record.content_hash);
    println!("mirror: {}", content.mirror);
    for (name, value) in content.headers().iter() {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }

    let started = std::time::Instant::now();
    let mut body = content.body;
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("body verification failed")?;
        received += chunk.len() as u64;
    }
    println!();
    println!("verified {received} bytes in {:.1?}", started.elapsed());
    Ok(())
}
