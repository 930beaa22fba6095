//! The bunch realtime gateway daemon.
//!
//! Serves the WebSocket session endpoint at `/ws`, plus `/health` and
//! Prometheus `/metrics`. Auth tokens and seed chat data come from a JSON
//! config file (see `config.json.example`).

#![deny(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bunch_core::ids::{BunchId, ChannelId, UserId};
use bunch_core::model::UserRef;
use bunch_server::auth::{Identity, StaticTokenVerifier};
use bunch_server::metrics::install_recorder;
use bunch_server::server::GatewayServer;
use bunch_server::store::MemoryChatStore;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{GatewayConfig, load_config};

#[derive(Parser, Debug)]
#[command(name = "bunchd", about = "Bunch realtime messaging gateway")]
struct Cli {
    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 picks an ephemeral port)
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable the Prometheus /metrics endpoint
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let verifier = build_verifier(&config);
    let store = build_store(&config);

    let metrics = if cli.no_metrics {
        None
    } else {
        Some(install_recorder().context("failed to install metrics recorder")?)
    };

    let mut server =
        GatewayServer::with_metrics(config.server.clone(), verifier, store, metrics);
    let (addr, serve_handle) = server
        .listen()
        .await
        .context("failed to bind gateway listener")?;
    info!(%addr, "gateway listening");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    let shutdown = server.shutdown().clone();
    shutdown.shutdown();
    server.abort_dispatcher();
    shutdown.graceful_shutdown(vec![serve_handle], None).await;
    info!("gateway stopped");
    Ok(())
}

fn build_verifier(config: &GatewayConfig) -> Arc<StaticTokenVerifier> {
    let verifier = StaticTokenVerifier::new();
    for (token, entry) in &config.tokens {
        verifier.insert(
            token.clone(),
            Identity {
                user_id: UserId::from(entry.user_id.as_str()),
                username: entry.username.clone(),
            },
        );
    }
    if config.tokens.is_empty() {
        warn!("no auth tokens configured, every connection will be rejected");
    }
    verifier
}

fn build_store(config: &GatewayConfig) -> Arc<MemoryChatStore> {
    let store = MemoryChatStore::new();
    for seed in &config.bunches {
        let bunch_id = BunchId::from(seed.id.as_str());
        store.add_bunch(&bunch_id);
        for channel in &seed.channels {
            store.add_channel(&bunch_id, &ChannelId::from(channel.as_str()));
        }
        for member in &seed.members {
            let user = UserRef {
                id: UserId::from(member.user_id.as_str()),
                username: member.username.clone(),
            };
            store.add_member(&bunch_id, &user, &member.role);
        }
    }
    store
}
