#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

mod bridge;
mod cli;
mod config;
mod discord;
mod matrix;
mod media;
mod store;
mod utils;
mod web;

use bridge::BridgeCore;
use cli::Cli;
use config::{ChannelMap, Config};
use discord::DiscordClient;
use matrix::MatrixSession;
use store::{CorrelationStore, IdentityCache};
use web::WebServer;
use web::metrics::Metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.write_default || !cli.config.exists() {
        Config::write_default(&cli.config)
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
        println!(
            "wrote an example configuration to {}, edit it and start again",
            cli.config.display()
        );
        return Ok(());
    }

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    utils::logging::init_tracing(&config.logging)?;
    Metrics::mark_started();

    info!("matrix-discord relay starting up");

    let identities = Arc::new(
        IdentityCache::open(config.storage.identities_path())
            .context("failed to open the identity cache")?,
    );
    let correlations = Arc::new(
        CorrelationStore::open(config.storage.messages_path())
            .context("failed to open the message correlation store")?,
    );

    let matrix = Arc::new(MatrixSession::new(&config.matrix)?);
    let discord = Arc::new(DiscordClient::new(&config.discord));

    let channels = ChannelMap::new(&config.bridge);
    info!("bridging {} channel(s)", channels.len());

    let bridge = Arc::new(BridgeCore::new(
        channels,
        identities,
        correlations,
        discord.clone(),
        matrix.clone(),
        matrix.user_id(),
        &config.relay,
    ));

    let web_handle = if config.web.enabled {
        let web_server = WebServer::new(&config.web, bridge.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!("web server error: {}", e);
            }
        }))
    } else {
        None
    };

    let gateway_bridge = bridge.clone();
    let discord_handle = tokio::spawn(async move {
        if let Err(e) = discord.run_gateway(gateway_bridge).await {
            error!("discord gateway error: {:#}", e);
        }
    });

    let relay = config.relay.clone();
    let sync_handle = tokio::spawn(async move {
        if let Err(e) = matrix.run_sync_loop(bridge, &relay).await {
            error!("matrix sync error: {:#}", e);
        }
    });

    let web_stopped = async {
        match web_handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = discord_handle => {},
        _ = sync_handle => {},
        _ = web_stopped => {},
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
    }

    info!("matrix-discord relay shutting down");
    Ok(())
}
