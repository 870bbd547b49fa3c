// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Waddle Social

//! buddycloud-discover - find the buddycloud servers of an XMPP domain.
//!
//! Logs in with the configured account, asks the account's domain for its
//! channel server (or any JID's domain for its media server) and prints the
//! answer as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use buddycloud_xmpp::socket::{
    DISCOVER, DISCOVER_INFO, DISCOVER_ITEMS, DISCOVER_MEDIA_SERVER, PRESENCE,
};
use buddycloud_xmpp::{
    BuddycloudSocket, DiscoveryEngine, IqTracker, MemoryCache, SocketRequest, XmppDisco,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod xmpp;

use config::Config;
use xmpp::XmppSession;

/// Discover buddycloud channel and media servers
#[derive(Parser)]
#[command(name = "buddycloud-discover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/buddycloud/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// XMPP JID to log in with
    #[arg(short, long, global = true)]
    jid: Option<String>,

    /// XMPP password
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// XMPP server host (if different from JID domain)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Do not read or write the discovery cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the channel server of the account's domain
    Channel {
        /// Use this channel server instead of discovering one
        #[arg(short, long)]
        server: Option<String>,

        /// Announce ourselves to the channel server once found
        #[arg(long)]
        presence: bool,

        /// Per-component timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Find the media server for a JID or domain
    Media {
        /// JID or domain whose media server to look up
        of: String,

        /// Per-component timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// List disco#items of an entity
    Items {
        of: String,
        #[arg(short, long)]
        node: Option<String>,
    },
    /// List disco#info of an entity
    Info {
        of: String,
        #[arg(short, long)]
        node: Option<String>,
    },
    /// Print the discovery cache
    Cache,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,buddycloud_discover=info,buddycloud_xmpp=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(jid) = cli.jid {
        config.xmpp.jid = Some(jid);
    }
    if let Some(password) = cli.password {
        config.xmpp.password = Some(password);
    }
    if let Some(host) = cli.host {
        config.xmpp.server = Some(host);
    }

    if let Commands::Cache = cli.command {
        let snapshot = config.load_cache()?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let cache = if cli.no_cache {
        None
    } else {
        Some(Arc::new(MemoryCache::from_snapshot(config.load_cache()?)))
    };

    let mut session = XmppSession::new(&config.xmpp)?;
    let domain = session.domain();
    session.wait_online().await?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let tracker = Arc::new(IqTracker::new(Arc::new(outbound_tx)));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let pump = tokio::spawn(session.run(tracker.clone(), outbound_rx, shutdown_rx));

    let disco = Arc::new(XmppDisco::new(tracker.clone()));
    let engine = Arc::new(DiscoveryEngine::new(disco.clone(), &config.discovery));
    if let Some(cache) = &cache {
        engine.set_cache(Some(cache.clone()));
    }
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let socket = BuddycloudSocket::new(engine.clone(), disco, tracker, domain, events_tx);

    let outcome = match cli.command {
        Commands::Channel {
            server,
            presence,
            timeout_ms,
        } => {
            if let Some(ms) = timeout_ms {
                engine.set_discovery_timeout(Duration::from_millis(ms));
            }
            let outcome = request(&socket, DISCOVER, json!({ "server": server })).await?;
            if presence && outcome.is_ok() {
                socket.handle(SocketRequest::new(PRESENCE, Value::Null)).await;
            }
            outcome
        }
        Commands::Media { of, timeout_ms } => {
            if let Some(ms) = timeout_ms {
                engine.set_media_server_discovery_timeout(Duration::from_millis(ms));
            }
            request(&socket, DISCOVER_MEDIA_SERVER, json!({ "of": of })).await?
        }
        Commands::Items { of, node } => {
            request(&socket, DISCOVER_ITEMS, json!({ "of": of, "node": node })).await?
        }
        Commands::Info { of, node } => {
            request(&socket, DISCOVER_INFO, json!({ "of": of, "node": node })).await?
        }
        Commands::Cache => Ok(serde_json::to_value(config.load_cache()?)?),
    };

    while let Ok(event) = events.try_recv() {
        warn!(event = %event.name, payload = %event.payload, "Client error");
    }

    if let Some(cache) = &cache {
        if let Err(e) = config.save_cache(&cache.snapshot()) {
            warn!("Failed to save discovery cache: {e:#}");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = pump.await {
        warn!("XMPP session task failed: {e}");
    }

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            info!("Done");
            Ok(())
        }
        Err(error) => {
            eprintln!("{}", serde_json::to_string_pretty(&error)?);
            std::process::exit(1);
        }
    }
}

/// Send one request event through the socket adapter and wait for its reply.
async fn request(
    socket: &BuddycloudSocket,
    event: &str,
    payload: Value,
) -> Result<std::result::Result<Value, Value>> {
    let (request, reply) = SocketRequest::new(event, payload).with_reply();
    socket.handle(request).await;
    reply.await.context("Request was dropped without a reply")
}
