// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Waddle Social

//! XMPP session for the discovery CLI.
//!
//! Uses `tokio-xmpp::AsyncClient` directly so every inbound stanza can be
//! offered to the [`IqTracker`] before anything else looks at it.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use buddycloud_xmpp::IqTracker;
use futures::StreamExt;
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use tokio_xmpp::AsyncClient;
use tokio_xmpp::Event as TokioXmppEvent;
use tracing::{debug, info, warn};
use xmpp_parsers::jid::BareJid;

use crate::config::XmppConfig;

/// A connected XMPP client.
pub struct XmppSession {
    client: AsyncClient<tokio_xmpp::starttls::ServerConfig>,
    jid: BareJid,
}

impl XmppSession {
    /// Create a client with the given configuration. Nothing is sent until
    /// [`XmppSession::wait_online`] is polled.
    pub fn new(config: &XmppConfig) -> Result<Self> {
        let jid_str = config.jid.as_ref().context("XMPP JID is required")?;
        let jid = BareJid::from_str(jid_str).with_context(|| format!("Invalid JID: {jid_str}"))?;
        let password = config
            .password
            .as_ref()
            .context("XMPP password is required")?;

        info!("Creating XMPP client for {}", jid);

        // Build server connector
        let server_config = if let Some(ref host) = config.server {
            tokio_xmpp::starttls::ServerConfig::Manual {
                host: host.clone(),
                port: config.port,
            }
        } else {
            tokio_xmpp::starttls::ServerConfig::UseSrv
        };

        let client_config = tokio_xmpp::AsyncConfig {
            jid: xmpp_parsers::jid::Jid::from(jid.clone()),
            password: password.clone(),
            server: server_config,
        };

        let mut client = AsyncClient::new_with_config(client_config);
        client.set_reconnect(false);

        Ok(Self { client, jid })
    }

    /// Domain of the account, where channel discovery starts.
    pub fn domain(&self) -> String {
        self.jid.domain().to_string()
    }

    /// Drive the connection until the session is bound.
    pub async fn wait_online(&mut self) -> Result<()> {
        loop {
            match self.client.next().await {
                Some(TokioXmppEvent::Online { .. }) => {
                    info!("XMPP connected");
                    return Ok(());
                }
                Some(TokioXmppEvent::Disconnected(err)) => {
                    bail!("XMPP connection failed: {err}");
                }
                Some(TokioXmppEvent::Stanza(elem)) => {
                    debug!(stanza = %elem.name(), "Stanza before session was online");
                }
                None => bail!("XMPP stream ended before going online"),
            }
        }
    }

    /// Pump stanzas both ways until `shutdown` fires or the stream ends.
    ///
    /// Outbound stanzas come from `outbound` and are flushed before shutdown
    /// is honoured; inbound ones are offered to `tracker` first and logged if
    /// nobody claimed them.
    pub async fn run(
        mut self,
        tracker: Arc<IqTracker>,
        mut outbound: mpsc::UnboundedReceiver<Element>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(stanza) = outbound.recv() => {
                    if let Err(e) = self.client.send_stanza(stanza).await {
                        warn!("Failed to send stanza: {e}");
                    }
                }
                event = self.client.next() => match event {
                    Some(TokioXmppEvent::Stanza(elem)) => {
                        if let Some(unclaimed) = tracker.handle_incoming(elem) {
                            debug!(
                                stanza = %unclaimed.name(),
                                from = ?unclaimed.attr("from"),
                                "Ignoring unsolicited stanza"
                            );
                        }
                    }
                    Some(TokioXmppEvent::Online { .. }) => {}
                    Some(TokioXmppEvent::Disconnected(err)) => {
                        warn!("XMPP disconnected: {err}");
                        break;
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    info!("Disconnecting XMPP client");
                    let _ = self.client.send_end().await;
                    break;
                }
            }
        }
    }
}
