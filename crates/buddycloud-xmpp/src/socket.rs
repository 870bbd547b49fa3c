//! Socket event adapter.
//!
//! Translates the `xmpp.buddycloud.*` request events a socket client emits
//! into discovery calls and stanzas, and pushes asynchronous events (client
//! errors) back through an outbound channel.
//!
//! | event | payload | reply |
//! |---|---|---|
//! | `xmpp.buddycloud.discover` | `{server?}` | channel server JID |
//! | `xmpp.buddycloud.discover.media-server` | `{of}` | `{component, endpoint?}` |
//! | `xmpp.buddycloud.discover.items` | `{of, node?}` | disco#items list |
//! | `xmpp.buddycloud.discover.info` | `{of, node?}` | disco#info features |
//! | `xmpp.buddycloud.presence` | none | none |

use std::str::FromStr;
use std::sync::Arc;

use minidom::Element;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};
use xmpp_parsers::jid::Jid;
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};

use crate::disco::Disco;
use crate::discovery::DiscoveryEngine;
use crate::transport::StanzaSink;
use crate::DiscoveryError;

pub const DISCOVER: &str = "xmpp.buddycloud.discover";
pub const DISCOVER_MEDIA_SERVER: &str = "xmpp.buddycloud.discover.media-server";
pub const DISCOVER_ITEMS: &str = "xmpp.buddycloud.discover.items";
pub const DISCOVER_INFO: &str = "xmpp.buddycloud.discover.info";
pub const PRESENCE: &str = "xmpp.buddycloud.presence";

/// Outbound event carrying a client error that had no reply to go to.
pub const CLIENT_ERROR: &str = "xmpp.error.client";

/// Presence priority announced to the channel server.
/// XEP-0070 HTTP request verification.
pub const NS_HTTP_AUTH: &str = "http://jabber.org/protocol/http-auth";

const CHANNEL_PRESENCE_PRIORITY: i8 = -1;
const CHANNEL_PRESENCE_STATUS: &str = "buddycloud";

/// Reply half of a request: `Ok(data)` or `Err(error payload)`.
pub type Reply = oneshot::Sender<Result<Value, Value>>;

/// A request event from the socket client.
#[derive(Debug)]
pub struct SocketRequest {
    pub name: String,
    pub payload: Value,
    pub reply: Option<Reply>,
}

impl SocketRequest {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            reply: None,
        }
    }

    /// Attach a reply channel and return its receiving end.
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<Result<Value, Value>>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }
}

/// An event pushed to the socket client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketEvent {
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscoverPayload {
    server: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OfPayload {
    of: Option<String>,
    node: Option<String>,
}

/// Binds the socket event API to one XMPP session.
pub struct BuddycloudSocket {
    engine: Arc<DiscoveryEngine>,
    disco: Arc<dyn Disco>,
    sink: Arc<dyn StanzaSink>,
    domain: String,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl BuddycloudSocket {
    /// `domain` is the local user's domain, where channel discovery starts.
    pub fn new(
        engine: Arc<DiscoveryEngine>,
        disco: Arc<dyn Disco>,
        sink: Arc<dyn StanzaSink>,
        domain: impl Into<String>,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        Self {
            engine,
            disco,
            sink,
            domain: domain.into(),
            events,
        }
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    /// Whether this event is one the adapter answers.
    pub fn handles_event(name: &str) -> bool {
        matches!(
            name,
            DISCOVER | DISCOVER_MEDIA_SERVER | DISCOVER_ITEMS | DISCOVER_INFO | PRESENCE
        )
    }

    /// Whether an inbound stanza belongs to the buddycloud session: messages
    /// from the channel server, or HTTP verification requests (`confirm`)
    /// from a known media component.
    pub fn handles(&self, stanza: &Element) -> bool {
        let Some(from) = stanza.attr("from") else {
            return false;
        };
        if stanza.name() == "message" && self.engine.channel_server().as_deref() == Some(from) {
            return true;
        }
        stanza.get_child("confirm", NS_HTTP_AUTH).is_some()
            && self.engine.is_media_component(from)
    }

    /// Dispatch one request event. Returns `false` for events this adapter
    /// does not know.
    #[instrument(skip(self, request), fields(event = %request.name))]
    pub async fn handle(&self, request: SocketRequest) -> bool {
        let SocketRequest {
            name,
            payload,
            reply,
        } = request;

        if name == PRESENCE {
            self.send_presence(&payload);
            return true;
        }
        if !Self::handles_event(&name) {
            debug!("Ignoring unknown event");
            return false;
        }

        let Some(reply) = reply else {
            self.emit_client_error(DiscoveryError::client(
                "Missing callback",
                Some(&empty_if_null(&payload)),
            ));
            return true;
        };

        let result = match name.as_str() {
            DISCOVER => self.discover(&payload).await,
            DISCOVER_MEDIA_SERVER => self.discover_media_server(&payload).await,
            DISCOVER_ITEMS => self.discover_items(&payload).await,
            _ => self.discover_info(&payload).await,
        };

        if let Err(error) = &result {
            debug!(error = %error, "Request failed");
        }
        // The requester may have stopped listening.
        let _ = reply.send(result.map_err(|error| error.to_payload()));
        true
    }

    async fn discover(&self, payload: &Value) -> Result<Value, DiscoveryError> {
        let request: DiscoverPayload = parse_payload(payload)?;
        let server = self
            .engine
            .discover_channel_server(request.server.as_deref(), &self.domain)
            .await?;
        Ok(Value::String(server))
    }

    async fn discover_media_server(&self, payload: &Value) -> Result<Value, DiscoveryError> {
        let request: OfPayload = parse_payload(payload)?;
        let of = required_of(&request, payload)?;
        let info = self.engine.discover_media_server(of).await?;
        to_value(&info)
    }

    async fn discover_items(&self, payload: &Value) -> Result<Value, DiscoveryError> {
        let request: OfPayload = parse_payload(payload)?;
        let of = required_of(&request, payload)?;
        let items = self.disco.get_items(of, request.node.as_deref()).await?;
        to_value(&items)
    }

    async fn discover_info(&self, payload: &Value) -> Result<Value, DiscoveryError> {
        let request: OfPayload = parse_payload(payload)?;
        let of = required_of(&request, payload)?;
        let features = self.disco.get_features(of, request.node.as_deref()).await?;
        to_value(&features)
    }

    /// Announce ourselves to the discovered channel server.
    fn send_presence(&self, payload: &Value) {
        let Some(server) = self.engine.channel_server() else {
            self.emit_client_error(DiscoveryError::client(
                "You must perform discovery first!",
                Some(&empty_if_null(payload)),
            ));
            return;
        };
        let to = match Jid::from_str(&server) {
            Ok(jid) => jid,
            Err(e) => {
                warn!(server = %server, error = %e, "Channel server is not a valid JID");
                self.emit_client_error(DiscoveryError::client(
                    "Invalid channel server",
                    Some(&json!({ "to": server })),
                ));
                return;
            }
        };

        let mut presence = Presence::new(PresenceType::None);
        presence.to = Some(to);
        presence.priority = CHANNEL_PRESENCE_PRIORITY;
        presence.show = Some(Show::Chat);
        presence
            .statuses
            .insert(String::new(), CHANNEL_PRESENCE_STATUS.to_string());

        if let Err(e) = self.sink.send(presence.into()) {
            warn!(error = %e, "Failed to send channel server presence");
        }
    }

    fn emit_client_error(&self, error: DiscoveryError) {
        let event = SocketEvent {
            name: CLIENT_ERROR.to_string(),
            payload: error.to_payload(),
        };
        if self.events.send(event).is_err() {
            debug!("Socket event channel closed, dropping client error");
        }
    }
}

fn empty_if_null(payload: &Value) -> Value {
    if payload.is_null() {
        json!({})
    } else {
        payload.clone()
    }
}

fn parse_payload<T>(payload: &Value) -> Result<T, DiscoveryError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone())
        .map_err(|e| DiscoveryError::client(format!("Invalid payload: {e}"), Some(payload)))
}

fn required_of<'a>(request: &'a OfPayload, payload: &Value) -> Result<&'a str, DiscoveryError> {
    request
        .of
        .as_deref()
        .filter(|of| !of.is_empty())
        .ok_or_else(|| DiscoveryError::client("Missing 'of' key", Some(&empty_if_null(payload))))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, DiscoveryError> {
    serde_json::to_value(value).map_err(|e| DiscoveryError::malformed(e.to_string()))
}
