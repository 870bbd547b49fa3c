//! # buddycloud-xmpp
//!
//! Buddycloud channel protocol support for XMPP clients.
//!
//! Before any channel operation a client has to know which component of its
//! domain runs the buddycloud channel server, and optionally which one runs
//! the media server. This crate finds them with XEP-0030 service discovery.
//!
//! ## Architecture
//!
//! - **Transport**: [`IqTracker`] correlates IQ requests with their responses
//!   over any [`StanzaSink`]
//! - **Disco**: [`XmppDisco`] issues disco#items/disco#info queries and
//!   parses identities, features and data forms
//! - **Discovery**: [`DiscoveryEngine`] fans disco#info out over a domain's
//!   items with a timer per item and picks the winner in item order
//! - **Cache**: [`DiscoveryCache`] remembers results across sessions
//! - **Socket**: [`BuddycloudSocket`] maps `xmpp.buddycloud.*` events onto
//!   the engine
//!
//! ## XEP Support
//!
//! - XEP-0004 (Data Forms), for the media server endpoint
//! - XEP-0030 (Service Discovery)

pub mod cache;
pub mod config;
pub mod disco;
pub mod discovery;
pub mod socket;
pub mod transport;

mod error;

pub use cache::{CacheSnapshot, DiscoveryCache, MediaServerInfo, MemoryCache};
pub use config::DiscoveryConfig;
pub use disco::{Disco, DiscoItem, Feature, XmppDisco};
pub use discovery::DiscoveryEngine;
pub use error::{
    DiscoveryError, StanzaErrorCondition, StanzaErrorType, NO_CHANNEL_SERVER, NS_STANZAS,
};
pub use socket::{BuddycloudSocket, SocketEvent, SocketRequest};
pub use transport::{IqTracker, IqTransport, StanzaSink};
