//! Channel and media server discovery.
//!
//! Both lookups walk the same two phases:
//!
//! 1. disco#items on the domain lists candidate components
//! 2. disco#info on every candidate at once, each bounded by its own timer
//!
//! Only once every candidate has settled (answered, failed or timed out) are
//! the results scanned, in the order the domain listed the items. The first
//! match wins, regardless of which component answered first.
//!
//! Concurrent discoveries for the same domain are not merged; each one runs
//! its own fan-out and the last to finish writes the cache.

mod fan_in;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, instrument, warn};
use xmpp_parsers::jid::Jid;

use crate::cache::{DiscoveryCache, MediaServerInfo};
use crate::config::DiscoveryConfig;
use crate::disco::{Disco, DiscoItem, Feature};
use crate::DiscoveryError;

use fan_in::FanIn;

/// Identity category/type of a buddycloud channel server.
pub const CHANNEL_SERVER_IDENTITY: (&str, &str) = ("pubsub", "channels");

/// Identity category/type/name of a buddycloud media server.
pub const MEDIA_SERVER_IDENTITY: (&str, &str, &str) = ("component", "generic", "Media Server");

/// Data form field carrying the media server's HTTP endpoint.
pub const ENDPOINT_FIELD: &str = "endpoint";

/// Locates the channel server and media servers of XMPP domains.
pub struct DiscoveryEngine {
    disco: Arc<dyn Disco>,
    discovery_timeout_ms: AtomicU64,
    media_discovery_timeout_ms: AtomicU64,
    cache: RwLock<Option<Arc<dyn DiscoveryCache>>>,
    channel_server: RwLock<Option<String>>,
    media_servers: DashMap<String, MediaServerInfo>,
}

impl DiscoveryEngine {
    pub fn new(disco: Arc<dyn Disco>, config: &DiscoveryConfig) -> Self {
        Self {
            disco,
            discovery_timeout_ms: AtomicU64::new(config.discovery_timeout_ms),
            media_discovery_timeout_ms: AtomicU64::new(config.media_discovery_timeout_ms),
            cache: RwLock::new(None),
            channel_server: RwLock::new(None),
            media_servers: DashMap::new(),
        }
    }

    /// Per-component timeout for channel server discovery.
    pub fn set_discovery_timeout(&self, timeout: Duration) -> &Self {
        self.discovery_timeout_ms
            .store(millis(timeout), Ordering::Relaxed);
        self
    }

    /// Per-component timeout for media server discovery.
    pub fn set_media_server_discovery_timeout(&self, timeout: Duration) -> &Self {
        self.media_discovery_timeout_ms
            .store(millis(timeout), Ordering::Relaxed);
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn media_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.media_discovery_timeout_ms.load(Ordering::Relaxed))
    }

    /// Install or remove the result cache.
    pub fn set_cache(&self, cache: Option<Arc<dyn DiscoveryCache>>) -> &Self {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = cache;
        self
    }

    fn cache(&self) -> Option<Arc<dyn DiscoveryCache>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The channel server of the last successful discovery.
    pub fn channel_server(&self) -> Option<String> {
        self.channel_server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_channel_server(&self, server: &str) {
        *self
            .channel_server
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(server.to_string());
    }

    /// The media server already discovered for `of`, if any.
    pub fn media_server(&self, of: &str) -> Option<MediaServerInfo> {
        self.media_servers
            .get(of)
            .map(|entry| entry.value().clone())
            .filter(|info| !info.component.is_empty())
    }

    /// Remember a media server for `of` without asking the network.
    pub fn remember_media_server(&self, of: &str, info: MediaServerInfo) {
        self.media_servers.insert(of.to_string(), info);
    }

    /// Whether `jid` is one of the media components discovered so far.
    pub fn is_media_component(&self, jid: &str) -> bool {
        self.media_servers
            .iter()
            .any(|entry| entry.value().component == jid)
    }

    /// Find the buddycloud channel server for `domain`.
    ///
    /// An `explicit_server` is taken as-is and bypasses the cache entirely:
    /// it is neither looked up nor stored.
    #[instrument(skip(self), name = "discovery.channel_server")]
    pub async fn discover_channel_server(
        &self,
        explicit_server: Option<&str>,
        domain: &str,
    ) -> Result<String, DiscoveryError> {
        if let Some(server) = explicit_server {
            info!(server = %server, "Using explicitly configured channel server");
            self.set_channel_server(server);
            return Ok(server.to_string());
        }

        let cache = self.cache();
        if let Some(server) = cache.as_ref().and_then(|c| c.channel_server(domain)) {
            debug!(server = %server, "Channel server found in cache");
            self.set_channel_server(&server);
            return Ok(server);
        }

        let items = self.disco.get_items(domain, None).await?;
        let results = self.collect_features(items, self.discovery_timeout()).await;

        let Some(server) = select_channel_server(&results) else {
            warn!(candidates = results.len(), "No channel server found");
            return Err(DiscoveryError::no_channel_server());
        };

        info!(server = %server, "Discovered channel server");
        self.set_channel_server(server);
        if let Some(cache) = cache {
            cache.store_channel_server(domain, server);
        }
        Ok(server.to_string())
    }

    /// Find the media server for `of`.
    ///
    /// Items are listed from the domain part of `of`; results are remembered
    /// under `of` itself.
    #[instrument(skip(self), name = "discovery.media_server")]
    pub async fn discover_media_server(&self, of: &str) -> Result<MediaServerInfo, DiscoveryError> {
        if of.is_empty() {
            return Err(DiscoveryError::client("Missing 'of' key", None));
        }

        if let Some(known) = self.media_server(of) {
            debug!(component = %known.component, "Media server already known");
            return Ok(known);
        }

        let cache = self.cache();
        if let Some(cached) = cache.as_ref().and_then(|c| c.media_server(of)) {
            debug!(component = %cached.component, "Media server found in cache");
            self.media_servers.insert(of.to_string(), cached.clone());
            return Ok(cached);
        }

        let items = self.disco.get_items(&domain_of(of), None).await?;
        let results = self
            .collect_features(items, self.media_discovery_timeout())
            .await;

        let Some(found) = select_media_server(&results) else {
            warn!(candidates = results.len(), "No media server found");
            return Err(DiscoveryError::item_not_found());
        };

        info!(
            component = %found.component,
            endpoint = ?found.endpoint,
            "Discovered media server"
        );
        self.media_servers.insert(of.to_string(), found.clone());
        if let Some(cache) = cache {
            cache.store_media_server(of, &found);
        }
        Ok(found)
    }

    /// disco#info every item concurrently and wait until all have settled.
    ///
    /// A failed or timed out query counts as an empty feature list. A JID
    /// listed more than once is queried once, at its first position.
    async fn collect_features(
        &self,
        items: Vec<DiscoItem>,
        timeout: Duration,
    ) -> Vec<(String, Vec<Feature>)> {
        let mut seen = HashSet::new();
        let jids: Vec<String> = items
            .into_iter()
            .map(|item| item.jid)
            .filter(|jid| seen.insert(jid.clone()))
            .collect();

        let mut fan_in = FanIn::new(jids.iter().cloned(), timeout);
        debug!(
            jobs = fan_in.len(),
            timeout_ms = millis(timeout),
            "Querying candidates"
        );

        let disco = &self.disco;
        let mut requests: FuturesUnordered<_> = jids
            .iter()
            .enumerate()
            .map(|(index, jid)| async move { (index, disco.get_features(jid, None).await) })
            .collect();

        while !fan_in.is_complete() {
            let event = tokio::select! {
                Some((index, result)) = requests.next() => JobEvent::Answered(index, result),
                Some(index) = fan_in.next_expired() => JobEvent::Expired(index),
                else => break,
            };

            match event {
                JobEvent::Answered(index, result) => {
                    let features = result.unwrap_or_else(|error| {
                        debug!(jid = ?fan_in.jid(index), error = %error, "disco#info failed");
                        Vec::new()
                    });
                    if !fan_in.answer(index, features) {
                        debug!(jid = ?fan_in.jid(index), "Ignoring late disco#info response");
                    }
                }
                JobEvent::Expired(index) => {
                    if fan_in.expire(index) {
                        debug!(jid = ?fan_in.jid(index), "disco#info timed out");
                    }
                }
            }
        }

        fan_in.into_results()
    }
}

enum JobEvent {
    Answered(usize, Result<Vec<Feature>, DiscoveryError>),
    Expired(usize),
}

/// Whole milliseconds of `timeout`, saturating at `u64::MAX`.
fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Domain part of a JID, or the input itself when it does not parse.
fn domain_of(of: &str) -> String {
    Jid::from_str(of)
        .map(|jid| jid.domain().to_string())
        .unwrap_or_else(|_| of.to_string())
}

/// First item, in item order, advertising the channel server identity.
fn select_channel_server(results: &[(String, Vec<Feature>)]) -> Option<&str> {
    let (category, type_) = CHANNEL_SERVER_IDENTITY;
    results
        .iter()
        .find(|(_, features)| features.iter().any(|f| f.is_identity(category, type_)))
        .map(|(jid, _)| jid.as_str())
}

/// First item advertising the media server identity, plus the endpoint
/// advertised by any item. A later endpoint overrides an earlier one.
fn select_media_server(results: &[(String, Vec<Feature>)]) -> Option<MediaServerInfo> {
    let (category, type_, name) = MEDIA_SERVER_IDENTITY;
    let mut component = None;
    let mut endpoint = None;

    for (jid, features) in results {
        for feature in features {
            match feature {
                Feature::Identity { .. }
                    if component.is_none()
                        && feature.is_identity(category, type_)
                        && feature.identity_name() == Some(name) =>
                {
                    component = Some(jid.clone());
                }
                Feature::Form { form } => {
                    for field in form.fields.iter().filter(|f| f.var == ENDPOINT_FIELD) {
                        endpoint = field.value().map(String::from);
                    }
                }
                _ => {}
            }
        }
    }

    component.map(|component| MediaServerInfo {
        component,
        endpoint,
    })
}
