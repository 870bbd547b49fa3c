//! Discovered server cache.
//!
//! The cache is owned by the caller and handed to the engine; the engine
//! only reads and writes entries, it never evicts. Entries are namespaced by
//! server kind and keyed by domain:
//!
//! ```json
//! {
//!   "channel": { "example.com": "channels.example.com" },
//!   "media":   { "example.com": { "component": "media.example.com",
//!                                 "endpoint": "https://api.example.com" } }
//! }
//! ```

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A discovered media server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaServerInfo {
    /// JID of the media component.
    pub component: String,
    /// HTTP endpoint advertised through an extended info form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl MediaServerInfo {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Storage for discovery results.
pub trait DiscoveryCache: Send + Sync {
    /// Cached channel server for `domain`.
    fn channel_server(&self, domain: &str) -> Option<String>;

    fn store_channel_server(&self, domain: &str, server: &str);

    /// Cached media server for `domain`.
    fn media_server(&self, domain: &str) -> Option<MediaServerInfo>;

    fn store_media_server(&self, domain: &str, info: &MediaServerInfo);
}

/// Serializable form of a cache's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSnapshot {
    pub channel: BTreeMap<String, String>,
    pub media: BTreeMap<String, MediaServerInfo>,
}

/// In-process [`DiscoveryCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    channel: DashMap<String, String>,
    media: DashMap<String, MediaServerInfo>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from a previously taken snapshot.
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            channel: snapshot.channel.into_iter().collect(),
            media: snapshot.media.into_iter().collect(),
        }
    }

    /// Copy the current contents out, sorted by domain.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            channel: self
                .channel
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            media: self
                .media
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

impl DiscoveryCache for MemoryCache {
    fn channel_server(&self, domain: &str) -> Option<String> {
        self.channel.get(domain).map(|entry| entry.value().clone())
    }

    fn store_channel_server(&self, domain: &str, server: &str) {
        self.channel.insert(domain.to_string(), server.to_string());
    }

    fn media_server(&self, domain: &str) -> Option<MediaServerInfo> {
        self.media.get(domain).map(|entry| entry.value().clone())
    }

    fn store_media_server(&self, domain: &str, info: &MediaServerInfo) {
        self.media.insert(domain.to_string(), info.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_and_lookup() {
        let cache = MemoryCache::new();
        assert!(cache.channel_server("example.com").is_none());

        cache.store_channel_server("example.com", "channels.example.com");
        cache.store_media_server("example.com", &MediaServerInfo::new("media.example.com"));

        assert_eq!(
            cache.channel_server("example.com").as_deref(),
            Some("channels.example.com")
        );
        assert_eq!(
            cache.media_server("example.com"),
            Some(MediaServerInfo::new("media.example.com"))
        );
        assert!(cache.media_server("example.org").is_none());
    }

    #[test]
    fn test_snapshot_layout() {
        let cache = MemoryCache::new();
        cache.store_channel_server("example.com", "channels.example.com");
        cache.store_media_server(
            "example.com",
            &MediaServerInfo::new("media.example.com").with_endpoint("https://api.example.com"),
        );
        cache.store_media_server("example.org", &MediaServerInfo::new("media.example.org"));

        let value = serde_json::to_value(cache.snapshot()).unwrap();

        assert_eq!(
            value,
            json!({
                "channel": { "example.com": "channels.example.com" },
                "media": {
                    "example.com": {
                        "component": "media.example.com",
                        "endpoint": "https://api.example.com",
                    },
                    "example.org": { "component": "media.example.org" },
                },
            })
        );
    }

    #[test]
    fn test_from_snapshot_restores_entries() {
        let snapshot: CacheSnapshot = serde_json::from_value(json!({
            "channel": { "example.com": "channels.example.com" },
        }))
        .unwrap();

        let cache = MemoryCache::from_snapshot(snapshot.clone());

        assert_eq!(
            cache.channel_server("example.com").as_deref(),
            Some("channels.example.com")
        );
        assert_eq!(cache.snapshot(), snapshot);
    }
}
