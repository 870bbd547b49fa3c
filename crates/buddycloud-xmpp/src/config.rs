//! Discovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-component disco#info timeout for channel discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 8_000;

/// Default per-component disco#info timeout for media server discovery.
pub const DEFAULT_MEDIA_DISCOVERY_TIMEOUT_MS: u64 = 10_000;

/// Timeouts applied to each component queried during discovery.
///
/// A timeout of zero fires immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Channel server discovery, milliseconds per component.
    pub discovery_timeout_ms: u64,
    /// Media server discovery, milliseconds per component.
    pub media_discovery_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            media_discovery_timeout_ms: DEFAULT_MEDIA_DISCOVERY_TIMEOUT_MS,
        }
    }
}

impl DiscoveryConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn media_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.media_discovery_timeout_ms)
    }
}
