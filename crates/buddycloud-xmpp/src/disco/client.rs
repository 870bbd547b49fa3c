//! Disco queries over an IQ transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::info::{build_info_query, parse_info_response, Feature};
use super::items::{build_items_query, parse_items_response, DiscoItem};
use crate::transport::IqTransport;
use crate::DiscoveryError;

/// Service discovery as seen by the discovery engine.
///
/// Each call yields exactly once; an implementation is allowed to never
/// answer, the engine bounds every wait with its own timer.
#[async_trait]
pub trait Disco: Send + Sync {
    /// disco#items of `of` (optionally a node on it).
    async fn get_items(&self, of: &str, node: Option<&str>)
        -> Result<Vec<DiscoItem>, DiscoveryError>;

    /// disco#info of `of` (optionally a node on it).
    async fn get_features(&self, of: &str, node: Option<&str>)
        -> Result<Vec<Feature>, DiscoveryError>;
}

/// [`Disco`] backed by real XMPP queries.
#[derive(Clone)]
pub struct XmppDisco {
    transport: Arc<dyn IqTransport>,
}

impl XmppDisco {
    pub fn new(transport: Arc<dyn IqTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Disco for XmppDisco {
    #[instrument(skip(self), name = "disco.items")]
    async fn get_items(
        &self,
        of: &str,
        node: Option<&str>,
    ) -> Result<Vec<DiscoItem>, DiscoveryError> {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, "Sending disco#items query");
        let response = self
            .transport
            .request(build_items_query(&id, of, node))
            .await?;
        parse_items_response(&response)
    }

    #[instrument(skip(self), name = "disco.info")]
    async fn get_features(
        &self,
        of: &str,
        node: Option<&str>,
    ) -> Result<Vec<Feature>, DiscoveryError> {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, "Sending disco#info query");
        let response = self
            .transport
            .request(build_info_query(&id, of, node))
            .await?;
        parse_info_response(&response)
    }
}
