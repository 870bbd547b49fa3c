//! IQ request/response correlation.
//!
//! Outgoing stanzas leave through a [`StanzaSink`]; the connection owner
//! feeds every inbound stanza to [`IqTracker::handle_incoming`], which hands
//! `result`/`error` IQs to whoever is waiting on that id. A request may never
//! be answered, so callers bound their waits with their own timers; dropping
//! a request future forgets its id and a late answer is then passed back to
//! the connection owner like any other untracked stanza.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{StanzaErrorType, NS_STANZAS};
use crate::DiscoveryError;

/// Fire-and-forget stanza output.
pub trait StanzaSink: Send + Sync {
    fn send(&self, stanza: Element) -> Result<(), DiscoveryError>;
}

impl StanzaSink for mpsc::UnboundedSender<Element> {
    fn send(&self, stanza: Element) -> Result<(), DiscoveryError> {
        mpsc::UnboundedSender::send(self, stanza).map_err(|_| DiscoveryError::TransportClosed)
    }
}

/// Sends an IQ and resolves with its correlated response.
#[async_trait]
pub trait IqTransport: Send + Sync {
    /// Send `iq` and wait for the matching `result`.
    ///
    /// An `error` response is returned as [`DiscoveryError::Stanza`].
    async fn request(&self, iq: Element) -> Result<Element, DiscoveryError>;
}

/// Tracks outstanding IQ requests by stanza id.
pub struct IqTracker {
    sink: Arc<dyn StanzaSink>,
    pending: DashMap<String, oneshot::Sender<Element>>,
}

impl IqTracker {
    pub fn new(sink: Arc<dyn StanzaSink>) -> Self {
        Self {
            sink,
            pending: DashMap::new(),
        }
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Offer an inbound stanza to waiting requests.
    ///
    /// Returns the stanza back when nobody was waiting for it.
    pub fn handle_incoming(&self, stanza: Element) -> Option<Element> {
        if stanza.name() != "iq" {
            return Some(stanza);
        }
        if !matches!(stanza.attr("type"), Some("result") | Some("error")) {
            return Some(stanza);
        }
        let Some(id) = stanza.attr("id").map(String::from) else {
            return Some(stanza);
        };

        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                trace!(id = %id, "Correlated IQ response");
                // The waiter may have given up in the meantime.
                let _ = waiter.send(stanza);
                None
            }
            None => {
                debug!(id = %id, "IQ response for untracked request");
                Some(stanza)
            }
        }
    }
}

impl StanzaSink for IqTracker {
    fn send(&self, stanza: Element) -> Result<(), DiscoveryError> {
        self.sink.send(stanza)
    }
}

#[async_trait]
impl IqTransport for IqTracker {
    async fn request(&self, mut iq: Element) -> Result<Element, DiscoveryError> {
        let id = match iq.attr("id") {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                iq.set_attr("id", id.clone());
                id
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        self.sink.send(iq)?;

        let response = rx.await.map_err(|_| DiscoveryError::TransportClosed)?;
        if response.attr("type") == Some("error") {
            return Err(parse_stanza_error(&response));
        }
        Ok(response)
    }
}

/// Forgets a pending id when its request future goes away.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Element>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Parse the `<error/>` child of an error stanza.
///
/// The `type` attribute and the defined condition are taken verbatim, so
/// conditions this crate has never heard of still reach the caller intact.
pub fn parse_stanza_error(stanza: &Element) -> DiscoveryError {
    let Some(error) = stanza.children().find(|child| child.name() == "error") else {
        return DiscoveryError::stanza(StanzaErrorType::Cancel.as_str(), "undefined-condition");
    };

    let error_type = error
        .attr("type")
        .unwrap_or(StanzaErrorType::Cancel.as_str())
        .to_string();
    let condition = error
        .children()
        .find(|child| child.ns() == NS_STANZAS && child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    let text = error.get_child("text", NS_STANZAS).map(Element::text);

    DiscoveryError::Stanza {
        error_type,
        condition,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (Arc<IqTracker>, mpsc::UnboundedReceiver<Element>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(IqTracker::new(Arc::new(tx))), rx)
    }

    fn get_iq(id: Option<&str>) -> Element {
        let mut iq = Element::builder("iq", "jabber:client")
            .attr("type", "get")
            .attr("to", "example.com");
        if let Some(id) = id {
            iq = iq.attr("id", id);
        }
        iq.build()
    }

    fn reply(id: &str, type_: &str) -> Element {
        Element::builder("iq", "jabber:client")
            .attr("type", type_)
            .attr("id", id)
            .build()
    }

    fn error_reply(id: &str) -> Element {
        Element::builder("iq", "jabber:client")
            .attr("type", "error")
            .attr("id", id)
            .append(
                Element::builder("error", "jabber:client")
                    .attr("type", "cancel")
                    .append(Element::builder("error-condition", NS_STANZAS).build())
                    .append(
                        Element::builder("text", NS_STANZAS)
                            .append("Nope".to_string())
                            .build(),
                    )
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn test_request_resolves_with_correlated_result() {
        let (tracker, mut outbound) = tracker();

        let request = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.request(get_iq(Some("q1"))).await })
        };

        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent.attr("id"), Some("q1"));
        assert_eq!(tracker.pending_count(), 1);

        assert!(tracker.handle_incoming(reply("q1", "result")).is_none());

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.attr("type"), Some("result"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_assigns_missing_id() {
        let (tracker, mut outbound) = tracker();

        let request = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.request(get_iq(None)).await })
        };

        let sent = outbound.recv().await.unwrap();
        let id = sent.attr("id").unwrap().to_string();
        assert!(!id.is_empty());

        tracker.handle_incoming(reply(&id, "result"));
        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_response_is_passed_through_verbatim() {
        let (tracker, mut outbound) = tracker();

        let request = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.request(get_iq(Some("q2"))).await })
        };
        outbound.recv().await.unwrap();
        tracker.handle_incoming(error_reply("q2"));

        assert_eq!(
            request.await.unwrap().unwrap_err(),
            DiscoveryError::Stanza {
                error_type: "cancel".into(),
                condition: "error-condition".into(),
                text: Some("Nope".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_request_forgets_its_id() {
        let (tracker, mut outbound) = tracker();

        let request = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.request(get_iq(Some("q3"))).await })
        };
        outbound.recv().await.unwrap();
        request.abort();
        let _ = request.await;

        assert_eq!(tracker.pending_count(), 0);
        assert!(tracker.handle_incoming(reply("q3", "result")).is_some());
    }

    #[tokio::test]
    async fn test_closed_sink_fails_request() {
        let (tracker, outbound) = tracker();
        drop(outbound);

        let error = tracker.request(get_iq(Some("q4"))).await.unwrap_err();

        assert_eq!(error, DiscoveryError::TransportClosed);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_non_iq_and_requests_are_handed_back() {
        let (tracker, _outbound) = tracker();

        let message = Element::builder("message", "jabber:client")
            .attr("id", "m1")
            .build();
        assert!(tracker.handle_incoming(message).is_some());
        assert!(tracker.handle_incoming(get_iq(Some("g1"))).is_some());
    }

    #[test]
    fn test_parse_stanza_error_without_error_child() {
        assert_eq!(
            parse_stanza_error(&reply("x", "error")),
            DiscoveryError::stanza("cancel", "undefined-condition")
        );
    }
}
