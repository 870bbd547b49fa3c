//! Service Discovery: disco#items requests.
//!
//! Builds XEP-0030 disco#items queries and parses the item list out of the
//! result IQ.

use minidom::Element;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_query_iq, result_query};
use crate::DiscoveryError;

/// Service Discovery items namespace (XEP-0030).
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// A component advertised by a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoItem {
    /// JID of the item
    pub jid: String,
    /// Optional name (human-readable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional node identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl DiscoItem {
    /// Create an item with only a JID.
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            name: None,
            node: None,
        }
    }
}

/// Build a disco#items IQ get addressed to `to`.
pub fn build_items_query(id: &str, to: &str, node: Option<&str>) -> Element {
    build_query_iq(id, to, DISCO_ITEMS_NS, node)
}

/// Parse the items out of a disco#items result IQ.
///
/// `<item/>` children without a `jid` attribute are skipped.
pub fn parse_items_response(iq: &Element) -> Result<Vec<DiscoItem>, DiscoveryError> {
    let Some(query) = result_query(iq, DISCO_ITEMS_NS)? else {
        return Ok(Vec::new());
    };

    let items: Vec<DiscoItem> = query
        .children()
        .filter(|child| child.is("item", DISCO_ITEMS_NS))
        .filter_map(|item| {
            let jid = item.attr("jid")?;
            Some(DiscoItem {
                jid: jid.to_string(),
                name: item.attr("name").map(String::from),
                node: item.attr("node").map(String::from),
            })
        })
        .collect();

    debug!(count = items.len(), "Parsed disco#items result");

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items_result(items: &[(&str, Option<&str>)]) -> Element {
        let mut query = Element::builder("query", DISCO_ITEMS_NS);
        for (jid, name) in items {
            let mut item = Element::builder("item", DISCO_ITEMS_NS).attr("jid", *jid);
            if let Some(name) = name {
                item = item.attr("name", *name);
            }
            query = query.append(item.build());
        }
        Element::builder("iq", "jabber:client")
            .attr("type", "result")
            .attr("id", "items-1")
            .attr("from", "example.com")
            .append(query.build())
            .build()
    }

    #[test]
    fn test_build_items_query() {
        let iq = build_items_query("items-1", "example.com", None);

        assert_eq!(iq.name(), "iq");
        assert_eq!(iq.attr("type"), Some("get"));
        assert_eq!(iq.attr("to"), Some("example.com"));
        assert_eq!(iq.attr("id"), Some("items-1"));
        let query = iq.get_child("query", DISCO_ITEMS_NS).unwrap();
        assert!(query.attr("node").is_none());
    }

    #[test]
    fn test_build_items_query_with_node() {
        let iq = build_items_query("items-2", "channels.example.com", Some("/user/a@b/posts"));
        let query = iq.get_child("query", DISCO_ITEMS_NS).unwrap();
        assert_eq!(query.attr("node"), Some("/user/a@b/posts"));
    }

    #[test]
    fn test_parse_items_keeps_document_order() {
        let iq = items_result(&[
            ("muc.example.com", None),
            ("channels.example.com", Some("Channels")),
            ("media.example.com", None),
        ]);

        let items = parse_items_response(&iq).unwrap();

        let jids: Vec<&str> = items.iter().map(|i| i.jid.as_str()).collect();
        assert_eq!(
            jids,
            ["muc.example.com", "channels.example.com", "media.example.com"]
        );
        assert_eq!(items[1].name.as_deref(), Some("Channels"));
    }

    #[test]
    fn test_parse_items_without_query_is_empty() {
        let iq = Element::builder("iq", "jabber:client")
            .attr("type", "result")
            .attr("id", "items-3")
            .build();

        assert!(parse_items_response(&iq).unwrap().is_empty());
    }

    #[test]
    fn test_parse_items_error_iq_is_stanza_error() {
        let iq = Element::builder("iq", "jabber:client")
            .attr("type", "error")
            .attr("id", "items-4")
            .append(
                Element::builder("error", "jabber:client")
                    .attr("type", "cancel")
                    .append(
                        Element::builder("item-not-found", crate::error::NS_STANZAS).build(),
                    )
                    .build(),
            )
            .build();

        assert_eq!(
            parse_items_response(&iq).unwrap_err(),
            DiscoveryError::stanza("cancel", "item-not-found")
        );
    }
}
