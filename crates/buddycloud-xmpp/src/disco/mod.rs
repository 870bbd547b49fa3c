//! Service Discovery (XEP-0030) client.
//!
//! Issues disco#items and disco#info queries against remote entities and
//! parses their results. Discovery of the channel and media servers is built
//! on top of the [`Disco`] trait so the engine can be driven without a live
//! connection.
//!
//! ## Queries
//!
//! - **disco#items**: lists the components a domain advertises
//! - **disco#info**: lists identities, features and extended info forms

pub mod client;
pub mod info;
pub mod items;

use minidom::Element;

pub use client::{Disco, XmppDisco};
pub use info::{
    build_info_query, parse_info_response, DataForm, Feature, FormField, DATA_FORMS_NS,
    DISCO_INFO_NS,
};
pub use items::{build_items_query, parse_items_response, DiscoItem, DISCO_ITEMS_NS};

use crate::transport::parse_stanza_error;
use crate::DiscoveryError;

// Build IQ get stanza manually since Element doesn't impl IqGetPayload
fn build_query_iq(id: &str, to: &str, ns: &str, node: Option<&str>) -> Element {
    let mut query = Element::builder("query", ns);
    if let Some(node) = node {
        query = query.attr("node", node);
    }

    Element::builder("iq", "jabber:client")
        .attr("type", "get")
        .attr("id", id)
        .attr("to", to)
        .append(query.build())
        .build()
}

/// The `<query/>` child of a result IQ, or the IQ's stanza error.
fn result_query<'a>(iq: &'a Element, ns: &str) -> Result<Option<&'a Element>, DiscoveryError> {
    match iq.attr("type") {
        Some("result") => Ok(iq.get_child("query", ns)),
        Some("error") => Err(parse_stanza_error(iq)),
        other => Err(DiscoveryError::malformed(format!(
            "expected IQ result, got type {:?}",
            other
        ))),
    }
}
