//! Error types for buddycloud discovery.
//!
//! Three families of failures reach a caller, and each keeps the wire shape
//! the socket API has always used:
//!
//! - **Client errors** are raised locally before any stanza leaves.
//! - **Stanza errors** come back from the XMPP network and are passed
//!   through verbatim (`type` + `condition`).
//! - **Not-found** outcomes: channel discovery reports a bare string, media
//!   discovery reports a `cancel`/`item-not-found` stanza error.

use serde_json::{json, Value};
use thiserror::Error;

/// Stanza error namespace (RFC 6120 Section 8.3).
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Failure text returned when no channel server answers with the
/// `pubsub/channels` identity.
pub const NO_CHANNEL_SERVER: &str = "No buddycloud server found";

/// Discovery errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiscoveryError {
    /// Request rejected locally; nothing was sent.
    #[error("Client error: {description}")]
    Client {
        /// Human readable reason, e.g. `Missing 'of' key`.
        description: String,
        /// The payload that was rejected.
        request: Value,
    },

    /// Stanza error (for IQ error responses)
    #[error("Stanza error: {error_type} {condition}")]
    Stanza {
        /// Error type attribute (`cancel`, `modify`, `auth`, `wait`)
        error_type: String,
        /// Defined condition element name
        condition: String,
        /// Optional text description
        text: Option<String>,
    },

    /// Domain-specific "nothing matched" outcome reported as a bare string.
    #[error("{0}")]
    NotFound(String),

    /// The outbound stanza channel is gone.
    #[error("Transport closed")]
    TransportClosed,

    /// A response arrived but could not be understood.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl DiscoveryError {
    /// Create a new client error for the given request payload.
    pub fn client(description: impl Into<String>, request: Option<&Value>) -> Self {
        Self::Client {
            description: description.into(),
            request: request.cloned().unwrap_or_else(|| json!({})),
        }
    }

    /// Create a stanza error from raw attribute values.
    pub fn stanza(error_type: impl Into<String>, condition: impl Into<String>) -> Self {
        Self::Stanza {
            error_type: error_type.into(),
            condition: condition.into(),
            text: None,
        }
    }

    /// Create a stanza error for 'item-not-found'.
    pub fn item_not_found() -> Self {
        Self::stanza(
            StanzaErrorType::Cancel.as_str(),
            StanzaErrorCondition::ItemNotFound.as_str(),
        )
    }

    /// The channel discovery failure.
    pub fn no_channel_server() -> Self {
        Self::NotFound(NO_CHANNEL_SERVER.to_string())
    }

    /// Create a new malformed response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Render the error the way socket callers receive it.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Client {
                description,
                request,
            } => json!({
                "type": StanzaErrorType::Modify.as_str(),
                "condition": "client-error",
                "description": description,
                "request": request,
            }),
            Self::Stanza {
                error_type,
                condition,
                text,
            } => {
                let mut payload = json!({ "type": error_type, "condition": condition });
                if let Some(text) = text {
                    payload["description"] = Value::String(text.clone());
                }
                payload
            }
            Self::NotFound(message) => Value::String(message.clone()),
            Self::TransportClosed => json!({
                "type": StanzaErrorType::Cancel.as_str(),
                "condition": StanzaErrorCondition::ServiceUnavailable.as_str(),
            }),
            Self::MalformedResponse(msg) => json!({
                "type": StanzaErrorType::Modify.as_str(),
                "condition": StanzaErrorCondition::BadRequest.as_str(),
                "description": msg,
            }),
        }
    }
}

/// Stanza error conditions this crate produces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    ItemNotFound,
    ServiceUnavailable,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::ItemNotFound => "item-not-found",
            Self::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_not_found_is_a_bare_string() {
        let payload = DiscoveryError::no_channel_server().to_payload();
        assert_eq!(payload, Value::String("No buddycloud server found".into()));
    }

    #[test]
    fn test_media_not_found_is_structured() {
        let payload = DiscoveryError::item_not_found().to_payload();
        assert_eq!(payload, json!({ "type": "cancel", "condition": "item-not-found" }));
    }

    #[test]
    fn test_client_error_payload() {
        let error = DiscoveryError::client("Missing callback", None);
        assert_eq!(
            error.to_payload(),
            json!({
                "type": "modify",
                "condition": "client-error",
                "description": "Missing callback",
                "request": {},
            })
        );
    }

    #[test]
    fn test_stanza_error_passes_unknown_conditions_through() {
        let error = DiscoveryError::stanza("cancel", "error-condition");
        assert_eq!(
            error.to_payload(),
            json!({ "type": "cancel", "condition": "error-condition" })
        );
        assert_eq!(error.to_string(), "Stanza error: cancel error-condition");
    }
}
