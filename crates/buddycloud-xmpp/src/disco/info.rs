//! Service Discovery: disco#info requests.
//!
//! Builds XEP-0030 disco#info queries and turns the result into a flat list
//! of [`Feature`]s: identities, plain feature vars and XEP-0004 data forms
//! (XEP-0128 extended info).

use minidom::Element;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_query_iq, result_query};
use crate::DiscoveryError;

/// Service Discovery info namespace (XEP-0030).
pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

/// Data forms namespace (XEP-0004).
pub const DATA_FORMS_NS: &str = "jabber:x:data";

/// One entry of a disco#info result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Feature {
    /// `<identity category=… type=… name=…/>`
    Identity {
        category: String,
        #[serde(rename = "type")]
        type_: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// `<feature var=…/>`
    Feature { var: String },
    /// Extended info data form.
    Form { form: DataForm },
}

impl Feature {
    /// Create an identity entry.
    pub fn identity(category: &str, type_: &str, name: Option<&str>) -> Self {
        Self::Identity {
            category: category.to_string(),
            type_: type_.to_string(),
            name: name.map(String::from),
        }
    }

    /// Whether this is an identity with the given category and type.
    pub fn is_identity(&self, category: &str, type_: &str) -> bool {
        matches!(
            self,
            Self::Identity { category: c, type_: t, .. } if c == category && t == type_
        )
    }

    /// Identity name, if this is an identity that carries one.
    pub fn identity_name(&self) -> Option<&str> {
        match self {
            Self::Identity { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

/// A data form attached to a disco#info result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataForm {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub fields: Vec<FormField>,
}

impl DataForm {
    /// First value of the field named `var`.
    pub fn value_of(&self, var: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.var == var)
            .and_then(FormField::value)
    }
}

/// A single data form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub var: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

impl FormField {
    /// Create a single-valued field.
    pub fn new(var: &str, value: &str) -> Self {
        Self {
            var: var.to_string(),
            type_: None,
            values: vec![value.to_string()],
        }
    }

    /// The first value, which is all single-valued fields carry.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Build a disco#info IQ get addressed to `to`.
pub fn build_info_query(id: &str, to: &str, node: Option<&str>) -> Element {
    build_query_iq(id, to, DISCO_INFO_NS, node)
}

/// Parse a disco#info result IQ into features, in document order.
pub fn parse_info_response(iq: &Element) -> Result<Vec<Feature>, DiscoveryError> {
    let Some(query) = result_query(iq, DISCO_INFO_NS)? else {
        return Ok(Vec::new());
    };

    let mut features = Vec::new();
    for child in query.children() {
        if child.is("identity", DISCO_INFO_NS) {
            let (Some(category), Some(type_)) = (child.attr("category"), child.attr("type"))
            else {
                continue;
            };
            features.push(Feature::identity(category, type_, child.attr("name")));
        } else if child.is("feature", DISCO_INFO_NS) {
            if let Some(var) = child.attr("var") {
                features.push(Feature::Feature {
                    var: var.to_string(),
                });
            }
        } else if child.is("x", DATA_FORMS_NS) {
            features.push(Feature::Form {
                form: parse_data_form(child),
            });
        }
    }

    debug!(count = features.len(), "Parsed disco#info result");

    Ok(features)
}

fn parse_data_form(x: &Element) -> DataForm {
    let fields = x
        .children()
        .filter(|child| child.is("field", DATA_FORMS_NS))
        .filter_map(|field| {
            let var = field.attr("var")?;
            Some(FormField {
                var: var.to_string(),
                type_: field.attr("type").map(String::from),
                values: field
                    .children()
                    .filter(|v| v.is("value", DATA_FORMS_NS))
                    .map(Element::text)
                    .collect(),
            })
        })
        .collect();

    DataForm {
        type_: x.attr("type").map(String::from),
        fields,
    }
}
