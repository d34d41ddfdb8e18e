//! Logical evidence queries and their signatures.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A request for one slice of cloud state.
///
/// Property names are dotted paths into the provider's raw record
/// (`networkAcls.defaultAction`). Two queries with the same resource type and
/// the same property set are the same query, regardless of property order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceQuery {
    /// Provider resource type, e.g. `Microsoft.Storage/storageAccounts`.
    pub resource_type: String,

    /// Properties to project out of each resource.
    #[serde(default)]
    pub properties: Vec<String>,
}

impl EvidenceQuery {
    pub fn new<I, S>(resource_type: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_type: resource_type.into(),
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    /// Sorted, deduplicated property set.
    pub fn property_set(&self) -> BTreeSet<&str> {
        self.properties.iter().map(String::as_str).collect()
    }

    /// Whether `property` is one of the projected properties.
    pub fn declares(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// Cache key for this query.
    pub fn signature(&self) -> QuerySignature {
        let props: Vec<&str> = self.property_set().into_iter().collect();
        QuerySignature(format!("{}[{}]", self.resource_type, props.join(",")))
    }
}

/// Stable identity of an [`EvidenceQuery`]: `type[p1,p2]` with sorted properties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
