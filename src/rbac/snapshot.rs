//! The computed permission view for one principal, embedded verbatim in
//! access tokens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A resource identifier that is either an integer or a string.
///
/// Resource IDs are stored as strings but opportunistically coerced to
/// integers when numeric. Downstream consumers rely on both shapes, so the
/// dual typing is preserved as a compatibility constraint rather than
/// normalized away.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    /// Numeric identifier (stored string parsed as an integer)
    Int(i64),
    /// Opaque string identifier
    Str(String),
}

impl ResourceId {
    /// Coerce a stored string ID: numeric strings become integers,
    /// everything else stays a string.
    #[must_use]
    pub fn coerce(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| Self::Str(raw.to_string()), Self::Int)
    }
}

/// Full permission view for one principal, partitioned by namespace.
///
/// `global_*` entries apply to every downstream system; `system_*` maps are
/// keyed by the owning system's namespace. Lists carry no ordering
/// guarantee. All codes are local (namespace prefix stripped).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    /// Global role local codes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_roles: Vec<String>,
    /// Per-system role local codes, keyed by namespace
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub system_roles: HashMap<String, Vec<String>>,
    /// Global resource grants: resource type to IDs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub global_resources: HashMap<String, Vec<ResourceId>>,
    /// Per-system resource grants: namespace to resource type to IDs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub system_resources: HashMap<String, HashMap<String, Vec<ResourceId>>>,
}

impl PermissionSnapshot {
    /// Whether the snapshot grants nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global_roles.is_empty()
            && self.system_roles.is_empty()
            && self.global_resources.is_empty()
            && self.system_resources.is_empty()
    }
}
