//! Versioned config distribution — assembles the namespace-scoped payload a
//! downstream system pulls to configure its local authorization middleware.
//!
//! Each system receives only its own namespace slice; global policy rides
//! inside user tokens, not the config payload. Every code in the payload is
//! local (prefix stripped) so the consumer never needs to know the
//! namespace convention. The version string is advisory: it changes on
//! every build, so consumers diff content, not versions, for true change
//! detection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rbac::namespace;
use crate::repo::{DownstreamSystem, Repository, Role, RoutePattern};
use crate::{Error, Result};

/// A role as shipped to a downstream system, keyed by its local code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRole {
    /// Surrogate ID
    pub id: i64,
    /// Display name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Local codes of the role's effective permissions
    pub permissions: Vec<String>,
}

/// A permission as shipped to a downstream system, keyed by its local code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPermission {
    /// Surrogate ID
    pub id: i64,
    /// Display name
    pub name: String,
    /// Resource type this permission governs
    pub resource_type: String,
    /// Action granted
    pub action: String,
}

/// A route rule as shipped to a downstream system. `role` is the local code
/// the rule grants access to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRoute {
    /// Local code of the granting role
    pub role: String,
    /// Regex path pattern
    pub pattern: String,
    /// HTTP method, `*` for any
    pub method: String,
    /// Match priority (higher wins)
    pub priority: i32,
}

/// The full config payload for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Advisory version, `v{namespace}_{unix_seconds}` at build time
    pub version: String,
    /// Build timestamp
    pub updated_at: DateTime<Utc>,
    /// The namespace this payload was built for
    pub namespace: String,
    /// Namespace roles by local code
    pub roles: HashMap<String, ConfigRole>,
    /// Namespace permissions by local code
    pub permissions: HashMap<String, ConfigPermission>,
    /// Namespace route rules, priority-sorted
    pub route_patterns: Vec<ConfigRoute>,
}

/// Builds config payloads from the RBAC repository.
pub struct ConfigSyncService {
    repo: Arc<dyn Repository>,
}

impl ConfigSyncService {
    /// Create a sync service over the given repository.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Build the payload for a registered system's namespace.
    pub async fn build_config(&self, system: &DownstreamSystem) -> Result<ConfigPayload> {
        self.build_for_namespace(&system.code).await
    }

    /// Build the payload for a namespace.
    pub async fn build_for_namespace(&self, ns: &str) -> Result<ConfigPayload> {
        if ns == namespace::GLOBAL {
            return Err(Error::Invalid(
                "config payloads are built per system, not for the global namespace".to_string(),
            ));
        }

        let mut roles = HashMap::new();
        for role in self.repo.roles_in_namespace(ns).await? {
            roles.insert(role.local_code(), self.resolve_role(&role).await?);
        }

        let mut permissions = HashMap::new();
        for p in self.repo.permissions_in_namespace(ns).await? {
            permissions.insert(
                p.local_code(),
                ConfigPermission {
                    id: p.id,
                    name: p.name.clone(),
                    resource_type: p.resource_type,
                    action: p.action,
                },
            );
        }

        let mut route_patterns = Vec::new();
        for route in self.repo.route_patterns_in_namespace(ns).await? {
            route_patterns.push(self.resolve_route(&route).await?);
        }
        // stable order for the consumer's first-match semantics
        route_patterns.sort_by(|a, b| b.priority.cmp(&a.priority));

        let now = Utc::now();
        let payload = ConfigPayload {
            version: format!("v{ns}_{}", now.timestamp()),
            updated_at: now,
            namespace: ns.to_string(),
            roles,
            permissions,
            route_patterns,
        };
        debug!(
            namespace = %ns,
            version = %payload.version,
            roles = payload.roles.len(),
            routes = payload.route_patterns.len(),
            "config payload built"
        );
        Ok(payload)
    }

    async fn resolve_role(&self, role: &Role) -> Result<ConfigRole> {
        let permissions = self
            .repo
            .permissions_for_role(role.id)
            .await?
            .iter()
            .map(crate::repo::Permission::local_code)
            .collect();
        Ok(ConfigRole {
            id: role.id,
            name: role.name.clone(),
            description: role.description.clone(),
            permissions,
        })
    }

    async fn resolve_route(&self, route: &RoutePattern) -> Result<ConfigRoute> {
        let role = self
            .repo
            .role(route.role_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("route {} references missing role", route.id)))?;
        Ok(ConfigRoute {
            role: role.local_code(),
            pattern: route.pattern.clone(),
            method: route.method.clone(),
            priority: route.priority,
        })
    }
}
