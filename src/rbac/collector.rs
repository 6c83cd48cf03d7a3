//! Permission aggregation — computes the namespace-partitioned snapshot
//! embedded in every user access token.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::namespace;
use super::snapshot::{PermissionSnapshot, ResourceId};
use crate::Result;
use crate::repo::Repository;

/// Walks a principal's role assignments and resource bindings and partitions
/// them into the global and per-system halves of a [`PermissionSnapshot`].
pub struct PermissionCollector {
    repo: Arc<dyn Repository>,
}

impl PermissionCollector {
    /// Create a collector over the given repository.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Compute the full permission view for one principal.
    ///
    /// An unknown principal yields an all-empty snapshot rather than an
    /// error: the collector is also the defensive default when identity data
    /// is momentarily inconsistent, and "no permissions" is the safe answer.
    /// Expired resource bindings are void at read time. Emitted lists carry
    /// no ordering guarantee.
    pub async fn collect(&self, principal_id: &str) -> Result<PermissionSnapshot> {
        if self.repo.principal(principal_id).await?.is_none() {
            debug!(principal = %principal_id, "unknown principal, empty snapshot");
            return Ok(PermissionSnapshot::default());
        }

        let mut snapshot = PermissionSnapshot::default();

        for role in self.repo.roles_for_principal(principal_id).await? {
            let local = role.local_code();
            if role.namespace == namespace::GLOBAL {
                snapshot.global_roles.push(local);
            } else {
                snapshot
                    .system_roles
                    .entry(role.namespace)
                    .or_default()
                    .push(local);
            }
        }

        let now = Utc::now();
        for binding in self.repo.bindings_for_principal(principal_id).await? {
            if binding.expires_at.is_some_and(|at| at <= now) {
                continue;
            }
            let id = ResourceId::coerce(&binding.resource_id);
            if binding.namespace == namespace::GLOBAL {
                snapshot
                    .global_resources
                    .entry(binding.resource_type)
                    .or_default()
                    .push(id);
            } else {
                snapshot
                    .system_resources
                    .entry(binding.namespace)
                    .or_default()
                    .entry(binding.resource_type)
                    .or_default()
                    .push(id);
            }
        }

        Ok(snapshot)
    }
}
