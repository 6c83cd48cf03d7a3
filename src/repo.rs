//! Persistence boundary — the RBAC data model behind an abstract repository.
//!
//! The broker reads and writes these records through [`Repository`];
//! referential integrity belongs to the implementation, not to the callers.
//! [`MemoryRepository`] backs tests and single-node runs; a relational
//! implementation is a drop-in behind the same trait.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::rbac::namespace;

/// Principal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    /// Can log in and receive tokens
    Active,
    /// Deactivated; never hard-deleted
    Inactive,
}

/// A user, keyed by the identity-provider-issued external ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// External ID from the identity provider (primary key for RBAC joins)
    pub id: String,
    /// Display name
    pub username: String,
    /// Contact email
    pub email: String,
    /// Avatar URL
    pub avatar: String,
    /// Contact phone
    pub mobile: String,
    /// Organizational-unit IDs
    pub dept_ids: Vec<String>,
    /// Organizational-unit display names
    pub dept_names: Vec<String>,
    /// Lifecycle status
    pub status: PrincipalStatus,
    /// Last successful SSO login
    pub last_login: DateTime<Utc>,
}

/// Identity fields delivered by the SSO provider on each login.
#[derive(Debug, Clone, Default)]
pub struct PrincipalProfile {
    /// Stable external ID
    pub external_id: String,
    /// Display name
    pub username: String,
    /// Contact email
    pub email: String,
    /// Avatar URL
    pub avatar: String,
    /// Contact phone
    pub mobile: String,
}

/// A role, scoped to exactly one namespace. `code` is always
/// `{namespace}:{localcode}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Surrogate ID
    pub id: i64,
    /// Fully qualified unique code
    pub code: String,
    /// Display name
    pub name: String,
    /// Owning namespace (`global` or a system code)
    pub namespace: String,
    /// Optional owning downstream system
    pub system_id: Option<i64>,
    /// Free-text description
    pub description: String,
}

/// A permission carrying a `(resource_type, action)` pair. Same code
/// convention as [`Role`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Surrogate ID
    pub id: i64,
    /// Fully qualified unique code
    pub code: String,
    /// Display name
    pub name: String,
    /// Owning namespace
    pub namespace: String,
    /// Optional owning downstream system
    pub system_id: Option<i64>,
    /// Resource type this permission governs
    pub resource_type: String,
    /// Action granted on the resource type
    pub action: String,
    /// Free-text description
    pub description: String,
}

/// Principal-scoped grant of `action` on a concrete resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBinding {
    /// Surrogate ID
    pub id: i64,
    /// Grantee principal (external ID)
    pub principal_id: String,
    /// Owning namespace
    pub namespace: String,
    /// Resource type
    pub resource_type: String,
    /// Concrete resource ID, stored as a string
    pub resource_id: String,
    /// Granted action
    pub action: String,
    /// Optional expiry; consumers treat an expired binding as void at read
    /// time (nothing purges it)
    pub expires_at: Option<DateTime<Utc>>,
    /// Granting actor
    pub created_by: Option<String>,
}

/// Namespace-scoped route rule mapping a role to an HTTP method + regex
/// path. Matching happens in the downstream system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePattern {
    /// Surrogate ID
    pub id: i64,
    /// Owning namespace
    pub namespace: String,
    /// Role granted access to matching routes
    pub role_id: i64,
    /// Regex path pattern
    pub pattern: String,
    /// HTTP method, `*` for any
    pub method: String,
    /// Match priority (higher wins downstream)
    pub priority: i32,
    /// Free-text description
    pub description: String,
}

/// A registered downstream system. Its `code` doubles as its namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamSystem {
    /// Surrogate ID
    pub id: i64,
    /// Unique code / namespace
    pub code: String,
    /// Display name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Base URL of the system's API
    pub api_endpoint: String,
    /// Long-lived signed system credential for config pulls
    pub credential: String,
    /// Lifecycle status (`active` / `inactive`)
    pub status: String,
}

/// Abstract persistence interface for the RBAC data model.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Idempotent upsert keyed by external ID: update display fields, bump
    /// `last_login`, reactivate. Runs on every successful SSO login.
    async fn upsert_principal(&self, profile: PrincipalProfile) -> Result<Principal>;

    /// Look up a principal by external ID.
    async fn principal(&self, id: &str) -> Result<Option<Principal>>;

    /// All roles assigned to a principal.
    async fn roles_for_principal(&self, principal_id: &str) -> Result<Vec<Role>>;

    /// All resource bindings for a principal, including expired ones.
    async fn bindings_for_principal(&self, principal_id: &str) -> Result<Vec<ResourceBinding>>;

    /// Create a role. `code` must already carry the namespace prefix.
    async fn create_role(
        &self,
        code: &str,
        name: &str,
        namespace: &str,
        system_id: Option<i64>,
        description: &str,
    ) -> Result<Role>;

    /// Look up a role.
    async fn role(&self, role_id: i64) -> Result<Option<Role>>;

    /// Update role display fields.
    async fn update_role(
        &self,
        role_id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Role>>;

    /// Delete a role and cascade its grants and assignments.
    async fn delete_role(&self, role_id: i64) -> Result<bool>;

    /// Replace a role's effective permission set.
    async fn set_role_permissions(&self, role_id: i64, permission_ids: &[i64]) -> Result<()>;

    /// Resolve a role's permissions through the grant join.
    async fn permissions_for_role(&self, role_id: i64) -> Result<Vec<Permission>>;

    /// Create a permission. `code` must already carry the namespace prefix.
    #[allow(clippy::too_many_arguments)]
    async fn create_permission(
        &self,
        code: &str,
        name: &str,
        namespace: &str,
        system_id: Option<i64>,
        resource_type: &str,
        action: &str,
        description: &str,
    ) -> Result<Permission>;

    /// Delete a permission and cascade its grants.
    async fn delete_permission(&self, permission_id: i64) -> Result<bool>;

    /// Assign a role to a principal (unique per pair). Returns `false` if
    /// the assignment already existed.
    async fn assign_role(
        &self,
        principal_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<bool>;

    /// Remove a role assignment. Returns whether one existed.
    async fn unassign_role(&self, principal_id: &str, role_id: i64) -> Result<bool>;

    /// Create a resource binding.
    #[allow(clippy::too_many_arguments)]
    async fn create_binding(
        &self,
        principal_id: &str,
        namespace: &str,
        resource_type: &str,
        resource_id: &str,
        action: &str,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<&str>,
    ) -> Result<ResourceBinding>;

    /// Delete a binding, returning it so callers can notify the grantee.
    async fn delete_binding(&self, binding_id: i64) -> Result<Option<ResourceBinding>>;

    /// All roles in a namespace.
    async fn roles_in_namespace(&self, ns: &str) -> Result<Vec<Role>>;

    /// All permissions in a namespace.
    async fn permissions_in_namespace(&self, ns: &str) -> Result<Vec<Permission>>;

    /// All route patterns in a namespace.
    async fn route_patterns_in_namespace(&self, ns: &str) -> Result<Vec<RoutePattern>>;

    /// Create a route pattern. The pattern is assumed valid; callers
    /// validate the regex before writing.
    async fn create_route_pattern(
        &self,
        namespace: &str,
        role_id: i64,
        pattern: &str,
        method: &str,
        priority: i32,
        description: &str,
    ) -> Result<RoutePattern>;

    /// Delete a route pattern.
    async fn delete_route_pattern(&self, route_id: i64) -> Result<bool>;

    /// Register a downstream system with its signed credential.
    async fn create_system(
        &self,
        code: &str,
        name: &str,
        description: &str,
        api_endpoint: &str,
        credential: &str,
    ) -> Result<DownstreamSystem>;

    /// Look up a system by its code.
    async fn system_by_code(&self, code: &str) -> Result<Option<DownstreamSystem>>;

    /// Replace a system's credential.
    async fn update_system_credential(
        &self,
        system_id: i64,
        credential: &str,
    ) -> Result<Option<DownstreamSystem>>;
}

/// In-memory repository for tests and single-node runs.
#[derive(Default)]
pub struct MemoryRepository {
    principals: DashMap<String, Principal>,
    roles: DashMap<i64, Role>,
    permissions: DashMap<i64, Permission>,
    /// role_id -> granted permission ids
    grants: DashMap<i64, Vec<i64>>,
    /// (principal_id, role_id) -> assigning actor
    assignments: DashMap<(String, i64), Option<String>>,
    bindings: DashMap<i64, ResourceBinding>,
    routes: DashMap<i64, RoutePattern>,
    systems: DashMap<i64, DownstreamSystem>,
    next_id: AtomicI64,
}

impl MemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_principal(&self, profile: PrincipalProfile) -> Result<Principal> {
        let mut entry = self
            .principals
            .entry(profile.external_id.clone())
            .or_insert_with(|| Principal {
                id: profile.external_id.clone(),
                username: String::new(),
                email: String::new(),
                avatar: String::new(),
                mobile: String::new(),
                dept_ids: Vec::new(),
                dept_names: Vec::new(),
                status: PrincipalStatus::Active,
                last_login: Utc::now(),
            });
        entry.username = profile.username;
        entry.email = profile.email;
        entry.avatar = profile.avatar;
        entry.mobile = profile.mobile;
        entry.status = PrincipalStatus::Active;
        entry.last_login = Utc::now();
        Ok(entry.clone())
    }

    async fn principal(&self, id: &str) -> Result<Option<Principal>> {
        Ok(self.principals.get(id).map(|p| p.clone()))
    }

    async fn roles_for_principal(&self, principal_id: &str) -> Result<Vec<Role>> {
        let role_ids: Vec<i64> = self
            .assignments
            .iter()
            .filter(|e| e.key().0 == principal_id)
            .map(|e| e.key().1)
            .collect();
        Ok(role_ids
            .into_iter()
            .filter_map(|id| self.roles.get(&id).map(|r| r.clone()))
            .collect())
    }

    async fn bindings_for_principal(&self, principal_id: &str) -> Result<Vec<ResourceBinding>> {
        Ok(self
            .bindings
            .iter()
            .filter(|b| b.principal_id == principal_id)
            .map(|b| b.clone())
            .collect())
    }

    async fn create_role(
        &self,
        code: &str,
        name: &str,
        namespace: &str,
        system_id: Option<i64>,
        description: &str,
    ) -> Result<Role> {
        let role = Role {
            id: self.alloc_id(),
            code: code.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            system_id,
            description: description.to_string(),
        };
        self.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn role(&self, role_id: i64) -> Result<Option<Role>> {
        Ok(self.roles.get(&role_id).map(|r| r.clone()))
    }

    async fn update_role(
        &self,
        role_id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Role>> {
        if let Some(mut role) = self.roles.get_mut(&role_id) {
            if let Some(name) = name {
                role.name = name.to_string();
            }
            if let Some(description) = description {
                role.description = description.to_string();
            }
            return Ok(Some(role.clone()));
        }
        Ok(None)
    }

    async fn delete_role(&self, role_id: i64) -> Result<bool> {
        if self.roles.remove(&role_id).is_none() {
            return Ok(false);
        }
        self.grants.remove(&role_id);
        self.assignments.retain(|key, _| key.1 != role_id);
        self.routes.retain(|_, route| route.role_id != role_id);
        Ok(true)
    }

    async fn set_role_permissions(&self, role_id: i64, permission_ids: &[i64]) -> Result<()> {
        self.grants.insert(role_id, permission_ids.to_vec());
        Ok(())
    }

    async fn permissions_for_role(&self, role_id: i64) -> Result<Vec<Permission>> {
        let ids = self.grants.get(&role_id).map(|g| g.clone()).unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.permissions.get(&id).map(|p| p.clone()))
            .collect())
    }

    async fn create_permission(
        &self,
        code: &str,
        name: &str,
        namespace: &str,
        system_id: Option<i64>,
        resource_type: &str,
        action: &str,
        description: &str,
    ) -> Result<Permission> {
        let permission = Permission {
            id: self.alloc_id(),
            code: code.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            system_id,
            resource_type: resource_type.to_string(),
            action: action.to_string(),
            description: description.to_string(),
        };
        self.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool> {
        if self.permissions.remove(&permission_id).is_none() {
            return Ok(false);
        }
        for mut grant in self.grants.iter_mut() {
            grant.retain(|id| *id != permission_id);
        }
        Ok(true)
    }

    async fn assign_role(
        &self,
        principal_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<bool> {
        let key = (principal_id.to_string(), role_id);
        if self.assignments.contains_key(&key) {
            return Ok(false);
        }
        self.assignments
            .insert(key, assigned_by.map(ToString::to_string));
        Ok(true)
    }

    async fn unassign_role(&self, principal_id: &str, role_id: i64) -> Result<bool> {
        Ok(self
            .assignments
            .remove(&(principal_id.to_string(), role_id))
            .is_some())
    }

    async fn create_binding(
        &self,
        principal_id: &str,
        namespace: &str,
        resource_type: &str,
        resource_id: &str,
        action: &str,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<&str>,
    ) -> Result<ResourceBinding> {
        let binding = ResourceBinding {
            id: self.alloc_id(),
            principal_id: principal_id.to_string(),
            namespace: namespace.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            action: action.to_string(),
            expires_at,
            created_by: created_by.map(ToString::to_string),
        };
        self.bindings.insert(binding.id, binding.clone());
        Ok(binding)
    }

    async fn delete_binding(&self, binding_id: i64) -> Result<Option<ResourceBinding>> {
        Ok(self.bindings.remove(&binding_id).map(|(_, b)| b))
    }

    async fn roles_in_namespace(&self, ns: &str) -> Result<Vec<Role>> {
        Ok(self
            .roles
            .iter()
            .filter(|r| r.namespace == ns)
            .map(|r| r.clone())
            .collect())
    }

    async fn permissions_in_namespace(&self, ns: &str) -> Result<Vec<Permission>> {
        Ok(self
            .permissions
            .iter()
            .filter(|p| p.namespace == ns)
            .map(|p| p.clone())
            .collect())
    }

    async fn route_patterns_in_namespace(&self, ns: &str) -> Result<Vec<RoutePattern>> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.namespace == ns)
            .map(|r| r.clone())
            .collect())
    }

    async fn create_route_pattern(
        &self,
        namespace: &str,
        role_id: i64,
        pattern: &str,
        method: &str,
        priority: i32,
        description: &str,
    ) -> Result<RoutePattern> {
        let route = RoutePattern {
            id: self.alloc_id(),
            namespace: namespace.to_string(),
            role_id,
            pattern: pattern.to_string(),
            method: method.to_string(),
            priority,
            description: description.to_string(),
        };
        self.routes.insert(route.id, route.clone());
        Ok(route)
    }

    async fn delete_route_pattern(&self, route_id: i64) -> Result<bool> {
        Ok(self.routes.remove(&route_id).is_some())
    }

    async fn create_system(
        &self,
        code: &str,
        name: &str,
        description: &str,
        api_endpoint: &str,
        credential: &str,
    ) -> Result<DownstreamSystem> {
        let system = DownstreamSystem {
            id: self.alloc_id(),
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            api_endpoint: api_endpoint.to_string(),
            credential: credential.to_string(),
            status: "active".to_string(),
        };
        self.systems.insert(system.id, system.clone());
        Ok(system)
    }

    async fn system_by_code(&self, code: &str) -> Result<Option<DownstreamSystem>> {
        Ok(self
            .systems
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.clone()))
    }

    async fn update_system_credential(
        &self,
        system_id: i64,
        credential: &str,
    ) -> Result<Option<DownstreamSystem>> {
        if let Some(mut system) = self.systems.get_mut(&system_id) {
            system.credential = credential.to_string();
            return Ok(Some(system.clone()));
        }
        Ok(None)
    }
}

impl Role {
    /// The role's local code (namespace prefix stripped).
    #[must_use]
    pub fn local_code(&self) -> String {
        namespace::strip(&self.code, &self.namespace)
    }
}

impl Permission {
    /// The permission's local code (namespace prefix stripped).
    #[must_use]
    pub fn local_code(&self) -> String {
        namespace::strip(&self.code, &self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, name: &str) -> PrincipalProfile {
        PrincipalProfile {
            external_id: id.to_string(),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            ..PrincipalProfile::default()
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_external_id() {
        let repo = MemoryRepository::new();
        let first = repo.upsert_principal(profile("u1", "Alice")).await.unwrap();
        let second = repo
            .upsert_principal(profile("u1", "Alice Chen"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "Alice Chen");
        assert_eq!(second.status, PrincipalStatus::Active);
    }

    #[tokio::test]
    async fn role_assignment_is_unique_per_pair() {
        let repo = MemoryRepository::new();
        repo.upsert_principal(profile("u1", "Alice")).await.unwrap();
        let role = repo
            .create_role("acme:editor", "Editor", "acme", None, "")
            .await
            .unwrap();

        assert!(repo.assign_role("u1", role.id, Some("admin")).await.unwrap());
        assert!(!repo.assign_role("u1", role.id, None).await.unwrap());

        let roles = repo.roles_for_principal("u1").await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].code, "acme:editor");
    }

    #[tokio::test]
    async fn delete_role_cascades_grants_and_assignments() {
        let repo = MemoryRepository::new();
        let role = repo
            .create_role("acme:editor", "Editor", "acme", None, "")
            .await
            .unwrap();
        let perm = repo
            .create_permission("acme:doc:read", "Read docs", "acme", None, "doc", "read", "")
            .await
            .unwrap();
        repo.set_role_permissions(role.id, &[perm.id]).await.unwrap();
        repo.assign_role("u1", role.id, None).await.unwrap();

        assert!(repo.delete_role(role.id).await.unwrap());
        assert!(repo.roles_for_principal("u1").await.unwrap().is_empty());
        assert!(repo.permissions_for_role(role.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_code_strips_namespace() {
        let repo = MemoryRepository::new();
        let role = repo
            .create_role("acme:editor", "Editor", "acme", None, "")
            .await
            .unwrap();
        assert_eq!(role.local_code(), "editor");
    }
}
