//! RBAC administration — every mutation that changes who can do what, each
//! one followed by the matching change notification so downstream caches
//! converge without polling.
//!
//! Validation happens here, at write time: a route pattern with a broken
//! regex or a duplicate role code is rejected before it can poison the
//! config payloads every downstream system pulls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

use super::namespace;
use crate::notify::ChangeNotifier;
use crate::repo::{Permission, Repository, ResourceBinding, Role, RoutePattern};
use crate::{Error, Result};

const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "*"];

/// One resource grant in a batch binding request.
#[derive(Debug, Clone)]
pub struct BindingSpec {
    /// Resource type
    pub resource_type: String,
    /// Concrete resource ID
    pub resource_id: String,
    /// Granted action
    pub action: String,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Administrative mutations over the RBAC model.
pub struct RbacService {
    repo: Arc<dyn Repository>,
    notifier: Arc<ChangeNotifier>,
}

impl RbacService {
    /// Create a service over the given repository and notifier.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { repo, notifier }
    }

    /// Create a role in a namespace. `local_code` is the unprefixed code;
    /// the stored code is fully qualified. Duplicate codes are rejected.
    pub async fn create_role(
        &self,
        ns: &str,
        local_code: &str,
        name: &str,
        system_id: Option<i64>,
        description: &str,
    ) -> Result<Role> {
        if local_code.is_empty() {
            return Err(Error::Invalid("role code must not be empty".to_string()));
        }
        let code = namespace::qualify(ns, local_code);
        let taken = self
            .repo
            .roles_in_namespace(ns)
            .await?
            .iter()
            .any(|r| r.code == code);
        if taken {
            return Err(Error::Invalid(format!("role code already exists: {code}")));
        }

        let role = self
            .repo
            .create_role(&code, name, ns, system_id, description)
            .await?;
        info!(role = %role.code, namespace = %ns, "role created");
        self.notifier.role_created(&role).await?;
        Ok(role)
    }

    /// Update a role's display fields.
    pub async fn update_role(
        &self,
        role_id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Role> {
        let role = self
            .repo
            .update_role(role_id, name, description)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {role_id}")))?;
        self.notifier.role_updated(&role).await?;
        Ok(role)
    }

    /// Delete a role; grants, assignments, and route patterns referencing it
    /// cascade. Every consumer of the namespace must re-pull.
    pub async fn delete_role(&self, role_id: i64) -> Result<()> {
        let role = self
            .repo
            .role(role_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {role_id}")))?;
        self.repo.delete_role(role_id).await?;
        info!(role = %role.code, "role deleted");
        self.notifier.config_updated(&role.namespace).await
    }

    /// Replace a role's effective permission set.
    pub async fn set_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<Vec<Permission>> {
        let role = self
            .repo
            .role(role_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {role_id}")))?;
        self.repo.set_role_permissions(role_id, permission_ids).await?;
        self.notifier.role_permissions_updated(&role).await?;
        self.repo.permissions_for_role(role_id).await
    }

    /// Create a permission in a namespace.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_permission(
        &self,
        ns: &str,
        local_code: &str,
        name: &str,
        system_id: Option<i64>,
        resource_type: &str,
        action: &str,
        description: &str,
    ) -> Result<Permission> {
        if local_code.is_empty() {
            return Err(Error::Invalid(
                "permission code must not be empty".to_string(),
            ));
        }
        let code = namespace::qualify(ns, local_code);
        let taken = self
            .repo
            .permissions_in_namespace(ns)
            .await?
            .iter()
            .any(|p| p.code == code);
        if taken {
            return Err(Error::Invalid(format!(
                "permission code already exists: {code}"
            )));
        }

        let permission = self
            .repo
            .create_permission(&code, name, ns, system_id, resource_type, action, description)
            .await?;
        self.notifier.config_updated(ns).await?;
        Ok(permission)
    }

    /// Delete a permission; grants referencing it cascade.
    pub async fn delete_permission(&self, ns: &str, permission_id: i64) -> Result<()> {
        if !self.repo.delete_permission(permission_id).await? {
            return Err(Error::NotFound(format!("permission {permission_id}")));
        }
        self.notifier.config_updated(ns).await
    }

    /// Assign a role to a principal. Idempotent: re-assigning an existing
    /// pair is a no-op and publishes nothing.
    pub async fn assign_role(
        &self,
        principal_id: &str,
        role_id: i64,
        assigned_by: Option<&str>,
    ) -> Result<()> {
        if self.repo.role(role_id).await?.is_none() {
            return Err(Error::NotFound(format!("role {role_id}")));
        }
        if self.repo.assign_role(principal_id, role_id, assigned_by).await? {
            self.notifier.user_permissions_changed(principal_id).await?;
        }
        Ok(())
    }

    /// Remove a role assignment.
    pub async fn unassign_role(&self, principal_id: &str, role_id: i64) -> Result<()> {
        if !self.repo.unassign_role(principal_id, role_id).await? {
            return Err(Error::NotFound(format!(
                "assignment of role {role_id} to {principal_id}"
            )));
        }
        self.notifier.user_permissions_changed(principal_id).await
    }

    /// Grant a principal an action on a concrete resource.
    pub async fn create_binding(
        &self,
        principal_id: &str,
        ns: &str,
        spec: BindingSpec,
        created_by: Option<&str>,
    ) -> Result<ResourceBinding> {
        let binding = self
            .repo
            .create_binding(
                principal_id,
                ns,
                &spec.resource_type,
                &spec.resource_id,
                &spec.action,
                spec.expires_at,
                created_by,
            )
            .await?;
        self.notifier.user_permissions_changed(principal_id).await?;
        Ok(binding)
    }

    /// Grant several resources to one principal in one call, with a single
    /// notification at the end.
    pub async fn create_bindings(
        &self,
        principal_id: &str,
        ns: &str,
        specs: Vec<BindingSpec>,
        created_by: Option<&str>,
    ) -> Result<Vec<ResourceBinding>> {
        let mut bindings = Vec::with_capacity(specs.len());
        for spec in specs {
            bindings.push(
                self.repo
                    .create_binding(
                        principal_id,
                        ns,
                        &spec.resource_type,
                        &spec.resource_id,
                        &spec.action,
                        spec.expires_at,
                        created_by,
                    )
                    .await?,
            );
        }
        if !bindings.is_empty() {
            self.notifier.user_permissions_changed(principal_id).await?;
        }
        Ok(bindings)
    }

    /// Revoke a resource binding, notifying the grantee's systems.
    pub async fn delete_binding(&self, binding_id: i64) -> Result<ResourceBinding> {
        let binding = self
            .repo
            .delete_binding(binding_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("binding {binding_id}")))?;
        self.notifier
            .user_permissions_changed(&binding.principal_id)
            .await?;
        Ok(binding)
    }

    /// Create a route pattern. The regex and method are validated here so a
    /// bad pattern can never reach a downstream matcher.
    pub async fn create_route_pattern(
        &self,
        ns: &str,
        role_id: i64,
        pattern: &str,
        method: &str,
        priority: i32,
        description: &str,
    ) -> Result<RoutePattern> {
        Regex::new(pattern)
            .map_err(|e| Error::Invalid(format!("invalid route pattern: {e}")))?;
        if !HTTP_METHODS.contains(&method) {
            return Err(Error::Invalid(format!("invalid HTTP method: {method}")));
        }
        if self.repo.role(role_id).await?.is_none() {
            return Err(Error::NotFound(format!("role {role_id}")));
        }

        let route = self
            .repo
            .create_route_pattern(ns, role_id, pattern, method, priority, description)
            .await?;
        self.notifier.config_updated(ns).await?;
        Ok(route)
    }

    /// Delete a route pattern.
    pub async fn delete_route_pattern(&self, ns: &str, route_id: i64) -> Result<()> {
        if !self.repo.delete_route_pattern(route_id).await? {
            return Err(Error::NotFound(format!("route pattern {route_id}")));
        }
        self.notifier.config_updated(ns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChangeEvent, MemoryBus, MessageBus, channel};
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;

    struct Fixture {
        service: RbacService,
        bus: Arc<MemoryBus>,
        repo: Arc<MemoryRepository>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(ChangeNotifier::new(bus.clone(), store));
        Fixture {
            service: RbacService::new(repo.clone(), notifier),
            bus,
            repo,
        }
    }

    #[tokio::test]
    async fn role_creation_qualifies_code_and_notifies_namespace() {
        let f = fixture();
        let mut rx = f.bus.subscribe(&channel("acme"));

        let role = f
            .service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();
        assert_eq!(role.code, "acme:editor");

        let payload = rx.recv().await.unwrap();
        let envelope: crate::notify::ChangeEnvelope = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            envelope.event,
            ChangeEvent::RoleCreated {
                role_id: role.id,
                role_code: "acme:editor".to_string()
            }
        );
    }

    #[tokio::test]
    async fn duplicate_role_code_is_rejected() {
        let f = fixture();
        f.service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();
        let result = f
            .service
            .create_role("acme", "editor", "Editor again", None, "")
            .await;
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn reassigning_existing_role_publishes_nothing() {
        let f = fixture();
        let role = f
            .service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();
        let mut global_rx = f.bus.subscribe(&channel("global"));

        f.service.assign_role("u1", role.id, None).await.unwrap();
        f.service.assign_role("u1", role.id, None).await.unwrap();

        // exactly one user_permissions_changed event
        let first = global_rx.recv().await.unwrap();
        assert!(first.contains("user_permissions_changed"));
        assert!(global_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_route_regex_is_rejected_at_write_time() {
        let f = fixture();
        let role = f
            .service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();

        let result = f
            .service
            .create_route_pattern("acme", role.id, "/docs/[", "GET", 0, "")
            .await;
        assert!(matches!(result, Err(Error::Invalid(_))));
        assert!(
            f.repo
                .route_patterns_in_namespace("acme")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_http_method_is_rejected() {
        let f = fixture();
        let role = f
            .service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();

        let result = f
            .service
            .create_route_pattern("acme", role.id, "^/docs/.*$", "FETCH", 0, "")
            .await;
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn batch_bindings_notify_once() {
        let f = fixture();
        let mut global_rx = f.bus.subscribe(&channel("global"));

        let specs = vec![
            BindingSpec {
                resource_type: "project".to_string(),
                resource_id: "1".to_string(),
                action: "read".to_string(),
                expires_at: None,
            },
            BindingSpec {
                resource_type: "project".to_string(),
                resource_id: "2".to_string(),
                action: "read".to_string(),
                expires_at: None,
            },
        ];
        let bindings = f
            .service
            .create_bindings("u1", "acme", specs, Some("admin"))
            .await
            .unwrap();
        assert_eq!(bindings.len(), 2);

        assert!(global_rx.recv().await.is_ok());
        assert!(global_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deleting_role_tells_namespace_to_repull() {
        let f = fixture();
        let role = f
            .service
            .create_role("acme", "editor", "Editor", None, "")
            .await
            .unwrap();
        let mut rx = f.bus.subscribe(&channel("acme"));

        f.service.delete_role(role.id).await.unwrap();
        let payload = rx.recv().await.unwrap();
        assert!(payload.contains("config_updated"));

        let missing = f.service.delete_role(role.id).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
