//! Namespace-partitioned RBAC: permission aggregation for token issuance
//! and the admin mutations that feed the change-notification bus.

pub mod collector;
pub mod namespace;
pub mod service;
pub mod snapshot;

pub use collector::PermissionCollector;
pub use service::{BindingSpec, RbacService};
pub use snapshot::{PermissionSnapshot, ResourceId};
