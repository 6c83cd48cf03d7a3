//! Change notification bus — structured change events published to
//! per-namespace channels so downstream caches can invalidate instead of
//! polling.
//!
//! Delivery is best-effort and at-most-once: a subscriber that is offline at
//! publish time simply misses the event. The bus is a latency optimization;
//! periodic config pulls remain the consistency backstop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::repo::Role;
use crate::store::{KeyValueStore, blacklist_key};
use crate::{Result, rbac::namespace};

/// Pub/sub channel for a namespace's permission changes.
#[must_use]
pub fn channel(ns: &str) -> String {
    format!("permission:changed:{ns}")
}

/// Structured change event, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A role was created in its namespace
    RoleCreated {
        /// Role surrogate ID
        role_id: i64,
        /// Fully qualified role code
        role_code: String,
    },
    /// A role's display fields changed
    RoleUpdated {
        /// Role surrogate ID
        role_id: i64,
    },
    /// A role's effective permission set changed
    RolePermissionsUpdated {
        /// Role surrogate ID
        role_id: i64,
    },
    /// A principal's roles or bindings changed (any system may be affected)
    UserPermissionsChanged {
        /// Affected principal's external ID
        user_id: String,
    },
    /// A namespace's config payload should be re-pulled
    ConfigUpdated {
        /// Advisory version string at publish time
        config_version: String,
    },
    /// An access token was revoked
    TokenRevoked {
        /// Blacklisted token identifier
        jti: String,
    },
}

/// Wire envelope: the tagged event plus a publish timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// The event payload
    #[serde(flatten)]
    pub event: ChangeEvent,
    /// Unix timestamp (fractional seconds) at publish time
    pub timestamp: f64,
}

/// Best-effort pub/sub transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a channel. Absent subscribers are not an error.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. Messages published before this call are
    /// never delivered.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

/// In-process bus over tokio broadcast channels; one sender per channel
/// name, created on first use.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // send fails only when nobody is subscribed; at-most-once semantics
        // make that a non-event
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

/// Publishes permission-change events; the revocation side also couples the
/// blacklist write to the notification.
pub struct ChangeNotifier {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn KeyValueStore>,
}

impl ChangeNotifier {
    /// Create a notifier over the given bus and revocation store.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { bus, store }
    }

    /// Role created — published to the role's own namespace.
    pub async fn role_created(&self, role: &Role) -> Result<()> {
        self.publish(
            &role.namespace,
            ChangeEvent::RoleCreated {
                role_id: role.id,
                role_code: role.code.clone(),
            },
        )
        .await
    }

    /// Role display fields updated.
    pub async fn role_updated(&self, role: &Role) -> Result<()> {
        self.publish(&role.namespace, ChangeEvent::RoleUpdated { role_id: role.id })
            .await
    }

    /// Role's permission set updated.
    pub async fn role_permissions_updated(&self, role: &Role) -> Result<()> {
        self.publish(
            &role.namespace,
            ChangeEvent::RolePermissionsUpdated { role_id: role.id },
        )
        .await
    }

    /// A principal's effective permissions changed. Always goes to the
    /// `global` channel: the principal's roles can span namespaces, so any
    /// downstream system might be affected.
    pub async fn user_permissions_changed(&self, user_id: &str) -> Result<()> {
        self.publish(
            namespace::GLOBAL,
            ChangeEvent::UserPermissionsChanged {
                user_id: user_id.to_string(),
            },
        )
        .await
    }

    /// A namespace's config should be re-pulled.
    pub async fn config_updated(&self, ns: &str) -> Result<()> {
        let config_version = format!("v{ns}_{}", Utc::now().timestamp());
        self.publish(ns, ChangeEvent::ConfigUpdated { config_version })
            .await
    }

    /// Token revoked: writes the blacklist entry, then notifies the global
    /// channel. The write comes first so revocation holds even if the
    /// best-effort publish is lost.
    pub async fn token_revoked(&self, jti: &str, blacklist_ttl: Duration) -> Result<()> {
        self.store
            .set_ex(&blacklist_key(jti), "1", blacklist_ttl)
            .await?;
        self.publish(
            namespace::GLOBAL,
            ChangeEvent::TokenRevoked {
                jti: jti.to_string(),
            },
        )
        .await
    }

    async fn publish(&self, ns: &str, event: ChangeEvent) -> Result<()> {
        let envelope = ChangeEnvelope {
            event,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        };
        let payload = serde_json::to_string(&envelope)?;
        debug!(namespace = %ns, payload = %payload, "publishing change event");
        self.bus.publish(&channel(ns), &payload).await
    }
}

/// Handler invoked for each event delivered on a subscribed channel.
pub type EventHandler = Arc<dyn Fn(ChangeEnvelope) -> Result<()> + Send + Sync>;

/// Long-lived subscriber loops dispatching to registered per-channel
/// handlers. One bad message or failing handler never stops delivery.
pub struct ChangeListener {
    bus: Arc<dyn MessageBus>,
    handlers: DashMap<String, Vec<EventHandler>>,
}

impl ChangeListener {
    /// Create a listener over the given bus.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for a namespace's channel.
    pub fn on(&self, ns: &str, handler: EventHandler) {
        self.handlers
            .entry(channel(ns))
            .or_default()
            .push(handler);
    }

    /// Spawn one listening task per registered channel. Tasks run until the
    /// bus drops the channel.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for entry in &self.handlers {
            let chan = entry.key().clone();
            let handlers = entry.value().clone();
            let mut rx = self.bus.subscribe(&chan);
            info!(channel = %chan, handlers = handlers.len(), "subscribed");

            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => {
                            let envelope: ChangeEnvelope = match serde_json::from_str(&payload) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    warn!(channel = %chan, error = %e, "unparseable event, skipping");
                                    continue;
                                }
                            };
                            for handler in &handlers {
                                if let Err(e) = handler(envelope.clone()) {
                                    error!(channel = %chan, error = %e, "event handler failed");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // missed events are recovered by the periodic
                            // config pull
                            warn!(channel = %chan, missed, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
        tasks
    }
}
