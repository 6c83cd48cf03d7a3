//! Principal lifecycle. Identity data always flows from the provider; this
//! broker only mirrors it.

use std::sync::Arc;

use tracing::info;

use crate::repo::{Principal, PrincipalProfile, Repository};
use crate::sso::SsoProfile;
use crate::{Error, Result};

/// Mirrors provider identities into the local principal table.
pub struct PrincipalService {
    repo: Arc<dyn Repository>,
}

impl PrincipalService {
    /// Create a service over the given repository.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Upsert the principal behind a fresh SSO profile. Runs on every
    /// successful login: display fields are refreshed, `last_login` bumped,
    /// and a previously deactivated principal comes back active.
    pub async fn sync_from_sso(&self, profile: &SsoProfile) -> Result<Principal> {
        let principal = self
            .repo
            .upsert_principal(PrincipalProfile {
                external_id: profile.external_id().to_string(),
                username: profile.name.clone(),
                email: profile.best_email(),
                avatar: profile.avatar_url.clone().unwrap_or_default(),
                mobile: profile.mobile.clone().unwrap_or_default(),
            })
            .await?;
        info!(principal = %principal.id, "principal synced from SSO");
        Ok(principal)
    }

    /// Look up a principal, erroring when absent.
    pub async fn get(&self, id: &str) -> Result<Principal> {
        self.repo
            .principal(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("principal {id}")))
    }
}
