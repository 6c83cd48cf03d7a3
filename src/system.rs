//! Downstream system registration and credential lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::notify::ChangeNotifier;
use crate::rbac::namespace;
use crate::repo::{DownstreamSystem, Repository};
use crate::token::TokenService;
use crate::{Error, Result};

/// Registers downstream systems and manages their long-lived credentials.
///
/// A system's code doubles as its namespace, so registration is also what
/// brings a namespace into existence.
pub struct SystemService {
    repo: Arc<dyn Repository>,
    tokens: Arc<TokenService>,
    notifier: Arc<ChangeNotifier>,
    credential_ttl_days: u64,
}

impl SystemService {
    /// Create a service issuing credentials with the given lifetime.
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        tokens: Arc<TokenService>,
        notifier: Arc<ChangeNotifier>,
        credential_ttl_days: u64,
    ) -> Self {
        Self {
            repo,
            tokens,
            notifier,
            credential_ttl_days,
        }
    }

    /// Register a system and mint its credential. The credential is returned
    /// once here and stored for later comparison; it is not retrievable
    /// through any read endpoint.
    pub async fn register(
        &self,
        code: &str,
        name: &str,
        description: &str,
        api_endpoint: &str,
    ) -> Result<DownstreamSystem> {
        if code.is_empty() || code == namespace::GLOBAL || code.contains(':') {
            return Err(Error::Invalid(format!("invalid system code: {code:?}")));
        }
        if self.repo.system_by_code(code).await?.is_some() {
            return Err(Error::Invalid(format!("system code already exists: {code}")));
        }

        let issued = self
            .tokens
            .issue_system_token(code, name, self.credential_ttl_days)?;
        let system = self
            .repo
            .create_system(code, name, description, api_endpoint, &issued.token)
            .await?;
        info!(system = %code, "downstream system registered");
        Ok(system)
    }

    /// Replace a system's credential, revoking the old one immediately.
    pub async fn rotate_credential(&self, code: &str) -> Result<DownstreamSystem> {
        let system = self
            .repo
            .system_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("system {code}")))?;

        // blacklist the old credential for its remaining lifetime
        match self.tokens.verify(&system.credential).await {
            Ok(old) => {
                let remaining =
                    u64::try_from(old.exp - Utc::now().timestamp()).unwrap_or_default();
                self.notifier
                    .token_revoked(&old.jti, Duration::from_secs(remaining))
                    .await?;
            }
            Err(e) => warn!(system = %code, error = %e, "old credential already unusable"),
        }

        let issued = self
            .tokens
            .issue_system_token(code, &system.name, self.credential_ttl_days)?;
        let updated = self
            .repo
            .update_system_credential(system.id, &issued.token)
            .await?
            .ok_or_else(|| Error::NotFound(format!("system {code}")))?;
        info!(system = %code, "system credential rotated");
        Ok(updated)
    }

    /// Look up a system by code.
    pub async fn get(&self, code: &str) -> Result<DownstreamSystem> {
        self.repo
            .system_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("system {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::keys::KeyStore;
    use crate::notify::MemoryBus;
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;
    use crate::token::SubjectKind;

    fn service() -> (SystemService, Arc<TokenService>) {
        let (private_pem, public_pem) = KeyStore::generate_p256().unwrap();
        let keys = Arc::new(KeyStore::from_pem(&private_pem, &public_pem, "ES256").unwrap());
        let store = Arc::new(MemoryStore::new());
        let tokens = Arc::new(TokenService::new(
            keys,
            store.clone(),
            &JwtConfig {
                algorithm: "ES256".to_string(),
                ..JwtConfig::default()
            },
        ));
        let notifier = Arc::new(ChangeNotifier::new(Arc::new(MemoryBus::new()), store));
        let repo = Arc::new(MemoryRepository::new());
        (
            SystemService::new(repo, tokens.clone(), notifier, 365),
            tokens,
        )
    }

    #[tokio::test]
    async fn registration_mints_a_verifiable_system_credential() {
        let (systems, tokens) = service();
        let system = systems
            .register("acme", "Acme CRM", "", "https://acme.example.com")
            .await
            .unwrap();

        let claims = tokens
            .verify_kind(&system.credential, SubjectKind::System)
            .await
            .unwrap();
        assert_eq!(claims.sub, "acme");
    }

    #[tokio::test]
    async fn reserved_and_duplicate_codes_are_rejected() {
        let (systems, _) = service();
        assert!(matches!(
            systems.register("global", "Nope", "", "").await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            systems.register("bad:code", "Nope", "", "").await,
            Err(Error::Invalid(_))
        ));

        systems.register("acme", "Acme", "", "").await.unwrap();
        assert!(matches!(
            systems.register("acme", "Acme again", "", "").await,
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn rotation_revokes_the_old_credential() {
        let (systems, tokens) = service();
        let before = systems.register("acme", "Acme", "", "").await.unwrap();
        let after = systems.rotate_credential("acme").await.unwrap();

        assert_ne!(before.credential, after.credential);
        assert!(tokens.verify(&after.credential).await.is_ok());
        let old = tokens.verify(&before.credential).await;
        assert!(matches!(old, Err(Error::TokenRevoked)));
    }
}
