//! Token issuance and verification.
//!
//! Two credential families share one signing keypair: short-lived user
//! access tokens carrying a full permission snapshot, and long-lived system
//! tokens that downstream services present when pulling config. Refresh
//! tokens are deliberately not JWTs; they are opaque random handles whose
//! meaning lives server-side, which is what makes single-use rotation
//! enforceable.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Header, Validation, decode, encode, errors::ErrorKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JwtConfig;
use crate::keys::KeyStore;
use crate::rbac::PermissionSnapshot;
use crate::repo::Principal;
use crate::store::{KeyValueStore, blacklist_key, refresh_token_key};
use crate::{Error, Result};

/// What kind of subject a token speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// A human principal authenticated through SSO
    User,
    /// A registered downstream system
    System,
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::System => "system",
        })
    }
}

/// JWT claims for both token kinds.
///
/// User tokens embed the principal's whole [`PermissionSnapshot`] so
/// downstream systems can authorize requests without calling back. System
/// tokens carry no snapshot; their `sub` is the system code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: principal external ID, or system code
    pub sub: String,
    /// Token kind discriminator
    pub user_type: SubjectKind,
    /// Display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Contact email (user tokens only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Organizational-unit IDs (user tokens only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dept_ids: Vec<String>,
    /// Organizational-unit names (user tokens only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dept_names: Vec<String>,
    /// System display name (system tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    /// Permission snapshot, flattened into the claim set
    #[serde(flatten)]
    pub permissions: PermissionSnapshot,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Unique token ID, `{kind}_{sub}_{issued_at}`; revocation key
    pub jti: String,
}

/// A freshly signed token plus its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWT
    pub token: String,
    /// The claims that were signed
    pub claims: Claims,
}

/// Issues, verifies, and rotates every credential the broker hands out.
pub struct TokenService {
    keys: Arc<KeyStore>,
    store: Arc<dyn KeyValueStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Create a token service over the given keypair and revocation store.
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, store: Arc<dyn KeyValueStore>, config: &JwtConfig) -> Self {
        Self {
            keys,
            store,
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
        }
    }

    /// Access token lifetime, as advertised in login/refresh responses.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign a user access token embedding the principal's permission
    /// snapshot. The snapshot is frozen at issuance; later permission
    /// changes only show up in the next token.
    pub fn issue_access_token(
        &self,
        principal: &Principal,
        permissions: PermissionSnapshot,
    ) -> Result<IssuedToken> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: principal.id.clone(),
            user_type: SubjectKind::User,
            username: principal.username.clone(),
            email: principal.email.clone(),
            dept_ids: principal.dept_ids.clone(),
            dept_names: principal.dept_names.clone(),
            system_name: None,
            permissions,
            iat: now,
            exp: now + i64::try_from(self.access_ttl.as_secs()).unwrap_or(i64::MAX),
            jti: format!("{}_{}_{now}", SubjectKind::User, principal.id),
        };
        self.sign(claims)
    }

    /// Sign a long-lived system token for a registered downstream system.
    pub fn issue_system_token(&self, code: &str, name: &str, ttl_days: u64) -> Result<IssuedToken> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl_days * 24 * 3600).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: code.to_string(),
            user_type: SubjectKind::System,
            username: name.to_string(),
            email: String::new(),
            dept_ids: Vec::new(),
            dept_names: Vec::new(),
            system_name: Some(name.to_string()),
            permissions: PermissionSnapshot::default(),
            iat: now,
            exp: now + ttl_secs,
            jti: format!("{}_{code}_{now}", SubjectKind::System),
        };
        self.sign(claims)
    }

    fn sign(&self, claims: Claims) -> Result<IssuedToken> {
        let token = encode(
            &Header::new(self.keys.algorithm()),
            &claims,
            self.keys.encoding(),
        )
        .map_err(|e| Error::Internal(format!("token signing failed: {e}")))?;
        debug!(jti = %claims.jti, kind = %claims.user_type, "token issued");
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and expiry, then consult the revocation blacklist.
    ///
    /// Zero clock leeway: a token is rejected the second it expires.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.keys.algorithm());
        validation.leeway = 0;

        let claims = decode::<Claims>(token, self.keys.decoding(), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::TokenInvalidSignature,
            })?;

        if self.store.exists(&blacklist_key(&claims.jti)).await? {
            return Err(Error::TokenRevoked);
        }
        Ok(claims)
    }

    /// Verify, additionally requiring a specific subject kind.
    pub async fn verify_kind(&self, token: &str, expected: SubjectKind) -> Result<Claims> {
        let claims = self.verify(token).await?;
        if claims.user_type != expected {
            return Err(Error::TokenTypeMismatch {
                expected: expected.to_string(),
                actual: claims.user_type.to_string(),
            });
        }
        Ok(claims)
    }

    /// Mint an opaque refresh token bound server-side to a principal.
    ///
    /// 48 random bytes, base64url. The NX write loops on the (cosmically
    /// unlikely) collision with a live token rather than overwriting it.
    pub async fn issue_refresh_token(&self, principal_id: &str) -> Result<String> {
        loop {
            let mut bytes = [0u8; 48];
            rand::rng().fill_bytes(&mut bytes);
            let opaque = URL_SAFE_NO_PAD.encode(bytes);
            if self
                .store
                .set_ex_nx(&refresh_token_key(&opaque), principal_id, self.refresh_ttl)
                .await?
            {
                return Ok(opaque);
            }
        }
    }

    /// Look up the principal a refresh token is bound to without consuming
    /// it. Absent (expired or never issued) reads as invalid.
    pub async fn verify_refresh_token(&self, opaque: &str) -> Result<String> {
        self.store
            .get(&refresh_token_key(opaque))
            .await?
            .ok_or(Error::TokenInvalidSignature)
    }

    /// Blacklist an access token's jti. The TTL only needs to cover the
    /// token's remaining lifetime; the entry expires with it.
    pub async fn revoke_access_token(&self, jti: &str, ttl: Duration) -> Result<()> {
        self.store.set_ex(&blacklist_key(jti), "1", ttl).await
    }

    /// Consume a refresh token and mint its replacement.
    ///
    /// The atomic take is what makes rotation single-use: of N concurrent
    /// presentations of the same token, exactly one wins and the rest fail
    /// verification. Returns the bound principal ID and the new token.
    pub async fn rotate_refresh_token(&self, opaque: &str) -> Result<(String, String)> {
        let principal_id = self
            .store
            .take(&refresh_token_key(opaque))
            .await?
            .ok_or(Error::TokenInvalidSignature)?;
        let next = self.issue_refresh_token(&principal_id).await?;
        Ok((principal_id, next))
    }

    /// Drop a refresh token without replacement (logout).
    pub async fn discard_refresh_token(&self, opaque: &str) -> Result<bool> {
        self.store.delete(&refresh_token_key(opaque)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::repo::PrincipalStatus;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn test_service(store: Arc<MemoryStore>) -> TokenService {
        let (private_pem, public_pem) = KeyStore::generate_p256().unwrap();
        let keys = Arc::new(KeyStore::from_pem(&private_pem, &public_pem, "ES256").unwrap());
        TokenService::new(keys, store, &test_config())
    }

    fn test_config() -> JwtConfig {
        JwtConfig {
            algorithm: "ES256".to_string(),
            ..JwtConfig::default()
        }
    }

    fn alice() -> Principal {
        Principal {
            id: "u1".to_string(),
            username: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            avatar: String::new(),
            mobile: String::new(),
            dept_ids: vec!["d1".to_string()],
            dept_names: vec!["Engineering".to_string()],
            status: PrincipalStatus::Active,
            last_login: Utc::now(),
        }
    }

    #[tokio::test]
    async fn access_token_round_trips_with_snapshot() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let snapshot = PermissionSnapshot {
            global_roles: vec!["admin".to_string()],
            ..PermissionSnapshot::default()
        };

        let issued = service.issue_access_token(&alice(), snapshot).unwrap();
        let claims = service.verify(&issued.token).await.unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.user_type, SubjectKind::User);
        assert_eq!(claims.username, "Alice");
        assert_eq!(claims.dept_names, vec!["Engineering".to_string()]);
        assert_eq!(claims.permissions.global_roles, vec!["admin".to_string()]);
        assert!(claims.jti.starts_with("user_u1_"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = test_service(store);
        let mut issued = service
            .issue_access_token(&alice(), PermissionSnapshot::default())
            .unwrap();

        // re-sign with an exp in the past
        issued.claims.exp = Utc::now().timestamp() - 10;
        let stale = service.sign(issued.claims).unwrap();

        let result = service.verify(&stale.token).await;
        assert!(matches!(result, Err(Error::TokenExpired)));
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let issuer = test_service(store.clone());
        let verifier = test_service(store);

        let issued = issuer
            .issue_access_token(&alice(), PermissionSnapshot::default())
            .unwrap();
        let result = verifier.verify(&issued.token).await;
        assert!(matches!(result, Err(Error::TokenInvalidSignature)));
    }

    #[tokio::test]
    async fn blacklisted_jti_reads_as_revoked() {
        let store = Arc::new(MemoryStore::new());
        let service = test_service(store.clone());
        let issued = service
            .issue_access_token(&alice(), PermissionSnapshot::default())
            .unwrap();

        service
            .revoke_access_token(&issued.claims.jti, Duration::from_secs(60))
            .await
            .unwrap();

        let result = service.verify(&issued.token).await;
        assert!(matches!(result, Err(Error::TokenRevoked)));
    }

    #[tokio::test]
    async fn refresh_token_can_be_checked_without_consuming_it() {
        let store = Arc::new(MemoryStore::new());
        let service = test_service(store);
        let opaque = service.issue_refresh_token("u1").await.unwrap();

        assert_eq!(service.verify_refresh_token(&opaque).await.unwrap(), "u1");
        // a peek does not burn the token
        assert!(service.rotate_refresh_token(&opaque).await.is_ok());

        let result = service.verify_refresh_token("no-such-token").await;
        assert!(matches!(result, Err(Error::TokenInvalidSignature)));
    }

    #[tokio::test]
    async fn user_token_fails_system_check() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let issued = service
            .issue_access_token(&alice(), PermissionSnapshot::default())
            .unwrap();

        let result = service.verify_kind(&issued.token, SubjectKind::System).await;
        assert!(matches!(result, Err(Error::TokenTypeMismatch { .. })));
        // but the plain check still passes
        assert!(service.verify(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn system_token_carries_code_and_name() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let issued = service.issue_system_token("acme", "Acme CRM", 365).unwrap();

        let claims = service
            .verify_kind(&issued.token, SubjectKind::System)
            .await
            .unwrap();
        assert_eq!(claims.sub, "acme");
        assert_eq!(claims.system_name.as_deref(), Some("Acme CRM"));
        assert!(claims.jti.starts_with("system_acme_"));
        assert!(claims.permissions.is_empty());
    }

    #[tokio::test]
    async fn refresh_rotation_is_single_use() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let opaque = service.issue_refresh_token("u1").await.unwrap();

        let (principal, next) = service.rotate_refresh_token(&opaque).await.unwrap();
        assert_eq!(principal, "u1");
        assert_ne!(next, opaque);

        // replay of the consumed token fails
        let replay = service.rotate_refresh_token(&opaque).await;
        assert!(matches!(replay, Err(Error::TokenInvalidSignature)));
    }

    #[tokio::test]
    async fn concurrent_rotation_has_exactly_one_winner() {
        let service = Arc::new(test_service(Arc::new(MemoryStore::new())));
        let opaque = service.issue_refresh_token("u1").await.unwrap();

        let (a, b) = tokio::join!(
            service.rotate_refresh_token(&opaque),
            service.rotate_refresh_token(&opaque),
        );
        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    }

    #[tokio::test]
    async fn discarded_refresh_token_cannot_rotate() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let opaque = service.issue_refresh_token("u1").await.unwrap();

        assert!(service.discard_refresh_token(&opaque).await.unwrap());
        let result = service.rotate_refresh_token(&opaque).await;
        assert!(matches!(result, Err(Error::TokenInvalidSignature)));
    }
}
