//! Identity-provider client. The three-legged exchange (app token, then
//! user token, then profile) matches the Feishu open platform; any provider
//! with the same shape fits behind [`IdentityProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::SsoConfig;
use crate::{Error, Result};

/// Identity fields the provider reports for a logged-in user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SsoProfile {
    /// App-scoped subject ID, always present
    #[serde(default)]
    pub open_id: String,
    /// Tenant-wide subject ID, present for enterprise accounts
    #[serde(default)]
    pub user_id: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Email, if the provider discloses one
    #[serde(default)]
    pub email: Option<String>,
    /// Corporate email, preferred over `email` when present
    #[serde(default)]
    pub enterprise_email: Option<String>,
    /// Avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Phone number
    #[serde(default)]
    pub mobile: Option<String>,
}

impl SsoProfile {
    /// The stable external ID to key the principal on. The tenant-wide ID
    /// wins when present; the app-scoped one is the fallback.
    #[must_use]
    pub fn external_id(&self) -> &str {
        self.user_id.as_deref().filter(|id| !id.is_empty()).unwrap_or(&self.open_id)
    }

    /// Best available email.
    #[must_use]
    pub fn best_email(&self) -> String {
        self.enterprise_email
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_default()
    }
}

/// The provider-side half of the login flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to authenticate.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String>;

    /// Trade the callback authorization code for a provider user token.
    async fn exchange_code(&self, code: &str) -> Result<String>;

    /// Read the profile behind a provider user token.
    async fn fetch_profile(&self, user_token: &str) -> Result<SsoProfile>;
}

/// HTTP client for the provider's open API.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
}

#[derive(Deserialize)]
struct AppTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    app_access_token: String,
}

#[derive(Deserialize)]
struct UserTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<UserTokenData>,
}

#[derive(Deserialize)]
struct UserTokenData {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfoResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<SsoProfile>,
}

impl HttpIdentityProvider {
    /// Build a provider client from configuration. Secrets resolve their
    /// `env:` indirection here, once.
    pub fn new(config: &SsoConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.resolve_app_secret(),
        })
    }

    /// App-level token, first leg of every exchange.
    async fn app_token(&self) -> Result<String> {
        let response: AppTokenResponse = self
            .client
            .post(format!("{}/auth/v3/app_access_token/internal", self.base_url))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await
            .map_err(map_transport)?
            .json()
            .await
            .map_err(map_transport)?;

        if response.code != 0 {
            return Err(Error::UpstreamUnavailable(format!(
                "app token rejected: {} ({})",
                response.msg, response.code
            )));
        }
        Ok(response.app_access_token)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{}/authen/v1/authorize", self.base_url),
            [
                ("app_id", self.app_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Invalid(format!("bad redirect_uri: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let app_token = self.app_token().await?;
        let response: UserTokenResponse = self
            .client
            .post(format!("{}/authen/v1/oidc/access_token", self.base_url))
            .bearer_auth(app_token)
            .json(&json!({ "grant_type": "authorization_code", "code": code }))
            .send()
            .await
            .map_err(map_transport)?
            .json()
            .await
            .map_err(map_transport)?;

        if response.code != 0 {
            debug!(code = response.code, msg = %response.msg, "code exchange rejected");
            return Err(Error::Invalid("authorization code rejected".to_string()));
        }
        response
            .data
            .map(|d| d.access_token)
            .ok_or_else(|| Error::UpstreamUnavailable("empty token response".to_string()))
    }

    async fn fetch_profile(&self, user_token: &str) -> Result<SsoProfile> {
        let response: UserInfoResponse = self
            .client
            .get(format!("{}/authen/v1/user_info", self.base_url))
            .bearer_auth(user_token)
            .send()
            .await
            .map_err(map_transport)?
            .json()
            .await
            .map_err(map_transport)?;

        if response.code != 0 {
            return Err(Error::UpstreamUnavailable(format!(
                "profile fetch rejected: {} ({})",
                response.msg, response.code
            )));
        }
        response
            .data
            .ok_or_else(|| Error::UpstreamUnavailable("empty profile response".to_string()))
    }
}

/// Connect failures and timeouts are retryable 503s; anything else keeps its
/// original error.
fn map_transport(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::UpstreamUnavailable(e.to_string())
    } else {
        Error::Http(e)
    }
}
