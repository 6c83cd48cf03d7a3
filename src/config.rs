//! Configuration management

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Token signing and lifetime configuration
    pub jwt: JwtConfig,
    /// SSO identity-provider configuration
    pub sso: SsoConfig,
    /// Allowed CORS origins for browser clients
    pub cors_origins: Vec<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Token signing and lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing algorithm, `RS256` (default) or `ES256`. Fixed system-wide;
    /// every downstream verifier must use the same value.
    pub algorithm: String,
    /// Access token lifetime in seconds (default 1 hour)
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds (default 7 days)
    pub refresh_ttl_secs: u64,
    /// System credential lifetime in days (default 365)
    pub system_ttl_days: u64,
    /// Path to the PEM private key
    pub private_key_path: String,
    /// Path to the PEM public key
    pub public_key_path: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 7 * 24 * 3600,
            system_ttl_days: 365,
            private_key_path: "./keys/private_key.pem".to_string(),
            public_key_path: "./keys/public_key.pem".to_string(),
        }
    }
}

/// SSO identity-provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Application ID registered with the provider
    pub app_id: String,
    /// Application secret. Supports `env:VAR_NAME` indirection so the
    /// literal secret never has to live in the config file.
    pub app_secret: String,
    /// One-time anti-CSRF state lifetime in seconds (default 5 minutes)
    pub state_ttl_secs: u64,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.feishu.cn/open-apis".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            state_ttl_secs: 300,
        }
    }
}

impl SsoConfig {
    /// Resolve the app secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_app_secret(&self) -> String {
        if let Some(var) = self.app_secret.strip_prefix("env:") {
            std::env::var(var).unwrap_or_default()
        } else {
            self.app_secret.clone()
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `AUTHHUB_`
    /// environment variables (env wins, `__` separates nesting levels).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if !Path::new(path).exists() {
                return Err(Error::Config(format!("config file not found: {path}")));
            }
            figment = figment.merge(Yaml::file(path));
        } else if Path::new("authhub.yaml").exists() {
            figment = figment.merge(Yaml::file("authhub.yaml"));
        }

        figment
            .merge(Env::prefixed("AUTHHUB_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
