//! Shared test harness: a fully wired broker over in-memory backends and a
//! stub identity provider, plus small HTTP helpers.

// each integration test binary compiles this module on its own and uses a
// different subset of it
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use authhub::config::JwtConfig;
use authhub::keys::KeyStore;
use authhub::notify::{ChangeNotifier, MemoryBus};
use authhub::principal::PrincipalService;
use authhub::rbac::{PermissionCollector, RbacService};
use authhub::repo::MemoryRepository;
use authhub::server::{AppState, create_router};
use authhub::sso::{IdentityProvider, SsoProfile, StateStore};
use authhub::store::MemoryStore;
use authhub::sync::ConfigSyncService;
use authhub::system::SystemService;
use authhub::token::TokenService;
use authhub::{Error, Result};

/// Accepts exactly one authorization code and returns a fixed profile.
pub struct StubProvider;

pub const GOOD_CODE: &str = "good-code";

#[async_trait]
impl IdentityProvider for StubProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        Ok(format!(
            "https://idp.test/authorize?redirect_uri={redirect_uri}&state={state}"
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        if code == GOOD_CODE {
            Ok("provider-user-token".to_string())
        } else {
            Err(Error::Invalid("authorization code rejected".to_string()))
        }
    }

    async fn fetch_profile(&self, _user_token: &str) -> Result<SsoProfile> {
        Ok(SsoProfile {
            open_id: "ou_alice".to_string(),
            user_id: Some("alice".to_string()),
            name: "Alice".to_string(),
            email: Some("alice@example.com".to_string()),
            ..SsoProfile::default()
        })
    }
}

/// Everything a test needs to drive the broker end to end.
pub struct Harness {
    pub router: Router,
    pub repo: Arc<MemoryRepository>,
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<TokenService>,
    pub rbac: RbacService,
    pub systems: Arc<SystemService>,
    pub bus: Arc<MemoryBus>,
}

pub fn harness() -> Harness {
    let (private_pem, public_pem) = KeyStore::generate_p256().unwrap();
    let keys = Arc::new(KeyStore::from_pem(&private_pem, &public_pem, "ES256").unwrap());
    let jwt = JwtConfig {
        algorithm: "ES256".to_string(),
        ..JwtConfig::default()
    };

    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryBus::new());
    let repo = Arc::new(MemoryRepository::new());

    let tokens = Arc::new(TokenService::new(keys.clone(), store.clone(), &jwt));
    let notifier = Arc::new(ChangeNotifier::new(bus.clone(), store.clone()));
    let collector = Arc::new(PermissionCollector::new(repo.clone()));
    let principals = Arc::new(PrincipalService::new(repo.clone()));
    let systems = Arc::new(SystemService::new(
        repo.clone(),
        tokens.clone(),
        notifier.clone(),
        365,
    ));
    let sync = Arc::new(ConfigSyncService::new(repo.clone()));
    let states = Arc::new(StateStore::new(store.clone(), Duration::from_secs(300)));

    let state = Arc::new(AppState {
        keys,
        tokens: tokens.clone(),
        collector,
        principals,
        systems: systems.clone(),
        sync,
        provider: Arc::new(StubProvider),
        states,
        notifier: notifier.clone(),
        cors_origins: Vec::new(),
    });

    let rbac = RbacService::new(repo.clone(), notifier);
    Harness {
        router: create_router(state),
        repo,
        store,
        tokens,
        rbac,
        systems,
        bus,
    }
}

impl Harness {
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get_with_header(&self, uri: &str, name: &str, value: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(name, value)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post_json_auth(&self, uri: &str, bearer: &str, body: &Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Drive the whole login flow through the router, returning the token
    /// pair response body.
    pub async fn login(&self) -> Value {
        let response = self.get("/auth/login?redirect_uri=https://app.test/cb").await;
        assert_eq!(response.status(), StatusCode::OK);
        let login = json_body(response).await;
        let state = login["state"].as_str().unwrap().to_string();

        let response = self
            .get(&format!("/auth/callback?code={GOOD_CODE}&state={state}"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
