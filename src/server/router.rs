//! HTTP router and handlers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::keys::KeyStore;
use crate::notify::ChangeNotifier;
use crate::principal::PrincipalService;
use crate::rbac::PermissionCollector;
use crate::sso::{IdentityProvider, StateStore};
use crate::sync::{ConfigPayload, ConfigSyncService};
use crate::system::SystemService;
use crate::token::{SubjectKind, TokenService};
use crate::{Error, Result};

const SYSTEM_TOKEN_HEADER: &str = "x-system-token";

/// Shared application state
pub struct AppState {
    /// Signing keypair
    pub keys: Arc<KeyStore>,
    /// Token issuance and verification
    pub tokens: Arc<TokenService>,
    /// Permission aggregation
    pub collector: Arc<PermissionCollector>,
    /// Principal mirroring
    pub principals: Arc<PrincipalService>,
    /// Downstream system registry
    pub systems: Arc<SystemService>,
    /// Config payload assembly
    pub sync: Arc<ConfigSyncService>,
    /// Identity provider client
    pub provider: Arc<dyn IdentityProvider>,
    /// One-time login states
    pub states: Arc<StateStore>,
    /// Change notification fan-out
    pub notifier: Arc<ChangeNotifier>,
    /// Allowed CORS origins; empty means permissive
    pub cors_origins: Vec<String>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/auth/public-key", get(public_key_handler))
        .route("/systems/{code}/config", get(system_config_handler))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Error::TokenInvalidSignature)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct LoginQuery {
    redirect_uri: String,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Json<Value>> {
    let login_state = state.states.create(&query.redirect_uri).await?;
    let authorize_url = state
        .provider
        .authorize_url(&query.redirect_uri, &login_state)?;
    Ok(Json(
        json!({ "authorize_url": authorize_url, "state": login_state }),
    ))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

/// Token pair response shared by callback and refresh.
#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
    refresh_token: String,
}

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<TokenResponse>> {
    // the state check comes first: no provider round-trip for a forged
    // or replayed callback
    let redirect_uri = state.states.consume(&query.state).await?;
    tracing::debug!(redirect_uri = %redirect_uri, "login state consumed");

    let user_token = state.provider.exchange_code(&query.code).await?;
    let profile = state.provider.fetch_profile(&user_token).await?;
    let principal = state.principals.sync_from_sso(&profile).await?;

    let snapshot = state.collector.collect(&principal.id).await?;
    let issued = state.tokens.issue_access_token(&principal, snapshot)?;
    let refresh_token = state.tokens.issue_refresh_token(&principal.id).await?;
    info!(principal = %principal.id, "login completed");

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "Bearer",
        expires_in: state.tokens.access_ttl().as_secs(),
        refresh_token,
    }))
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>> {
    let (principal_id, next_refresh) = state
        .tokens
        .rotate_refresh_token(&request.refresh_token)
        .await?;
    let principal = state.principals.get(&principal_id).await?;

    // permissions are re-collected so a refreshed token reflects changes
    // made since the last one
    let snapshot = state.collector.collect(&principal.id).await?;
    let issued = state.tokens.issue_access_token(&principal, snapshot)?;

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "Bearer",
        expires_in: state.tokens.access_ttl().as_secs(),
        refresh_token: next_refresh,
    }))
}

#[derive(Deserialize, Default)]
struct LogoutRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<Value>> {
    let claims = state.tokens.verify(bearer_token(&headers)?).await?;

    let remaining =
        u64::try_from(claims.exp - chrono::Utc::now().timestamp()).unwrap_or_default();
    state
        .notifier
        .token_revoked(&claims.jti, std::time::Duration::from_secs(remaining))
        .await?;

    if let Some(Json(LogoutRequest {
        refresh_token: Some(ref opaque),
    })) = body
    {
        state.tokens.discard_refresh_token(opaque).await?;
    }
    info!(principal = %claims.sub, "logged out");
    Ok(Json(json!({ "message": "logged out" })))
}

async fn me_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let claims = state
        .tokens
        .verify_kind(bearer_token(&headers)?, SubjectKind::User)
        .await?;
    Ok(Json(serde_json::to_value(claims)?))
}

async fn public_key_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "public_key": state.keys.public_pem(),
        "algorithm": state.keys.algorithm_name(),
    }))
}

async fn system_config_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConfigPayload>> {
    let token = headers
        .get(SYSTEM_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::TokenInvalidSignature)?;

    let claims = state.tokens.verify_kind(token, SubjectKind::System).await?;
    // a valid system token for a different system is still a mismatch
    if claims.sub != code {
        return Err(Error::TokenTypeMismatch {
            expected: code,
            actual: claims.sub,
        });
    }

    let system = state.systems.get(&code).await?;
    let payload = state.sync.build_config(&system).await?;
    Ok(Json(payload))
}
