//! Server assembly: wires keys, stores, services, and the HTTP router, then
//! runs until SIGINT/SIGTERM.

mod router;

pub use router::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::keys::KeyStore;
use crate::notify::{ChangeNotifier, MemoryBus};
use crate::principal::PrincipalService;
use crate::rbac::PermissionCollector;
use crate::repo::MemoryRepository;
use crate::sso::{HttpIdentityProvider, StateStore};
use crate::store::MemoryStore;
use crate::sync::ConfigSyncService;
use crate::system::SystemService;
use crate::token::TokenService;
use crate::{Error, Result};

/// The assembled broker server.
pub struct AuthServer {
    config: Config,
    state: Arc<AppState>,
}

impl AuthServer {
    /// Wire every collaborator from configuration. Fails fast on bad keys or
    /// bad provider config; nothing network-facing happens yet.
    pub fn new(config: Config) -> Result<Self> {
        let keys = Arc::new(KeyStore::load(
            &config.jwt.private_key_path,
            &config.jwt.public_key_path,
            &config.jwt.algorithm,
        )?);
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());

        let tokens = Arc::new(TokenService::new(keys.clone(), store.clone(), &config.jwt));
        let notifier = Arc::new(ChangeNotifier::new(bus, store.clone()));
        let collector = Arc::new(PermissionCollector::new(repo.clone()));
        let principals = Arc::new(PrincipalService::new(repo.clone()));
        let systems = Arc::new(SystemService::new(
            repo.clone(),
            tokens.clone(),
            notifier.clone(),
            config.jwt.system_ttl_days,
        ));
        let sync = Arc::new(ConfigSyncService::new(repo));
        let provider = Arc::new(HttpIdentityProvider::new(&config.sso)?);
        let states = Arc::new(StateStore::new(
            store,
            Duration::from_secs(config.sso.state_ttl_secs),
        ));

        let state = Arc::new(AppState {
            keys,
            tokens,
            collector,
            principals,
            systems,
            sync,
            provider,
            states,
            notifier,
            cors_origins: config.cors_origins.clone(),
        });

        Ok(Self { config, state })
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(self.state.clone());
        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            algorithm = self.state.keys.algorithm_name(),
            "AuthHub listening"
        );
        if self.config.sso.app_id.is_empty() {
            warn!("SSO app_id is empty; login endpoints will fail until configured");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("shutdown complete");
        Ok(())
    }
}

/// Resolves when SIGINT or (on unix) SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
