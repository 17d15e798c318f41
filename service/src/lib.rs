mod auth;
mod error;
mod handlers;
mod middleware;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use abi::{Config, Error, RateLimitConfig, StorageBackend};
use axum::routing::{get, post};
use axum::Router;
use reservation::{
    InMemoryChat, InMemoryNotifier, InMemoryStore, PgChat, PgNotifier, PgStore, PushClient,
    RateLimiter, ReservationManager, SideEffectOrchestrator, StaticCatalog,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{Caller, IdentityVerifier, StaticTokenVerifier};
pub use error::ApiError;
pub use middleware::client_ip;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct RsvpService {
    manager: ReservationManager,
    effects: SideEffectOrchestrator,
    limiter: RateLimiter,
    rate_limit: Arc<RateLimitConfig>,
    verifier: Arc<dyn IdentityVerifier>,
    trusted_proxies: Arc<Vec<IpAddr>>,
}

impl RsvpService {
    pub fn new(
        manager: ReservationManager,
        effects: SideEffectOrchestrator,
        limiter: RateLimiter,
        rate_limit: RateLimitConfig,
        verifier: impl IdentityVerifier,
    ) -> Self {
        Self {
            manager,
            effects,
            limiter,
            rate_limit: Arc::new(rate_limit),
            verifier: Arc::new(verifier),
            trusted_proxies: Arc::new(Vec::new()),
        }
    }

    /// Peers whose forwarding headers name the real client.
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.trusted_proxies = Arc::new(proxies.into_iter().collect());
        self
    }

    /// Wire up the configured storage backend and its collaborators.
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        let lock_timeout = config.admission.lock_timeout();
        let effect_timeout = config.effects.timeout();

        let (manager, effects) = match config.storage {
            StorageBackend::Memory => {
                let catalog = StaticCatalog::from_config(&config.resources);
                let manager = ReservationManager::new(InMemoryStore::new(), catalog, lock_timeout);
                let effects = SideEffectOrchestrator::new(
                    InMemoryChat::new(),
                    InMemoryNotifier::new(),
                    effect_timeout,
                );
                (manager, effects)
            }
            StorageBackend::Postgres => {
                let pool = PgPoolOptions::default()
                    .max_connections(config.db.max_connections)
                    .connect(&config.db.url())
                    .await?;
                let store = PgStore::new(pool.clone());
                let manager = ReservationManager::new(store.clone(), store, lock_timeout);
                let push = PushClient::new(
                    config.effects.push_url.clone(),
                    config.effects.push_access_token.clone(),
                );
                let effects = SideEffectOrchestrator::new(
                    PgChat::new(pool.clone()),
                    PgNotifier::new(pool, Some(push)),
                    effect_timeout,
                );
                (manager, effects)
            }
        };

        Ok(Self::new(
            manager,
            effects,
            RateLimiter::in_memory(),
            config.rate_limit.resolve(),
            StaticTokenVerifier::new(config.auth.tokens.clone()),
        )
        .with_trusted_proxies(config.server.trusted_proxies.iter().copied()))
    }

    pub fn manager(&self) -> &ReservationManager {
        &self.manager
    }
}

pub fn build_router(state: RsvpService) -> Router {
    let reservations = Router::new()
        .route("/reservations", post(handlers::reserve))
        .route("/reservations/:id", get(handlers::get_reservation))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(reservations)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: &Config) -> Result<(), anyhow::Error> {
    let addr = config.server.addr();
    let state = RsvpService::from_config(config).await?;
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, backend = ?config.storage, "listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
