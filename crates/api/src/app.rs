use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, trace_id, RateLimiterState,
};
use crate::routes::{health, trips, ws};
use crate::services::dispatch::{DispatchConfig, DispatchController, PgDispatchStore};
use crate::services::events::DispatchEventBridge;
use crate::services::lifecycle::TripLifecycle;
use crate::services::notify::{Notifier, PersistingNotifier};
use crate::services::presence::PresenceHub;
use crate::services::spatial::{DriverIndex, SpatialIndex};
use domain::services::DispatchEvents;
use shared::jwt::JwtConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
    /// Live driver connections.
    pub hub: Arc<PresenceHub>,
    /// Trip state transitions and queries.
    pub lifecycle: Arc<TripLifecycle>,
    /// Broadcast state machine for dispatcher trips.
    pub dispatcher: Arc<DispatchController>,
    /// Seam the socket layer reports driver replies through.
    pub events: Arc<dyn DispatchEvents>,
    /// Dispatcher notification sink.
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
}

/// Wire the component graph once: spatial index and store feed the
/// dispatch controller, the presence hub carries its offers, and the
/// event bridge closes the loop from driver replies back to dispatch.
pub fn build_state(config: Config, pool: PgPool) -> AppState {
    let config = Arc::new(config);

    let jwt = Arc::new(JwtConfig::from_secrets(
        &config.jwt.access_secret,
        &config.jwt.refresh_secret,
        config.jwt.access_expiry_secs().unwrap_or(900),
        config.jwt.refresh_expiry_secs().unwrap_or(604_800),
    ));

    let hub = Arc::new(PresenceHub::new());
    let notifier: Arc<dyn Notifier> = Arc::new(PersistingNotifier::new(pool.clone()));
    let index: Arc<dyn SpatialIndex> = Arc::new(DriverIndex::new(pool.clone(), &config.dispatch));
    let store = Arc::new(PgDispatchStore::new(pool.clone()));

    let dispatcher = DispatchController::new(
        index,
        hub.clone(),
        store,
        notifier.clone(),
        DispatchConfig::from_policy(&config.dispatch),
    );

    let lifecycle = Arc::new(TripLifecycle::new(
        pool.clone(),
        hub.clone(),
        notifier.clone(),
        config.dispatch.fare,
    ));

    let events: Arc<dyn DispatchEvents> = Arc::new(DispatchEventBridge::new(
        lifecycle.clone(),
        dispatcher.clone(),
    ));

    let rate_limiter = if config.security.rate_limit_per_minute > 0 {
        Some(Arc::new(RateLimiterState::new(
            config.security.rate_limit_per_minute,
        )))
    } else {
        None
    };

    AppState {
        pool,
        config,
        jwt,
        hub,
        lifecycle,
        dispatcher,
        events,
        notifier,
        rate_limiter,
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty()
        || config.security.cors_origins.iter().any(|o| o == "*")
    {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Driver-facing trip routes (bearer-authenticated via extractors)
    let trip_routes = Router::new()
        .route("/api/v1/trips", post(trips::create_driver_trip))
        .route("/api/v1/trips/active", get(trips::get_active_trip))
        .route("/api/v1/trips/history", get(trips::get_trip_history))
        .route("/api/v1/trips/statistics", get(trips::get_trip_statistics))
        .route("/api/v1/trips/:id", get(trips::get_trip))
        .route("/api/v1/trips/:id/start", put(trips::start_trip))
        .route("/api/v1/trips/:id/cancel", put(trips::cancel_trip))
        .route("/api/v1/trips/:id/complete", put(trips::complete_trip));

    // Dispatcher trip creation, rate limited per IP
    let dispatcher_routes = Router::new()
        .route(
            "/api/v1/trips/dispatcher",
            post(trips::create_dispatcher_trip),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    // Driver socket channel
    let socket_routes = Router::new().route("/ws/drivers", get(ws::driver_socket));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    // Global middleware (order matters: bottom layers run first)
    Router::new()
        .merge(public_routes)
        .merge(trip_routes)
        .merge(dispatcher_routes)
        .merge(socket_routes)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
