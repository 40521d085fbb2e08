//! HTTP API server for showtime ticket reservations.
//!
//! Provides REST endpoints for showtime inventory, ticket purchase and
//! payment resolution, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Catalog, InMemoryCatalog, InMemoryPaymentGateway, ReservationCoordinator};
use store::{InMemoryLedger, InMemoryReservationStore, InventoryLedger, ReservationStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// State backed by the in-memory ledger, reservation store and catalog.
pub type InMemoryState =
    AppState<InMemoryLedger, InMemoryReservationStore<InMemoryLedger>, InMemoryCatalog>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L, R, C>(
    state: Arc<AppState<L, R, C>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<L, R, C>))
        .route("/showtimes", post(routes::showtimes::register::<L, R, C>))
        .route("/showtimes", get(routes::showtimes::list::<L, R, C>))
        .route(
            "/showtimes/{id}/availability",
            get(routes::showtimes::availability::<L, R, C>),
        )
        .route(
            "/showtimes/{id}/purchase",
            post(routes::showtimes::purchase::<L, R, C>),
        )
        .route(
            "/showtimes/{id}/reservations",
            get(routes::showtimes::reservations::<L, R, C>),
        )
        .route("/reservations/{id}", get(routes::reservations::get::<L, R, C>))
        .route(
            "/reservations/{id}/confirm",
            post(routes::reservations::confirm::<L, R, C>),
        )
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<L, R, C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over the given ledger, store and catalog.
///
/// Payments go through the in-memory gateway, settling with the configured
/// outcome.
pub fn create_state<L, R, C>(
    ledger: L,
    store: R,
    catalog: C,
    storage: &'static str,
    config: &Config,
) -> Arc<AppState<L, R, C>>
where
    L: InventoryLedger,
    R: ReservationStore,
    C: Catalog,
{
    let payment = InMemoryPaymentGateway::new();
    payment.set_initial_outcome(config.payment_outcome);

    let coordinator = ReservationCoordinator::with_config(
        ledger,
        store,
        payment,
        catalog,
        config.coordinator_config(),
    );

    Arc::new(AppState {
        coordinator,
        storage,
    })
}

/// Creates the default application state with in-memory storage.
pub fn create_default_state(config: &Config) -> Arc<InMemoryState> {
    let ledger = InMemoryLedger::new();
    let store = InMemoryReservationStore::new(ledger.clone());
    create_state(ledger, store, InMemoryCatalog::new(), "memory", config)
}
