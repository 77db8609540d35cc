//! HTTP API for the storefront order core.
//!
//! Exposes checkout, payment callbacks, order lookups and stock
//! administration over the order service, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{OrderService, PaymentGateway};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::admin::AdminToken;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G> {
    pub orders: Arc<OrderService<S, G>>,
    /// Direct store access for catalog administration.
    pub store: S,
    pub admin_token: AdminToken,
}

impl<S, G> AppState<S, G> {
    pub fn new(orders: Arc<OrderService<S, G>>, store: S, admin_token: Option<String>) -> Self {
        Self {
            orders,
            store,
            admin_token: AdminToken(admin_token.map(Arc::from)),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    let admin_router = Router::new()
        .route("/admin/products", post(routes::admin::upsert_product::<S, G>))
        .route("/admin/inventory", post(routes::admin::register_variant::<S, G>))
        .route(
            "/admin/inventory/{product_id}",
            get(routes::admin::list_variants::<S, G>),
        )
        .route(
            "/admin/inventory/{product_id}/{size}/restock",
            post(routes::admin::restock::<S, G>),
        )
        .route(
            "/admin/inventory/{product_id}/{size}/write-off",
            post(routes::admin::write_off::<S, G>),
        )
        .route(
            "/admin/reconciliations",
            get(routes::admin::list_reconciliations::<S, G>),
        )
        .route(
            "/admin/reconciliations/{id}/resolve",
            post(routes::admin::resolve_reconciliation::<S, G>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.admin_token.clone(),
            routes::admin::require_token,
        ))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S, G>))
        .route("/payments/callback", post(routes::payments::callback::<S, G>))
        .route("/orders/{id}", get(routes::orders::get::<S, G>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, G>))
        .route("/users/{id}/orders", get(routes::orders::list_for_user::<S, G>))
        .route(
            "/inventory/{product_id}/{size}",
            get(routes::inventory::availability::<S, G>),
        )
        .with_state(state)
        .merge(admin_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
