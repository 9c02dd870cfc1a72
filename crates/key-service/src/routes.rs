//! HTTP routes for the key service.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::provider::JwkProvider;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Per-request deadline for every route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Key provider, built once at startup.
    pub provider: Arc<JwkProvider>,
}

/// Build the application routes.
///
/// - `/.well-known/jwks.json` - public key set
/// - `/health` - liveness/readiness check
/// - `/metrics` - Prometheus scrape endpoint, when a recorder is installed
pub fn build_routes(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        // JWKS endpoint (well-known path, no /api/v1 prefix)
        .route("/.well-known/jwks.json", get(handlers::handle_get_jwks))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics_handler))
                .with_state(handle),
        );
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
    )
}
