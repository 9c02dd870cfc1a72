//! Health check handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub keys_loaded: bool,
    pub key_count: usize,
}

/// Health check handler.
///
/// Reports whether a key ring is cached. Never touches the store, so a
/// degraded store does not fail the health check while a ring is still served.
///
/// ```json
/// { "status": "healthy", "keys_loaded": true, "key_count": 2 }
/// ```
#[instrument(skip_all, name = "ks.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let key_count = state
        .provider
        .cache()
        .peek()
        .await
        .map_or(0, |ring| ring.len());

    let status = if key_count > 0 { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        keys_loaded: key_count > 0,
        key_count,
    })
}
