use crate::errors::KsError;
use crate::keys::JwkSet;
use crate::observability::metrics::record_jwks_request;
use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns the public half of every key in the ring, newest first, in JWKS
/// format (RFC 7517). Clients may cache the response for as long as this
/// instance caches the ring.
#[instrument(name = "ks.jwks.get", skip_all, fields(status))]
pub async fn handle_get_jwks(
    State(state): State<Arc<AppState>>,
) -> Result<(HeaderMap, Json<JwkSet>), KsError> {
    let result = state.provider.public_jwks().await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_jwks_request(status);

    // Reads fail closed without exposing why the ring is missing.
    let jwks = result.map_err(|e| {
        tracing::warn!(target: "ks.jwks", kind = e.kind(), "No key ring available for JWKS");
        KsError::KeysUnavailable
    })?;

    let mut headers = HeaderMap::new();
    let max_age = format!("max-age={}", state.provider.cache().ttl().as_secs());
    if let Ok(value) = HeaderValue::from_str(&max_age) {
        headers.insert(CACHE_CONTROL, value);
    }

    Ok((headers, Json(jwks)))
}
