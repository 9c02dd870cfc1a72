//! Metrics definitions for the key service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ks_` prefix for Key Service
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `status`: success, error, skipped (rotation), success/error/stale (cache)
//! - `outcome`: acquired, lost, error (lock attempts)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Rotation Metrics
// ============================================================================

/// Metric: `ks_key_rotation_total`
/// Labels: `status`
pub fn record_key_rotation(status: &str) {
    counter!("ks_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Metric: `ks_key_rotation_last_success_timestamp`
pub fn set_key_rotation_last_success(timestamp_secs: f64) {
    gauge!("ks_key_rotation_last_success_timestamp").set(timestamp_secs);
}

/// Metric: `ks_lock_attempts_total`
/// Labels: `outcome`
pub fn record_lock_attempt(outcome: &str) {
    counter!("ks_lock_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Metric: `ks_cache_reloads_total`
/// Labels: `status`
pub fn record_cache_reload(status: &str) {
    counter!("ks_cache_reloads_total", "status" => status.to_string()).increment(1);
}

/// Number of keys in the ring currently served.
///
/// Metric: `ks_signing_keys`
pub fn set_signing_keys(count: usize) {
    gauge!("ks_signing_keys").set(count as f64);
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Metric: `ks_jwks_requests_total`
/// Labels: `status`
pub fn record_jwks_request(status: &str) {
    counter!("ks_jwks_requests_total", "status" => status.to_string()).increment(1);
}
