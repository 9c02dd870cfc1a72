//! Key Service
//!
//! Serves the public key set and rotates the signing key across instances
//! that share a blob store.

use key_service::config::Config;
use key_service::keys::RsaKeyGenerator;
use key_service::observability::{self, metrics};
use key_service::routes::{self, AppState};
use key_service::service::{self, ProviderSettings};
use key_service::tasks::start_key_rotation;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing();

    info!("Starting Key Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        environment = %config.environment,
        bind_address = %config.bind_address,
        object_key = %config.object_key,
        rotation_interval_seconds = config.rotation_interval.as_secs(),
        lock_ttl_seconds = config.lock_ttl.as_secs(),
        cache_ttl_seconds = config.cache_ttl.as_secs(),
        "Configuration loaded successfully"
    );

    let metrics_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Build the provider once; everything else borrows it.
    let provider = Arc::new(service::build_provider(
        service::blob_store_from_config(&config).await,
        service::oracle_from_config(&config).map_err(|e| {
            error!("Failed to initialize encryption oracle: {}", e);
            e
        })?,
        Arc::new(RsaKeyGenerator),
        &ProviderSettings::from_config(&config),
    ));

    // Warm the cache. Failure is not fatal: the JWKS endpoint answers 503
    // until a later read succeeds.
    match provider.public_jwks().await {
        Ok(jwks) => info!(key_count = jwks.keys.len(), "Signing keys loaded"),
        Err(e) => warn!(error = %e, "Signing keys not available at startup"),
    }

    let cancel_token = CancellationToken::new();
    let rotation_handle = tokio::spawn(start_key_rotation(
        Arc::clone(&provider),
        config.rotation_interval,
        cancel_token.clone(),
    ));

    let state = Arc::new(AppState { provider });
    let app = routes::build_routes(state, Some(metrics_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Key Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.drain_period))
        .await?;

    // Stop rotating; a rotation in progress finishes and releases its lock.
    cancel_token.cancel();
    if let Err(e) = rotation_handle.await {
        error!("Key rotation task ended abnormally: {}", e);
    }

    info!("Key Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if !drain_period.is_zero() {
        warn!("Draining connections for {} seconds...", drain_period.as_secs());
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
