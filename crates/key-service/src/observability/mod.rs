//! Observability for the key service.
//!
//! Instrumentation uses `#[instrument(skip_all)]` and explicit fields.
//! Key ids, object keys and counts may be logged. Private key material,
//! plaintext bundles, ciphertext and the key encryption key never are.

pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering (default `key_service=info`); set
/// `LOG_FORMAT=json` for structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "key_service=info,ks=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
