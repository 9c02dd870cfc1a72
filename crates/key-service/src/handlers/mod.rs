pub mod health;
pub mod jwks;
pub mod metrics;

pub use health::health_check;
pub use jwks::handle_get_jwks;
pub use metrics::metrics_handler;
