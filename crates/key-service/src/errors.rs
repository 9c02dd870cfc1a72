use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised along the key lifecycle paths.
///
/// Losing the rotation lock is not an error; see
/// [`crate::provider::RotationOutcome::LockNotAcquired`].
#[derive(Debug, Error)]
pub enum KsError {
    #[error("Key store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Encryption oracle unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("Key material could not be decrypted: {0}")]
    DecryptionFailure(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailure(String),

    /// No key ring has ever been loaded by this process.
    #[error("Signing keys are not available")]
    KeysUnavailable,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The rotation lock could no longer be trusted when a write was due.
    #[error("Lock lease expired before the write: {0}")]
    LeaseExpired(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KsError {
    /// Bounded label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            KsError::StoreUnavailable(_) => "store_unavailable",
            KsError::EncryptionUnavailable(_) => "encryption_unavailable",
            KsError::DecryptionFailure(_) => "decryption_failure",
            KsError::KeyGenerationFailure(_) => "key_generation_failure",
            KsError::KeysUnavailable => "keys_unavailable",
            KsError::Timeout(_) => "timeout",
            KsError::LeaseExpired(_) => "lease_expired",
            KsError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for KsError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            KsError::KeysUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "KEYS_UNAVAILABLE",
                "Signing keys are not available yet",
            ),
            KsError::StoreUnavailable(_)
            | KsError::EncryptionUnavailable(_)
            | KsError::Timeout(_)
            | KsError::LeaseExpired(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "A backing service is unavailable",
            ),
            KsError::DecryptionFailure(_)
            | KsError::KeyGenerationFailure(_)
            | KsError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
        };

        // Details stay in the logs; the body only carries the code.
        tracing::debug!(target: "ks.errors", error = %self, code, "Request failed");

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
