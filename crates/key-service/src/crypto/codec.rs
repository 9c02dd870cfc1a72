use super::oracle::EncryptionOracle;
use crate::errors::KsError;
use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Encrypts and decrypts serialized key rings through an oracle, with every
/// call bounded by a deadline.
#[derive(Clone)]
pub struct KeyMaterialCodec {
    oracle: Arc<dyn EncryptionOracle>,
    timeout: Duration,
}

impl KeyMaterialCodec {
    pub fn new(oracle: Arc<dyn EncryptionOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Deadline applied to each oracle call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip_all)]
    pub async fn encrypt(&self, plaintext: &SecretString) -> Result<String, KsError> {
        self.bounded("encrypt", self.oracle.encrypt(plaintext)).await
    }

    #[instrument(skip_all)]
    pub async fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KsError> {
        self.bounded("decrypt", self.oracle.decrypt(ciphertext)).await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, KsError>>,
    ) -> Result<T, KsError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(
                    target: "ks.crypto.codec",
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Encryption oracle call timed out"
                );
                KsError::Timeout(format!("oracle {} after {:?}", operation, self.timeout))
            })?
    }
}
