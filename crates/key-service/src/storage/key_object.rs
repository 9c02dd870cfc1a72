//! Encrypted key bundle persistence.
//!
//! The whole ring is stored as one object: the JSON bundle
//! `{"keys": [<private JWK>...], "updatedAt": <unix millis>}`, newest key
//! first, encrypted by the codec.

use super::blob::BlobStore;
use crate::crypto::KeyMaterialCodec;
use crate::errors::KsError;
use crate::keys::{KeyEntry, KeyRing, PrivateJwk, DEFAULT_RING_CAPACITY};
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBundle {
    keys: Vec<PrivateJwk>,
    #[serde(default)]
    updated_at: i64,
}

#[derive(Clone)]
pub struct KeyObjectStore {
    blobs: Arc<dyn BlobStore>,
    codec: KeyMaterialCodec,
    object_key: String,
    timeout: Duration,
}

impl KeyObjectStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        codec: KeyMaterialCodec,
        object_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            codec,
            object_key,
            timeout,
        }
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Longest time `save` can take before its calls time out.
    pub fn save_budget(&self) -> Duration {
        self.codec.timeout() + self.timeout
    }

    /// Read and decrypt the persisted ring.
    ///
    /// `Ok(None)` means nothing has been persisted yet (or the bundle holds
    /// no keys).
    #[instrument(skip_all, fields(object_key = %self.object_key))]
    pub async fn load(&self) -> Result<Option<KeyRing>, KsError> {
        let body = self
            .bounded("get", async {
                self.blobs
                    .get(&self.object_key)
                    .await
                    .map_err(|e| KsError::StoreUnavailable(e.to_string()))
            })
            .await?;

        let Some(body) = body else {
            debug!(target: "ks.storage.key_object", "Key bundle not found");
            return Ok(None);
        };

        let ciphertext = std::str::from_utf8(&body).map_err(|e| {
            KsError::DecryptionFailure(format!("stored bundle is not text: {}", e))
        })?;
        let plaintext = self.codec.decrypt(ciphertext).await?;

        let bundle: KeyBundle = serde_json::from_str(plaintext.expose_secret())
            .map_err(|e| KsError::DecryptionFailure(format!("malformed key bundle: {}", e)))?;

        if bundle.keys.is_empty() {
            debug!(target: "ks.storage.key_object", "Key bundle holds no keys");
            return Ok(None);
        }

        let entries = bundle
            .keys
            .iter()
            .map(KeyEntry::from_private_jwk)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            target: "ks.storage.key_object",
            key_count = entries.len(),
            updated_at = bundle.updated_at,
            "Key bundle loaded"
        );

        Ok(Some(KeyRing::from_entries(entries, DEFAULT_RING_CAPACITY)))
    }

    /// Encrypt and overwrite the persisted ring.
    ///
    /// Callers must hold the rotation lock.
    #[instrument(skip_all, fields(object_key = %self.object_key, key_count = ring.len()))]
    pub async fn save(&self, ring: &KeyRing) -> Result<(), KsError> {
        let bundle = KeyBundle {
            keys: ring
                .entries()
                .iter()
                .map(KeyEntry::to_private_jwk)
                .collect::<Result<Vec<_>, _>>()?,
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        let plaintext = SecretString::from(
            serde_json::to_string(&bundle)
                .map_err(|e| KsError::Internal(format!("bundle serialization failed: {}", e)))?,
        );

        let ciphertext = self.codec.encrypt(&plaintext).await?;

        self.bounded("put", async {
            self.blobs
                .put(&self.object_key, Bytes::from(ciphertext), None)
                .await
                .map_err(|e| KsError::StoreUnavailable(e.to_string()))
        })
        .await?;

        info!(
            target: "ks.storage.key_object",
            kids = ?ring.kids(),
            "Key bundle saved"
        );
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, KsError>>,
    ) -> Result<T, KsError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| KsError::Timeout(format!("key store {} after {:?}", operation, self.timeout)))?
    }
}
