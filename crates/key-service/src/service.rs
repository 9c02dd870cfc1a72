//! Construction of the key provider from configuration.

use crate::cache::KeyCache;
use crate::config::{
    Config, EncryptionSettings, StoreBackend, DEFAULT_CACHE_TTL_SECONDS,
    DEFAULT_LOCK_TTL_SECONDS, DEFAULT_STORAGE_TIMEOUT_SECONDS,
};
use crate::crypto::{EncryptionOracle, HttpEncryptionOracle, KeyMaterialCodec, LocalAeadOracle};
use crate::errors::KsError;
use crate::keys::KeyGenerator;
use crate::lock::DistributedLock;
use crate::provider::JwkProvider;
use crate::storage::{BlobStore, KeyObjectStore, MemoryBlobStore, S3BlobStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunables of the provider stack.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub object_key: String,
    pub cache_ttl: Duration,
    pub lock_ttl: Duration,
    pub storage_timeout: Duration,
}

impl ProviderSettings {
    /// Default TTLs and timeouts for the given bundle object.
    pub fn new(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECONDS),
            storage_timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECONDS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            object_key: config.object_key.clone(),
            cache_ttl: config.cache_ttl,
            lock_ttl: config.lock_ttl,
            storage_timeout: config.storage_timeout,
        }
    }
}

/// Assemble a provider from its collaborators.
///
/// The lock and the key bundle share `blobs`.
pub fn build_provider(
    blobs: Arc<dyn BlobStore>,
    oracle: Arc<dyn EncryptionOracle>,
    generator: Arc<dyn KeyGenerator>,
    settings: &ProviderSettings,
) -> JwkProvider {
    let lock = Arc::new(DistributedLock::new(
        Arc::clone(&blobs),
        settings.storage_timeout,
    ));
    let store = KeyObjectStore::new(
        blobs,
        KeyMaterialCodec::new(oracle, settings.storage_timeout),
        settings.object_key.clone(),
        settings.storage_timeout,
    );
    let cache = KeyCache::new(
        store,
        Arc::clone(&lock),
        Arc::clone(&generator),
        settings.cache_ttl,
        settings.lock_ttl,
    );
    JwkProvider::new(cache, lock, generator, settings.lock_ttl)
}

/// Blob store selected by configuration.
pub async fn blob_store_from_config(config: &Config) -> Arc<dyn BlobStore> {
    match &config.store {
        StoreBackend::S3 {
            bucket,
            region,
            endpoint_url,
        } => {
            info!(
                target: "ks.service",
                bucket = %bucket,
                region = %region,
                custom_endpoint = endpoint_url.is_some(),
                "Using S3 key store"
            );
            Arc::new(S3BlobStore::connect(bucket.clone(), region.clone(), endpoint_url.clone()).await)
        }
        StoreBackend::Memory => {
            info!(target: "ks.service", "Using in-memory key store");
            Arc::new(MemoryBlobStore::new())
        }
    }
}

/// Encryption oracle selected by configuration.
pub fn oracle_from_config(config: &Config) -> Result<Arc<dyn EncryptionOracle>, KsError> {
    match &config.encryption {
        EncryptionSettings::Oracle { url } => {
            info!(target: "ks.service", url = %url, "Using remote encryption oracle");
            Ok(Arc::new(HttpEncryptionOracle::new(url, config.storage_timeout)?))
        }
        EncryptionSettings::LocalKey(key) => {
            info!(target: "ks.service", "Using local AES-256-GCM key encryption");
            Ok(Arc::new(LocalAeadOracle::from_base64(key)?))
        }
    }
}
