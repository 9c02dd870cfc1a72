//! Builder for providers wired to test collaborators.

use crate::crypto_fixtures::{test_oracle, TEST_OBJECT_KEY};
use key_service::crypto::EncryptionOracle;
use key_service::keys::{KeyGenerator, RsaKeyGenerator};
use key_service::provider::JwkProvider;
use key_service::service::{build_provider, ProviderSettings};
use key_service::storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;

/// Builds a [`JwkProvider`] over a caller-supplied blob store.
///
/// Several providers built over the same store behave like separate
/// service instances sharing one bucket.
///
/// # Example
/// ```rust,ignore
/// let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
/// let a = TestProviderBuilder::new(Arc::clone(&blobs)).build();
/// let b = TestProviderBuilder::new(blobs).cache_ttl(Duration::ZERO).build();
/// ```
pub struct TestProviderBuilder {
    blobs: Arc<dyn BlobStore>,
    oracle: Arc<dyn EncryptionOracle>,
    generator: Arc<dyn KeyGenerator>,
    settings: ProviderSettings,
}

impl TestProviderBuilder {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        let mut settings = ProviderSettings::new(TEST_OBJECT_KEY);
        settings.storage_timeout = Duration::from_secs(5);
        Self {
            blobs,
            oracle: test_oracle(1),
            generator: Arc::new(RsaKeyGenerator),
            settings,
        }
    }

    pub fn oracle(mut self, oracle: Arc<dyn EncryptionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.settings.cache_ttl = ttl;
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.settings.lock_ttl = ttl;
        self
    }

    pub fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.settings.storage_timeout = timeout;
        self
    }

    pub fn object_key(mut self, key: impl Into<String>) -> Self {
        self.settings.object_key = key.into();
        self
    }

    pub fn build(self) -> JwkProvider {
        build_provider(self.blobs, self.oracle, self.generator, &self.settings)
    }
}
