//! Key provider: public keys, the signing key, and rotation under lock.
//!
//! Constructed once at startup and shared by reference. Reads go through
//! the cache only and never touch the lock. Rotation is serialized within
//! the process by a local gate and across processes by [`DistributedLock`].

use crate::cache::KeyCache;
use crate::errors::KsError;
use crate::keys::{JwkSet, KeyEntry, KeyGenerator, KeyRing, DEFAULT_RING_CAPACITY};
use crate::lock::{DistributedLock, LockLease, KEY_ROTATION_JOB};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Result of one rotation attempt.
///
/// Not a `Result`: every outcome is an expected state of the rotation cycle
/// and none of them is propagated further.
#[derive(Debug)]
pub enum RotationOutcome {
    /// This instance rotated and persisted the ring.
    Rotated {
        new_key_id: String,
        retired_key_id: Option<String>,
    },
    /// Another instance holds the rotation lock.
    LockNotAcquired,
    /// A rotation was already running in this process.
    InFlight,
    /// Rotation was attempted and aborted; the persisted ring is unchanged.
    Failed(KsError),
}

impl RotationOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RotationOutcome::Rotated { .. } => "success",
            RotationOutcome::LockNotAcquired | RotationOutcome::InFlight => "skipped",
            RotationOutcome::Failed(_) => "error",
        }
    }
}

pub struct JwkProvider {
    cache: KeyCache,
    lock: Arc<DistributedLock>,
    generator: Arc<dyn KeyGenerator>,
    lock_ttl: Duration,
    rotation_gate: Mutex<()>,
}

impl JwkProvider {
    pub fn new(
        cache: KeyCache,
        lock: Arc<DistributedLock>,
        generator: Arc<dyn KeyGenerator>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            lock,
            generator,
            lock_ttl,
            rotation_gate: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    /// Public key set, newest first.
    pub async fn public_jwks(&self) -> Result<JwkSet, KsError> {
        Ok(self.cache.get_ring().await?.public_jwks())
    }

    /// Key new tokens are signed with.
    pub async fn signing_key(&self) -> Result<KeyEntry, KsError> {
        self.cache
            .get_ring()
            .await?
            .signing_key()
            .cloned()
            .ok_or(KsError::KeysUnavailable)
    }

    /// Look up a key by id, e.g. to verify a token's `kid`.
    pub async fn find_key(&self, kid: &str) -> Result<Option<KeyEntry>, KsError> {
        Ok(self.cache.get_ring().await?.find(kid).cloned())
    }

    /// Attempt one rotation.
    ///
    /// Losing the lock is the common case on all but one instance and is
    /// logged quietly. The lock is released on every path once acquired.
    #[instrument(skip_all, name = "ks.provider.rotate_keys")]
    pub async fn rotate_keys(&self) -> RotationOutcome {
        let Ok(_gate) = self.rotation_gate.try_lock() else {
            debug!(target: "ks.provider", "Rotation already in flight, skipping");
            metrics::record_key_rotation("skipped");
            return RotationOutcome::InFlight;
        };

        let Some(lease) = self.lock.try_acquire(KEY_ROTATION_JOB, self.lock_ttl).await else {
            debug!(target: "ks.provider", "Rotation lock not acquired, skipping this cycle");
            metrics::record_key_rotation("skipped");
            return RotationOutcome::LockNotAcquired;
        };

        let result = self.rotate_locked(&lease).await;
        if !self.lock.release(lease).await {
            warn!(
                target: "ks.provider",
                "Rotation lock not released, other instances wait for it to expire"
            );
        }

        match result {
            Ok((new_key_id, retired_key_id)) => {
                info!(
                    target: "ks.provider",
                    new_key_id = %new_key_id,
                    retired_key_id = ?retired_key_id,
                    "Key rotation completed"
                );
                metrics::record_key_rotation("success");
                metrics::set_key_rotation_last_success(chrono::Utc::now().timestamp() as f64);
                RotationOutcome::Rotated {
                    new_key_id,
                    retired_key_id,
                }
            }
            Err(e) => {
                error!(
                    target: "ks.provider",
                    error = %e,
                    kind = e.kind(),
                    "Key rotation failed, skipped this cycle"
                );
                metrics::record_key_rotation("error");
                RotationOutcome::Failed(e)
            }
        }
    }

    async fn rotate_locked(&self, lease: &LockLease) -> Result<(String, Option<String>), KsError> {
        debug!(
            target: "ks.provider",
            holder_id = %lease.holder_id(),
            "Rotating keys under lock"
        );

        let current = match self.cache.refresh().await? {
            Some(ring) => ring,
            None => Arc::new(KeyRing::from_entries(Vec::new(), DEFAULT_RING_CAPACITY)),
        };

        let generator = Arc::clone(&self.generator);
        let base = Arc::clone(&current);
        let rotated = tokio::task::spawn_blocking(move || base.rotate(generator.as_ref()))
            .await
            .map_err(|e| KsError::Internal(format!("key generation task failed: {}", e)))??;

        // Past this point another instance may hold the lock and write too.
        lease.ensure_held_for(self.cache.store().save_budget())?;
        self.cache.store().save(&rotated).await?;

        let new_key_id = rotated
            .signing_key()
            .map(|k| k.kid().to_string())
            .ok_or_else(|| KsError::Internal("rotated ring is empty".to_string()))?;
        let retained = rotated.kids();
        let retired_key_id = current
            .kids()
            .into_iter()
            .find(|kid| !retained.contains(kid));

        self.cache.replace(rotated).await;
        Ok((new_key_id, retired_key_id))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crypto::{KeyMaterialCodec, LocalAeadOracle};
    use crate::keys::RsaKeyGenerator;
    use crate::storage::{BlobStore, KeyObjectStore, MemoryBlobStore};

    struct BrokenGenerator;

    impl KeyGenerator for BrokenGenerator {
        fn generate(&self) -> Result<KeyEntry, KsError> {
            Err(KsError::KeyGenerationFailure("no entropy".to_string()))
        }
    }

    /// Sleeps before generating, like a starved blocking pool.
    struct SlowGenerator(Duration);

    impl KeyGenerator for SlowGenerator {
        fn generate(&self) -> Result<KeyEntry, KsError> {
            std::thread::sleep(self.0);
            RsaKeyGenerator.generate()
        }
    }

    fn provider_configured(
        blobs: Arc<MemoryBlobStore>,
        generator: Arc<dyn KeyGenerator>,
        lock_ttl: Duration,
        timeout: Duration,
    ) -> JwkProvider {
        let lock = Arc::new(DistributedLock::new(blobs.clone(), timeout));
        let store = KeyObjectStore::new(
            blobs,
            KeyMaterialCodec::new(
                Arc::new(LocalAeadOracle::new(&[6u8; 32]).unwrap()),
                timeout,
            ),
            "encrypted-keys-test.txt".to_string(),
            timeout,
        );
        let cache = KeyCache::new(
            store,
            lock.clone(),
            generator.clone(),
            Duration::from_secs(300),
            lock_ttl,
        );
        JwkProvider::new(cache, lock, generator, lock_ttl)
    }

    fn provider_with(
        blobs: Arc<MemoryBlobStore>,
        generator: Arc<dyn KeyGenerator>,
    ) -> JwkProvider {
        provider_configured(
            blobs,
            generator,
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_public_keys_grow_then_hold_at_capacity() {
        let provider = provider_with(Arc::new(MemoryBlobStore::new()), Arc::new(RsaKeyGenerator));

        let initial = provider.public_jwks().await.unwrap();
        assert_eq!(initial.keys.len(), 1);

        let RotationOutcome::Rotated {
            new_key_id,
            retired_key_id,
        } = provider.rotate_keys().await
        else {
            panic!("first rotation should succeed");
        };
        assert!(retired_key_id.is_none());
        let after_first = provider.public_jwks().await.unwrap();
        assert_eq!(after_first.keys.len(), 2);
        assert_eq!(after_first.keys[0].kid, new_key_id);
        assert_eq!(after_first.keys[1].kid, initial.keys[0].kid);

        let RotationOutcome::Rotated { retired_key_id, .. } = provider.rotate_keys().await else {
            panic!("second rotation should succeed");
        };
        assert_eq!(retired_key_id.as_deref(), Some(initial.keys[0].kid.as_str()));
        let after_second = provider.public_jwks().await.unwrap();
        assert_eq!(after_second.keys.len(), 2);
        assert_eq!(after_second.keys[1].kid, after_first.keys[0].kid);
    }

    #[tokio::test]
    async fn test_signing_key_is_newest() {
        let provider = provider_with(Arc::new(MemoryBlobStore::new()), Arc::new(RsaKeyGenerator));
        provider.public_jwks().await.unwrap();

        let RotationOutcome::Rotated { new_key_id, .. } = provider.rotate_keys().await else {
            panic!("rotation should succeed");
        };
        assert_eq!(provider.signing_key().await.unwrap().kid(), new_key_id);
        assert!(provider.find_key(&new_key_id).await.unwrap().is_some());
        assert!(provider.find_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotation_on_empty_store_creates_first_key() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let provider = provider_with(blobs.clone(), Arc::new(RsaKeyGenerator));

        assert!(matches!(
            provider.rotate_keys().await,
            RotationOutcome::Rotated { retired_key_id: None, .. }
        ));
        assert_eq!(provider.public_jwks().await.unwrap().keys.len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_skipped_when_lock_held() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let provider = provider_with(blobs.clone(), Arc::new(RsaKeyGenerator));
        let before = provider.public_jwks().await.unwrap();

        let other = DistributedLock::new(blobs.clone(), Duration::from_secs(5));
        let lease = other
            .try_acquire(KEY_ROTATION_JOB, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(matches!(
            provider.rotate_keys().await,
            RotationOutcome::LockNotAcquired
        ));
        assert_eq!(provider.public_jwks().await.unwrap(), before);
        assert_eq!(blobs.list("key-rotation-lock-").await.unwrap().len(), 1);

        assert!(other.release(lease).await);
    }

    #[tokio::test]
    async fn test_generation_failure_releases_lock() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let seeding = provider_with(blobs.clone(), Arc::new(RsaKeyGenerator));
        let before = seeding.public_jwks().await.unwrap();

        let provider = provider_with(blobs.clone(), Arc::new(BrokenGenerator));
        let outcome = provider.rotate_keys().await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed(KsError::KeyGenerationFailure(_))
        ));
        assert_eq!(outcome.status(), "error");

        // Lock released and ring unchanged
        assert!(blobs.list("key-rotation-lock-").await.unwrap().is_empty());
        assert_eq!(seeding.cache().refresh().await.unwrap().unwrap().public_jwks(), before);
    }

    #[tokio::test]
    async fn test_rotation_aborts_when_lease_lapses_before_save() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let seeding = provider_with(blobs.clone(), Arc::new(RsaKeyGenerator));
        let before = seeding.public_jwks().await.unwrap();

        let provider = provider_configured(
            blobs.clone(),
            Arc::new(SlowGenerator(Duration::from_millis(800))),
            Duration::from_secs(1),
            Duration::from_millis(200),
        );
        let outcome = provider.rotate_keys().await;
        assert!(
            matches!(outcome, RotationOutcome::Failed(KsError::LeaseExpired(_))),
            "got {:?}",
            outcome
        );

        // Nothing committed: the store and this instance's cache agree
        assert!(blobs.list("key-rotation-lock-").await.unwrap().is_empty());
        assert_eq!(seeding.cache().refresh().await.unwrap().unwrap().public_jwks(), before);
        assert_eq!(provider.public_jwks().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_second_rotation_in_process_is_in_flight() {
        let provider = provider_with(
            Arc::new(MemoryBlobStore::new().with_latency(Duration::from_millis(20))),
            Arc::new(RsaKeyGenerator),
        );
        provider.public_jwks().await.unwrap();

        let (a, b) = tokio::join!(provider.rotate_keys(), provider.rotate_keys());
        let outcomes = [a.status(), b.status()];
        assert!(outcomes.contains(&"success"));
        assert!(outcomes.contains(&"skipped"));
        assert_eq!(provider.public_jwks().await.unwrap().keys.len(), 2);
    }
}
