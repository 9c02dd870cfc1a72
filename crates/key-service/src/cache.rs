//! TTL-bounded in-process copy of the key ring.
//!
//! Reads are served from memory until the entry expires, then one caller
//! reloads from the key store while the others wait for its result. If the
//! reload fails, the previous ring keeps being served. There is no
//! cross-instance invalidation: a rotation committed by another instance
//! becomes visible here within one TTL.

use crate::errors::KsError;
use crate::keys::{KeyGenerator, KeyRing};
use crate::lock::{DistributedLock, LockLease, KEY_ROTATION_JOB};
use crate::observability::metrics;
use crate::storage::KeyObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Pause between bootstrap attempts while another instance holds the lock.
const BOOTSTRAP_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on how long a stale ring is served before the next reload
/// attempt after a failure.
const RELOAD_RETRY_BACKOFF: Duration = Duration::from_secs(5);

struct CacheEntry {
    ring: Arc<KeyRing>,
    loaded_at: Instant,
    expires_at: Instant,
}

pub struct KeyCache {
    store: KeyObjectStore,
    lock: Arc<DistributedLock>,
    generator: Arc<dyn KeyGenerator>,
    ttl: Duration,
    lock_ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    reload_gate: Mutex<()>,
}

impl KeyCache {
    pub fn new(
        store: KeyObjectStore,
        lock: Arc<DistributedLock>,
        generator: Arc<dyn KeyGenerator>,
        ttl: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            generator,
            ttl,
            lock_ttl,
            entry: RwLock::new(None),
            reload_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &KeyObjectStore {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current ring, reloading from the store when the cached copy expired.
    ///
    /// Fails only if no ring has ever been loaded and the store cannot
    /// provide one.
    pub async fn get_ring(&self) -> Result<Arc<KeyRing>, KsError> {
        if let Some(ring) = self.fresh().await {
            return Ok(ring);
        }

        let _gate = self.reload_gate.lock().await;
        // Another caller may have reloaded while we waited.
        if let Some(ring) = self.fresh().await {
            return Ok(ring);
        }

        match self.load_or_bootstrap().await {
            Ok(ring) => {
                metrics::record_cache_reload("success");
                Ok(self.replace(ring).await)
            }
            Err(e) => self.fall_back(e).await,
        }
    }

    /// Cached ring regardless of age, without touching the store.
    pub async fn peek(&self) -> Option<Arc<KeyRing>> {
        self.entry.read().await.as_ref().map(|e| Arc::clone(&e.ring))
    }

    /// When the cached ring was loaded, if any.
    pub async fn loaded_at(&self) -> Option<Instant> {
        self.entry.read().await.as_ref().map(|e| e.loaded_at)
    }

    /// Read the store unconditionally and cache what it holds.
    ///
    /// Does not bootstrap: `Ok(None)` means the store is empty. Used by
    /// rotation, which must act on the latest persisted state.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<Option<Arc<KeyRing>>, KsError> {
        let _gate = self.reload_gate.lock().await;
        match self.store.load().await {
            Ok(Some(ring)) => {
                metrics::record_cache_reload("success");
                Ok(Some(self.replace(ring).await))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                metrics::record_cache_reload("error");
                Err(e)
            }
        }
    }

    /// Install a ring this process just persisted.
    pub async fn replace(&self, ring: KeyRing) -> Arc<KeyRing> {
        let ring = Arc::new(ring);
        let now = Instant::now();
        metrics::set_signing_keys(ring.len());
        *self.entry.write().await = Some(CacheEntry {
            ring: Arc::clone(&ring),
            loaded_at: now,
            expires_at: now + self.ttl,
        });
        debug!(target: "ks.cache", kids = ?ring.kids(), "Key ring cached");
        ring
    }

    async fn fresh(&self) -> Option<Arc<KeyRing>> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| Arc::clone(&e.ring))
    }

    async fn fall_back(&self, error: KsError) -> Result<Arc<KeyRing>, KsError> {
        let mut entry = self.entry.write().await;
        match entry.as_mut() {
            Some(stale) => {
                warn!(
                    target: "ks.cache",
                    error = %error,
                    kind = error.kind(),
                    "Key ring reload failed, serving stale ring"
                );
                metrics::record_cache_reload("stale");
                stale.expires_at = Instant::now() + self.ttl.min(RELOAD_RETRY_BACKOFF);
                Ok(Arc::clone(&stale.ring))
            }
            None => {
                warn!(
                    target: "ks.cache",
                    error = %error,
                    kind = error.kind(),
                    "Key ring reload failed and no ring is cached"
                );
                metrics::record_cache_reload("error");
                Err(error)
            }
        }
    }

    #[instrument(skip_all)]
    async fn load_or_bootstrap(&self) -> Result<KeyRing, KsError> {
        if let Some(ring) = self.store.load().await? {
            return Ok(ring);
        }
        self.bootstrap().await
    }

    /// Create the first ring when the store is empty.
    ///
    /// Runs under the rotation lock so that it is not a second writer.
    /// An instance that loses the lock polls the store for the winner's
    /// write until the winner's lease must have lapsed, then tries the lock
    /// once more.
    async fn bootstrap(&self) -> Result<KeyRing, KsError> {
        let deadline = Instant::now() + self.lock_ttl;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if let Some(lease) = self.lock.try_acquire(KEY_ROTATION_JOB, self.lock_ttl).await {
                let result = self.bootstrap_locked(&lease).await;
                if !self.lock.release(lease).await {
                    warn!(
                        target: "ks.cache",
                        "Bootstrap lock not released, other instances wait for it to expire"
                    );
                }
                return result;
            }

            if Instant::now() >= deadline {
                break;
            }

            debug!(
                target: "ks.cache",
                attempt = attempts,
                "Bootstrap lock held elsewhere, waiting for key ring"
            );
            tokio::time::sleep(BOOTSTRAP_RETRY_DELAY).await;

            if let Some(ring) = self.store.load().await? {
                return Ok(ring);
            }
        }

        warn!(
            target: "ks.cache",
            attempts,
            lock_ttl_ms = self.lock_ttl.as_millis() as u64,
            "Key store still empty after waiting out the bootstrap lock"
        );
        Err(KsError::KeysUnavailable)
    }

    async fn bootstrap_locked(&self, lease: &LockLease) -> Result<KeyRing, KsError> {
        // The previous holder may have written the ring between our read and
        // our acquisition.
        if let Some(ring) = self.store.load().await? {
            return Ok(ring);
        }

        let generator = Arc::clone(&self.generator);
        let ring = tokio::task::spawn_blocking(move || KeyRing::bootstrap(generator.as_ref()))
            .await
            .map_err(|e| KsError::Internal(format!("key generation task failed: {}", e)))??;

        lease.ensure_held_for(self.store.save_budget())?;
        self.store.save(&ring).await?;
        info!(
            target: "ks.cache",
            kid = ring.signing_key().map(|k| k.kid()).unwrap_or_default(),
            "Bootstrapped key ring"
        );
        Ok(ring)
    }
}
