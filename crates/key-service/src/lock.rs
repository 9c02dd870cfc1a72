//! Advisory mutual exclusion over blob storage.
//!
//! Each attempt writes its own object `{job}-lock-{holder_id}` and then lists
//! every attempt for the job. Attempts whose server-assigned timestamp falls
//! within the last `ttl` are active; they are ordered by
//! `(last_modified, digest, key)` and the attempt that sorts first holds the
//! lock. An attempt only ever compares against a listing that contains its
//! own write, so two attempts that see each other agree on the winner.
//!
//! This is not linearizable. It assumes the store's timestamps and
//! listings are consistent to well within `ttl`.

use crate::errors::KsError;
use crate::observability::metrics;
use crate::storage::{BlobStore, ObjectMeta, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Job name used to serialize key rotation across instances.
pub const KEY_ROTATION_JOB: &str = "key-rotation";

/// Proof of a successful acquisition. Hand it back to
/// [`DistributedLock::release`].
#[derive(Debug, Clone)]
#[must_use = "a held lock must be released"]
pub struct LockLease {
    job: String,
    holder_id: String,
    object_key: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
    /// Local time taken before the lock object was written.
    started: Instant,
}

impl LockLease {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Server-assigned timestamp of the winning lock object.
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Time left before other attempts stop counting this lease as active.
    ///
    /// Measured on the local clock from before the lock object was written,
    /// so it never overstates what the store would report.
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.started.elapsed())
    }

    /// Fail unless the lease stays active for more than `needed`.
    ///
    /// Writes that rely on the lock check this first. Once the lease lapses
    /// another instance may hold the lock.
    pub fn ensure_held_for(&self, needed: Duration) -> Result<(), KsError> {
        let remaining = self.remaining();
        if remaining <= needed {
            return Err(KsError::LeaseExpired(format!(
                "{:?} left on the {} lock, {:?} needed",
                remaining, self.job, needed
            )));
        }
        Ok(())
    }
}

pub fn lock_prefix(job: &str) -> String {
    format!("{}-lock-", job)
}

/// Pick the holder among lock objects.
///
/// Objects outside `[now - ttl, now]` are ignored. Exact timestamp ties are
/// broken by digest, then by key.
pub fn current_holder(
    objects: &[ObjectMeta],
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Option<&ObjectMeta> {
    let window_start = now - ttl;
    objects
        .iter()
        .filter(|meta| meta.last_modified >= window_start && meta.last_modified <= now)
        .min_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.digest.cmp(&b.digest))
                .then_with(|| a.key.cmp(&b.key))
        })
}

pub struct DistributedLock {
    store: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl DistributedLock {
    /// `timeout` bounds each individual store call.
    pub fn new(store: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Make one attempt to take the lock for `job`.
    ///
    /// Never blocks waiting for another holder and never retries. Storage
    /// failures are reported as `None`, the same as losing.
    #[instrument(skip_all, fields(job = %job))]
    pub async fn try_acquire(&self, job: &str, ttl: Duration) -> Option<LockLease> {
        let Ok(ttl_window) = chrono::Duration::from_std(ttl) else {
            warn!(target: "ks.lock", ?ttl, "Lock TTL out of range");
            metrics::record_lock_attempt("error");
            return None;
        };

        let started = Instant::now();
        let holder_id = Uuid::new_v4().to_string();
        let prefix = lock_prefix(job);
        let object_key = format!("{}{}", prefix, holder_id);
        // Storage-side expiry reaps the object if this process dies holding it.
        let expires_at = Utc::now() + ttl_window * 2;

        let own = match self
            .bounded(self.store.put(
                &object_key,
                Bytes::from(holder_id.clone()),
                Some(expires_at),
            ))
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                warn!(target: "ks.lock", error = %e, "Failed to write lock object");
                metrics::record_lock_attempt("error");
                // A timed-out write may still land.
                self.discard(&object_key).await;
                return None;
            }
        };

        let mut listed = match self.bounded(self.store.list(&prefix)).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(target: "ks.lock", error = %e, "Failed to list lock objects");
                metrics::record_lock_attempt("error");
                self.discard(&object_key).await;
                return None;
            }
        };

        // A lagging listing may not show our own write yet; we know it exists.
        if !listed.iter().any(|meta| meta.key == object_key) {
            listed.push(own.clone());
        }

        let now = Utc::now().max(own.last_modified);
        let acquired = current_holder(&listed, now, ttl_window)
            .is_some_and(|holder| holder.key == object_key);

        if !acquired {
            debug!(
                target: "ks.lock",
                active_attempts = listed.len(),
                "Lock held by another attempt"
            );
            metrics::record_lock_attempt("lost");
            self.discard(&object_key).await;
            return None;
        }

        info!(target: "ks.lock", holder_id = %holder_id, "Lock acquired");
        metrics::record_lock_attempt("acquired");

        Some(LockLease {
            job: job.to_string(),
            holder_id,
            object_key,
            acquired_at: own.last_modified,
            ttl,
            started,
        })
    }

    /// Delete the lease's own lock object.
    ///
    /// Returns whether the delete succeeded. Failure is not fatal: the
    /// object ages out of the active window after `ttl`.
    #[instrument(skip_all, fields(job = %lease.job))]
    pub async fn release(&self, lease: LockLease) -> bool {
        match self.bounded(self.store.delete(&lease.object_key)).await {
            Ok(()) => {
                info!(target: "ks.lock", holder_id = %lease.holder_id, "Lock released");
                true
            }
            Err(e) => {
                warn!(
                    target: "ks.lock",
                    holder_id = %lease.holder_id,
                    error = %e,
                    "Failed to release lock, it will expire"
                );
                false
            }
        }
    }

    /// Remove a losing attempt so it cannot block later attempts.
    async fn discard(&self, object_key: &str) {
        if let Err(e) = self.bounded(self.store.delete(object_key)).await {
            debug!(target: "ks.lock", error = %e, "Failed to remove losing lock object");
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Request(format!("timed out after {:?}", self.timeout)))?
    }
}
