//! In-process blob store.
//!
//! Behaves like a strongly consistent object store: every write is visible
//! to every subsequent read or list. Timestamps are assigned by the store
//! and are strictly increasing unless whole-second precision is requested,
//! which reproduces the timestamp collisions S3 produces.

use super::blob::{BlobStore, ObjectMeta, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

struct StoredObject {
    body: Bytes,
    meta: ObjectMeta,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredObject {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    last_assigned: Option<DateTime<Utc>>,
}

/// Blob store held entirely in memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    state: Mutex<State>,
    latency: Option<Duration>,
    second_precision: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`, simulating a network round trip.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Truncate assigned timestamps to whole seconds.
    #[must_use]
    pub fn with_second_precision(mut self) -> Self {
        self.second_precision = true;
        self
    }

    /// Store an object with an explicit last-modified time.
    ///
    /// Used to seed stale or colliding objects in tests.
    pub fn insert_with_timestamp(
        &self,
        key: &str,
        body: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) -> Result<ObjectMeta, StoreError> {
        let body = body.into();
        let meta = ObjectMeta {
            key: key.to_string(),
            last_modified,
            digest: digest_of(&body),
        };
        let mut state = self.lock_state()?;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                meta: meta.clone(),
                expires_at: None,
            },
        );
        Ok(meta)
    }

    /// Keys of all live objects, in key order.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let state = self.lock_state()?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, object)| !object.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Request("memory store state poisoned".to_string()))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_timestamp(&self, state: &mut State) -> DateTime<Utc> {
        let now = Utc::now();
        if self.second_precision {
            return now.trunc_subsecs(0);
        }
        let assigned = match state.last_assigned {
            Some(last) if now <= last => last + chrono::Duration::nanoseconds(1),
            _ => now,
        };
        state.last_assigned = Some(assigned);
        assigned
    }
}

fn digest_of(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.simulate_latency().await;
        let now = Utc::now();
        let state = self.lock_state()?;
        Ok(state
            .objects
            .get(key)
            .filter(|object| !object.is_expired(now))
            .map(|object| object.body.clone()))
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ObjectMeta, StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        let meta = ObjectMeta {
            key: key.to_string(),
            last_modified: self.next_timestamp(&mut state),
            digest: digest_of(&body),
        };
        state.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                meta: meta.clone(),
                expires_at,
            },
        );
        Ok(meta)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        self.simulate_latency().await;
        let now = Utc::now();
        let mut state = self.lock_state()?;
        // Storage-side expiration: reap lazily on listing.
        state.objects.retain(|_, object| !object.is_expired(now));
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, object)| object.meta.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        state.objects.remove(key);
        Ok(())
    }
}
