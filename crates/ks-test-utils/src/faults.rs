//! Fault-injecting collaborators.
//!
//! Each wrapper delegates to a working implementation until a fault is
//! switched on, so a single test can move a provider between healthy and
//! failing states.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use key_service::crypto::EncryptionOracle;
use key_service::errors::KsError;
use key_service::keys::{KeyEntry, KeyGenerator, RsaKeyGenerator};
use key_service::storage::{BlobStore, ObjectMeta, StoreError};
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Blob store operations that can be failed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOp {
    Get,
    Put,
    List,
    Delete,
}

#[derive(Default)]
struct OpState {
    failing: AtomicBool,
    calls: AtomicUsize,
}

/// Blob store wrapper with switchable per-operation failures and call counts.
pub struct FaultyBlobStore {
    inner: Arc<dyn BlobStore>,
    get: OpState,
    put: OpState,
    list: OpState,
    delete: OpState,
}

impl FaultyBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            get: OpState::default(),
            put: OpState::default(),
            list: OpState::default(),
            delete: OpState::default(),
        }
    }

    fn op(&self, op: BlobOp) -> &OpState {
        match op {
            BlobOp::Get => &self.get,
            BlobOp::Put => &self.put,
            BlobOp::List => &self.list,
            BlobOp::Delete => &self.delete,
        }
    }

    pub fn fail(&self, op: BlobOp, failing: bool) {
        self.op(op).failing.store(failing, Ordering::SeqCst);
    }

    /// Fail (or heal) every operation at once.
    pub fn set_offline(&self, offline: bool) {
        for op in [BlobOp::Get, BlobOp::Put, BlobOp::List, BlobOp::Delete] {
            self.fail(op, offline);
        }
    }

    pub fn calls(&self, op: BlobOp) -> usize {
        self.op(op).calls.load(Ordering::SeqCst)
    }

    fn enter(&self, op: BlobOp) -> Result<(), StoreError> {
        let state = self.op(op);
        state.calls.fetch_add(1, Ordering::SeqCst);
        if state.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Request(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.enter(BlobOp::Get)?;
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ObjectMeta, StoreError> {
        self.enter(BlobOp::Put)?;
        self.inner.put(key, body, expires_at).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        self.enter(BlobOp::List)?;
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.enter(BlobOp::Delete)?;
        self.inner.delete(key).await
    }
}

/// Oracle wrapper that can be switched to report itself unreachable.
pub struct SwitchableOracle {
    inner: Arc<dyn EncryptionOracle>,
    unavailable: AtomicBool,
}

impl SwitchableOracle {
    pub fn new(inner: Arc<dyn EncryptionOracle>) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), KsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KsError::EncryptionUnavailable(
                "injected oracle outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EncryptionOracle for SwitchableOracle {
    async fn encrypt(&self, plaintext: &SecretString) -> Result<String, KsError> {
        self.check()?;
        self.inner.encrypt(plaintext).await
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KsError> {
        self.check()?;
        self.inner.decrypt(ciphertext).await
    }
}

/// Key generator that can be switched to fail or to stall.
#[derive(Default)]
pub struct SwitchableKeyGenerator {
    failing: AtomicBool,
    delay_ms: AtomicU64,
    generated: AtomicUsize,
}

impl SwitchableKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Block the generating thread for `delay` before each key.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of keys successfully generated.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for SwitchableKeyGenerator {
    fn generate(&self) -> Result<KeyEntry, KsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KsError::KeyGenerationFailure(
                "injected generator failure".to_string(),
            ));
        }
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        let entry = RsaKeyGenerator.generate()?;
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }
}
