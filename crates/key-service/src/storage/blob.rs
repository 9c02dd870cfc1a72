//! Blob store capability.
//!
//! The key bundle and the rotation lock objects share one bucket-like
//! namespace. Everything above this trait is written against it, so the
//! S3 backend and the in-memory backend are interchangeable at
//! construction time.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Metadata returned for every stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key (name).
    pub key: String,

    /// Last-modified time assigned by the store, not by the writer's clock.
    pub last_modified: DateTime<Utc>,

    /// Content digest (ETag for S3). Opaque, compared lexicographically.
    pub digest: String,
}

/// Errors surfaced by a blob store backend.
///
/// A missing object is not an error; `get` returns `None`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Blob store request failed: {0}")]
    Request(String),

    #[error("Blob store returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object body, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Write (or overwrite) an object.
    ///
    /// `expires_at` is a storage-side expiration hint. Backends that cannot
    /// enforce it may ignore it.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ObjectMeta, StoreError>;

    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
