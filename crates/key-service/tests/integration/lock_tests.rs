//! Distributed lock behavior across instances sharing one store.

use chrono::Utc;
use key_service::lock::{lock_prefix, DistributedLock, KEY_ROTATION_JOB};
use key_service::storage::{BlobStore, MemoryBlobStore};
use std::sync::Arc;
use std::time::Duration;

const LOCK_TTL: Duration = Duration::from_secs(30);

fn two_instances(blobs: &Arc<MemoryBlobStore>) -> (DistributedLock, DistributedLock) {
    let shared: Arc<dyn BlobStore> = Arc::clone(blobs) as Arc<dyn BlobStore>;
    (
        DistributedLock::new(Arc::clone(&shared), Duration::from_secs(5)),
        DistributedLock::new(shared, Duration::from_secs(5)),
    )
}

/// A second instance cannot take the lock while the first holds it, and
/// can once it is released.
#[tokio::test]
async fn test_lock_excludes_other_instance_until_released() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let (a, b) = two_instances(&blobs);

    let lease = a
        .try_acquire(KEY_ROTATION_JOB, LOCK_TTL)
        .await
        .ok_or_else(|| anyhow::anyhow!("first instance should acquire"))?;

    assert!(b.try_acquire(KEY_ROTATION_JOB, LOCK_TTL).await.is_none());
    // The loser left nothing behind.
    assert_eq!(blobs.keys()?, vec![lease.object_key().to_string()]);

    assert!(a.release(lease).await);
    assert!(blobs.keys()?.is_empty());

    let lease_b = b
        .try_acquire(KEY_ROTATION_JOB, LOCK_TTL)
        .await
        .ok_or_else(|| anyhow::anyhow!("second instance should acquire after release"))?;
    assert!(b.release(lease_b).await);

    Ok(())
}

/// A lock object left by a crashed holder stops blocking after the TTL.
#[tokio::test]
async fn test_crashed_holder_lock_ages_out() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let (a, _) = two_instances(&blobs);

    let crashed_key = format!("{}crashed-holder", lock_prefix(KEY_ROTATION_JOB));
    blobs.insert_with_timestamp(
        &crashed_key,
        "crashed-holder",
        Utc::now() - chrono::Duration::seconds(120),
    )?;

    let lease = a
        .try_acquire(KEY_ROTATION_JOB, LOCK_TTL)
        .await
        .ok_or_else(|| anyhow::anyhow!("stale lock must not block"))?;
    assert!(a.release(lease).await);

    Ok(())
}

/// A recent lock object from another holder blocks acquisition.
#[tokio::test]
async fn test_recent_foreign_lock_blocks() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let (a, _) = two_instances(&blobs);

    let foreign_key = format!("{}other-instance", lock_prefix(KEY_ROTATION_JOB));
    blobs.insert_with_timestamp(
        &foreign_key,
        "other-instance",
        Utc::now() - chrono::Duration::seconds(1),
    )?;

    assert!(a.try_acquire(KEY_ROTATION_JOB, LOCK_TTL).await.is_none());
    assert_eq!(blobs.keys()?, vec![foreign_key]);

    Ok(())
}

/// Concurrent attempts from many instances produce exactly one holder.
#[tokio::test]
async fn test_concurrent_attempts_single_holder() -> Result<(), anyhow::Error> {
    let blobs: Arc<dyn BlobStore> =
        Arc::new(MemoryBlobStore::new().with_latency(Duration::from_millis(20)));

    let attempts = (0..8).map(|_| {
        let lock = DistributedLock::new(Arc::clone(&blobs), Duration::from_secs(5));
        tokio::spawn(async move { lock.try_acquire(KEY_ROTATION_JOB, LOCK_TTL).await })
    });

    let mut holders = 0;
    for attempt in futures::future::join_all(attempts).await {
        if attempt?.is_some() {
            holders += 1;
        }
    }

    assert_eq!(holders, 1, "exactly one instance should hold the lock");

    Ok(())
}
