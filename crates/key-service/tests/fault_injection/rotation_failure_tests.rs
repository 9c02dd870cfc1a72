//! Rotation aborted by failing collaborators.
//!
//! Every failed rotation must leave the persisted ring untouched and the
//! rotation lock released.

use key_service::errors::KsError;
use key_service::lock::{lock_prefix, KEY_ROTATION_JOB};
use key_service::provider::RotationOutcome;
use key_service::storage::{BlobStore, MemoryBlobStore};
use ks_test_utils::{
    test_oracle, BlobOp, FaultyBlobStore, JwkSetAssertions, SwitchableKeyGenerator,
    SwitchableOracle, TestProviderBuilder,
};
use std::sync::Arc;
use std::time::Duration;

fn lock_objects(blobs: &MemoryBlobStore) -> Result<Vec<String>, anyhow::Error> {
    let prefix = lock_prefix(KEY_ROTATION_JOB);
    Ok(blobs
        .keys()?
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        .collect())
}

async fn persisted_kids(blobs: &Arc<MemoryBlobStore>) -> Result<Vec<String>, anyhow::Error> {
    let observer = TestProviderBuilder::new(Arc::clone(blobs) as Arc<dyn BlobStore>).build();
    Ok(observer
        .public_jwks()
        .await?
        .keys
        .into_iter()
        .map(|k| k.kid)
        .collect())
}

#[tokio::test]
async fn test_oracle_outage_aborts_rotation() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let oracle = Arc::new(SwitchableOracle::new(test_oracle(1)));
    let provider = TestProviderBuilder::new(Arc::clone(&blobs) as Arc<dyn BlobStore>)
        .oracle(Arc::clone(&oracle) as _)
        .build();

    let before = provider.public_jwks().await?;

    oracle.set_unavailable(true);
    let outcome = provider.rotate_keys().await;
    assert!(
        matches!(
            outcome,
            RotationOutcome::Failed(KsError::EncryptionUnavailable(_))
        ),
        "got {:?}",
        outcome
    );
    assert_eq!(outcome.status(), "error");

    assert!(lock_objects(&blobs)?.is_empty(), "lock must be released");
    assert_eq!(persisted_kids(&blobs).await?, vec![before.keys[0].kid.clone()]);

    // Reads keep working from the cached ring.
    provider.public_jwks().await?.assert_key_count(1);

    oracle.set_unavailable(false);
    assert!(matches!(
        provider.rotate_keys().await,
        RotationOutcome::Rotated { .. }
    ));

    Ok(())
}

#[tokio::test]
async fn test_generator_failure_aborts_rotation() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let generator = Arc::new(SwitchableKeyGenerator::new());
    let provider = TestProviderBuilder::new(Arc::clone(&blobs) as Arc<dyn BlobStore>)
        .generator(Arc::clone(&generator) as _)
        .build();

    let before = provider.public_jwks().await?;
    assert_eq!(generator.generated(), 1);

    generator.set_failing(true);
    let outcome = provider.rotate_keys().await;
    assert!(
        matches!(
            outcome,
            RotationOutcome::Failed(KsError::KeyGenerationFailure(_))
        ),
        "got {:?}",
        outcome
    );

    assert!(lock_objects(&blobs)?.is_empty(), "lock must be released");
    assert_eq!(persisted_kids(&blobs).await?, vec![before.keys[0].kid.clone()]);

    Ok(())
}

#[tokio::test]
async fn test_store_read_failure_aborts_rotation() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = Arc::new(FaultyBlobStore::new(Arc::clone(&blobs) as Arc<dyn BlobStore>));
    let provider = TestProviderBuilder::new(Arc::clone(&store) as Arc<dyn BlobStore>).build();

    let before = provider.public_jwks().await?;

    // The lock still works; reading the current ring does not.
    store.fail(BlobOp::Get, true);
    let outcome = provider.rotate_keys().await;
    assert!(
        matches!(outcome, RotationOutcome::Failed(KsError::StoreUnavailable(_))),
        "got {:?}",
        outcome
    );
    assert!(store.calls(BlobOp::Delete) >= 1, "lock release must be attempted");

    store.fail(BlobOp::Get, false);
    assert!(lock_objects(&blobs)?.is_empty(), "lock must be released");
    assert_eq!(persisted_kids(&blobs).await?, vec![before.keys[0].kid.clone()]);

    Ok(())
}

#[tokio::test]
async fn test_lock_write_failure_skips_rotation() -> Result<(), anyhow::Error> {
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = Arc::new(FaultyBlobStore::new(Arc::clone(&blobs) as Arc<dyn BlobStore>));
    let provider = TestProviderBuilder::new(Arc::clone(&store) as Arc<dyn BlobStore>).build();

    provider.public_jwks().await?;

    store.fail(BlobOp::Put, true);
    let outcome = provider.rotate_keys().await;
    assert!(
        matches!(outcome, RotationOutcome::LockNotAcquired),
        "got {:?}",
        outcome
    );
    assert_eq!(outcome.status(), "skipped");
    assert!(lock_objects(&blobs)?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_stalled_rotation_does_not_overwrite_later_holder() -> Result<(), anyhow::Error> {
    let lock_ttl = Duration::from_secs(3);
    let blobs = Arc::new(MemoryBlobStore::new());
    let generator = Arc::new(SwitchableKeyGenerator::new());
    let stalled = Arc::new(
        TestProviderBuilder::new(Arc::clone(&blobs) as Arc<dyn BlobStore>)
            .generator(Arc::clone(&generator) as _)
            .lock_ttl(lock_ttl)
            .storage_timeout(Duration::from_millis(100))
            .build(),
    );
    let healthy = TestProviderBuilder::new(Arc::clone(&blobs) as Arc<dyn BlobStore>)
        .lock_ttl(lock_ttl)
        .storage_timeout(Duration::from_millis(100))
        .build();

    let first_kid = stalled.signing_key().await?.kid().to_string();
    healthy.public_jwks().await?.assert_contains_kid(&first_kid);

    // The stalled instance takes the lock, then generates past its lease.
    generator.set_delay(lock_ttl + Duration::from_secs(1));
    let stalled_rotation = tokio::spawn({
        let stalled = Arc::clone(&stalled);
        async move { stalled.rotate_keys().await }
    });

    tokio::time::sleep(lock_ttl + Duration::from_millis(400)).await;
    let RotationOutcome::Rotated { new_key_id, .. } = healthy.rotate_keys().await else {
        panic!("lapsed lease should not block the next holder");
    };

    let outcome = stalled_rotation.await?;
    assert!(
        matches!(outcome, RotationOutcome::Failed(KsError::LeaseExpired(_))),
        "got {:?}",
        outcome
    );

    // The later holder's ring survives, including the key the stalled
    // instance is still signing with.
    let persisted = persisted_kids(&blobs).await?;
    assert_eq!(persisted, vec![new_key_id, first_kid.clone()]);
    assert_eq!(stalled.signing_key().await?.kid(), first_kid);
    assert!(lock_objects(&blobs)?.is_empty(), "both locks must be released");

    Ok(())
}

#[tokio::test]
async fn test_unreleased_lock_blocks_until_it_expires() -> Result<(), anyhow::Error> {
    let lock_ttl = Duration::from_secs(2);
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = Arc::new(FaultyBlobStore::new(Arc::clone(&blobs) as Arc<dyn BlobStore>));
    let provider = TestProviderBuilder::new(Arc::clone(&store) as Arc<dyn BlobStore>)
        .lock_ttl(lock_ttl)
        .storage_timeout(Duration::from_millis(100))
        .build();
    provider.public_jwks().await?;

    // The rotation commits even though its lock cannot be deleted.
    store.fail(BlobOp::Delete, true);
    assert!(matches!(
        provider.rotate_keys().await,
        RotationOutcome::Rotated { .. }
    ));
    assert_eq!(lock_objects(&blobs)?.len(), 1, "lock object left behind");
    store.fail(BlobOp::Delete, false);

    assert!(matches!(
        provider.rotate_keys().await,
        RotationOutcome::LockNotAcquired
    ));

    tokio::time::sleep(lock_ttl + Duration::from_millis(200)).await;
    assert!(matches!(
        provider.rotate_keys().await,
        RotationOutcome::Rotated { .. }
    ));

    Ok(())
}
