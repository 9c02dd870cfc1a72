//! Chaos tests for several instances rotating against one store
//!
//! These tests validate that coordination holds when instances race:
//! - Simultaneous rotation attempts commit exactly one rotation
//! - Simultaneous first reads converge on a single bootstrapped key
//! - Readers never observe an empty key set while a rotation commits

use futures::future::join_all;
use key_service::provider::{JwkProvider, RotationOutcome};
use key_service::storage::{BlobStore, MemoryBlobStore};
use ks_test_utils::{JwkSetAssertions, SwitchableKeyGenerator, TestProviderBuilder};
use std::sync::Arc;
use std::time::Duration;

const STORE_LATENCY: Duration = Duration::from_millis(20);

fn instances(blobs: &Arc<dyn BlobStore>, count: usize) -> Vec<Arc<JwkProvider>> {
    (0..count)
        .map(|_| {
            Arc::new(
                TestProviderBuilder::new(Arc::clone(blobs))
                    .cache_ttl(Duration::ZERO)
                    .build(),
            )
        })
        .collect()
}

/// Three instances fire their rotation timers at once. Exactly one
/// rotates and the ring grows by exactly one key.
#[tokio::test]
async fn test_simultaneous_rotation_commits_once() -> Result<(), anyhow::Error> {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new().with_latency(STORE_LATENCY));
    let providers = instances(&blobs, 3);

    let original = providers[0].public_jwks().await?;
    original.assert_key_count(1);

    let attempts = providers.iter().map(|provider| {
        let provider = Arc::clone(provider);
        tokio::spawn(async move { provider.rotate_keys().await })
    });

    let mut rotated = Vec::new();
    for outcome in join_all(attempts).await {
        match outcome? {
            RotationOutcome::Rotated { new_key_id, .. } => rotated.push(new_key_id),
            RotationOutcome::LockNotAcquired => {}
            other => anyhow::bail!("unexpected rotation outcome: {:?}", other),
        }
    }
    assert_eq!(rotated.len(), 1, "exactly one instance should rotate");

    // Every instance now reads the same two-key ring.
    for provider in &providers {
        provider
            .public_jwks()
            .await?
            .assert_key_count(2)
            .assert_contains_kid(&rotated[0])
            .assert_contains_kid(&original.keys[0].kid);
    }

    Ok(())
}

/// Fresh instances racing on an empty store converge on one key.
#[tokio::test]
async fn test_simultaneous_bootstrap_converges() -> Result<(), anyhow::Error> {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new().with_latency(STORE_LATENCY));
    let providers = instances(&blobs, 3);

    let reads = providers.iter().map(|provider| {
        let provider = Arc::clone(provider);
        tokio::spawn(async move { provider.public_jwks().await })
    });

    let mut kids = Vec::new();
    for read in join_all(reads).await {
        let jwks = read??;
        jwks.assert_key_count(1);
        kids.push(jwks.keys[0].kid.clone());
    }

    assert_eq!(kids.len(), 3, "every instance should get the ring");
    kids.dedup();
    assert_eq!(kids.len(), 1, "all instances should serve the same key");

    let late = TestProviderBuilder::new(Arc::clone(&blobs)).build();
    late.public_jwks().await?.assert_contains_kid(&kids[0]);

    Ok(())
}

/// A waiter outlasts a lock holder that is slow to generate the first key.
#[tokio::test]
async fn test_bootstrap_waits_for_slow_winner() -> Result<(), anyhow::Error> {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new().with_latency(STORE_LATENCY));
    let slow_generator = Arc::new(SwitchableKeyGenerator::new());
    slow_generator.set_delay(Duration::from_millis(1200));
    let waiter_generator = Arc::new(SwitchableKeyGenerator::new());

    let winner = Arc::new(
        TestProviderBuilder::new(Arc::clone(&blobs))
            .generator(Arc::clone(&slow_generator) as _)
            .build(),
    );
    let waiter = TestProviderBuilder::new(Arc::clone(&blobs))
        .generator(Arc::clone(&waiter_generator) as _)
        .build();

    let first = tokio::spawn({
        let winner = Arc::clone(&winner);
        async move { winner.public_jwks().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waited = waiter.public_jwks().await?;
    let bootstrapped = first.await??;

    waited.assert_key_count(1);
    assert_eq!(waited, bootstrapped);
    assert_eq!(slow_generator.generated(), 1);
    assert_eq!(waiter_generator.generated(), 0, "the waiter must not make its own key");

    Ok(())
}

/// Reads running alongside repeated rotations always see a usable ring.
#[tokio::test]
async fn test_reads_during_rotation_never_empty() -> Result<(), anyhow::Error> {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new().with_latency(STORE_LATENCY));
    let providers = instances(&blobs, 2);
    let rotator = Arc::clone(&providers[0]);
    let reader = Arc::clone(&providers[1]);

    rotator.public_jwks().await?;

    let reads = tokio::spawn(async move {
        let mut observed = Vec::new();
        for _ in 0..20 {
            observed.push(reader.public_jwks().await.map(|jwks| jwks.keys.len()));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        observed
    });

    for _ in 0..3 {
        assert!(matches!(
            rotator.rotate_keys().await,
            RotationOutcome::Rotated { .. }
        ));
    }

    for observed in reads.await? {
        let count = observed?;
        assert!((1..=2).contains(&count), "unexpected key count {}", count);
    }

    Ok(())
}
