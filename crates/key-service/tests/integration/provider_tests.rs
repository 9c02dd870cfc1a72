//! Provider behavior across instances sharing one bucket.

use key_service::config::Config;
use key_service::keys::RsaKeyGenerator;
use key_service::provider::RotationOutcome;
use key_service::service::{build_provider, oracle_from_config, ProviderSettings};
use key_service::storage::{BlobStore, MemoryBlobStore};
use ks_test_utils::{
    sign_test_token, test_key_encryption_key_base64, JwkSetAssertions, TestProviderBuilder,
    TEST_OBJECT_KEY,
};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn shared_store() -> Arc<dyn BlobStore> {
    Arc::new(MemoryBlobStore::new())
}

/// The instance that reads an empty store first creates the ring; the
/// next instance reads it instead of creating its own.
#[tokio::test]
async fn test_second_instance_reads_bootstrapped_ring() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let a = TestProviderBuilder::new(Arc::clone(&blobs)).build();
    let b = TestProviderBuilder::new(Arc::clone(&blobs)).build();

    let jwks_a = a.public_jwks().await?;
    let jwks_b = b.public_jwks().await?;

    jwks_a.assert_key_count(1).assert_well_formed();
    assert_eq!(jwks_a, jwks_b);

    Ok(())
}

/// A rotation on one instance becomes visible on another after its cache
/// expires, and tokens signed before the rotation keep verifying.
#[tokio::test]
async fn test_rotation_visible_to_peer_with_overlap() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let rotator = TestProviderBuilder::new(Arc::clone(&blobs)).build();
    let reader = TestProviderBuilder::new(Arc::clone(&blobs))
        .cache_ttl(Duration::ZERO)
        .build();

    let old_key = rotator.signing_key().await?;
    let old_token = sign_test_token(&old_key, "svc-before");

    let RotationOutcome::Rotated {
        new_key_id,
        retired_key_id,
    } = rotator.rotate_keys().await
    else {
        anyhow::bail!("rotation should succeed on an uncontended store");
    };
    assert_eq!(retired_key_id, None);

    let jwks = reader.public_jwks().await?;
    jwks.assert_key_count(2)
        .assert_contains_kid(&new_key_id)
        .assert_contains_kid(old_key.kid())
        .assert_verifies(&old_token);

    let new_key = reader.signing_key().await?;
    assert_eq!(new_key.kid(), new_key_id);
    jwks.assert_verifies(&sign_test_token(&new_key, "svc-after"));

    Ok(())
}

/// The ring never grows beyond two keys; the oldest is retired.
#[tokio::test]
async fn test_second_rotation_retires_oldest_key() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let provider = TestProviderBuilder::new(Arc::clone(&blobs)).build();

    let original = provider.signing_key().await?;
    assert!(matches!(
        provider.rotate_keys().await,
        RotationOutcome::Rotated { .. }
    ));

    let RotationOutcome::Rotated {
        new_key_id,
        retired_key_id,
    } = provider.rotate_keys().await
    else {
        anyhow::bail!("second rotation should succeed");
    };
    assert_eq!(retired_key_id.as_deref(), Some(original.kid()));

    let fresh_instance = TestProviderBuilder::new(blobs).build();
    let jwks = fresh_instance.public_jwks().await?;
    jwks.assert_key_count(2)
        .assert_contains_kid(&new_key_id)
        .assert_lacks_kid(original.kid());
    assert!(fresh_instance.find_key(original.kid()).await?.is_none());

    Ok(())
}

/// The bundle is written encrypted; private members never appear in the
/// stored object.
#[tokio::test]
async fn test_bundle_is_encrypted_at_rest() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let provider = TestProviderBuilder::new(Arc::clone(&blobs)).build();
    let key = provider.signing_key().await?;

    let stored = blobs
        .get(TEST_OBJECT_KEY)
        .await?
        .ok_or_else(|| anyhow::anyhow!("bundle should be persisted after bootstrap"))?;
    let stored = String::from_utf8(stored.to_vec())?;

    assert!(!stored.contains(key.kid()));
    assert!(!stored.contains("\"d\""));

    Ok(())
}

/// Instances configured with different object keys do not see each
/// other's rings.
#[tokio::test]
async fn test_object_keys_isolate_rings() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let dev = TestProviderBuilder::new(Arc::clone(&blobs))
        .object_key("encrypted-keys-dev.txt")
        .build();
    let prod = TestProviderBuilder::new(Arc::clone(&blobs))
        .object_key("encrypted-keys-prod.txt")
        .build();

    let dev_key = dev.signing_key().await?;
    let prod_key = prod.signing_key().await?;
    assert_ne!(dev_key.kid(), prod_key.kid());

    Ok(())
}

/// An instance configured from environment variables reads a ring written
/// by another instance holding the same key encryption key.
#[tokio::test]
async fn test_configured_instance_reads_shared_ring() -> Result<(), anyhow::Error> {
    let blobs = shared_store();
    let writer = TestProviderBuilder::new(Arc::clone(&blobs)).build();
    let written = writer.signing_key().await?;

    let config = Config::from_vars(&HashMap::from([
        ("JWK_STORE_BACKEND".to_string(), "memory".to_string()),
        ("JWK_OBJECT_KEY".to_string(), TEST_OBJECT_KEY.to_string()),
        (
            "KEY_ENCRYPTION_KEY".to_string(),
            test_key_encryption_key_base64(1).expose_secret().to_string(),
        ),
    ]))?;
    let reader = build_provider(
        Arc::clone(&blobs),
        oracle_from_config(&config)?,
        Arc::new(RsaKeyGenerator),
        &ProviderSettings::from_config(&config),
    );

    assert_eq!(reader.signing_key().await?.kid(), written.kid());

    Ok(())
}
