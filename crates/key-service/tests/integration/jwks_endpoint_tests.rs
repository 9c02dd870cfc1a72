//! HTTP surface: JWKS document, health check and metrics.

use key_service::handlers::health::HealthResponse;
use key_service::keys::JwkSet;
use key_service::provider::RotationOutcome;
use key_service::storage::{BlobStore, MemoryBlobStore};
use ks_test_utils::{JwkSetAssertions, TestKeyServer, TestProviderBuilder};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server(cache_ttl: Duration) -> Result<TestKeyServer, anyhow::Error> {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let provider = TestProviderBuilder::new(blobs).cache_ttl(cache_ttl).build();
    TestKeyServer::spawn(Arc::new(provider)).await
}

#[tokio::test]
async fn test_jwks_document_shape() -> Result<(), anyhow::Error> {
    let server = spawn_server(Duration::from_secs(300)).await?;

    let response = reqwest::get(server.jwks_url()).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("max-age=300")
    );

    let body: serde_json::Value = response.json().await?;
    let keys = body["keys"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("keys must be an array"))?;
    assert_eq!(keys.len(), 1);

    let key = &keys[0];
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["use"], "sig");
    assert_eq!(key["alg"], "RS256");
    assert!(key["kid"].is_string());
    assert!(key["n"].is_string());
    assert!(key["e"].is_string());
    // Only public members are served.
    for private in ["d", "p", "q", "dp", "dq", "qi"] {
        assert!(key.get(private).is_none(), "JWKS leaked '{}'", private);
    }

    Ok(())
}

#[tokio::test]
async fn test_jwks_reflects_rotation() -> Result<(), anyhow::Error> {
    let server = spawn_server(Duration::from_secs(300)).await?;

    let before: JwkSet = reqwest::get(server.jwks_url()).await?.json().await?;
    before.assert_key_count(1);

    let RotationOutcome::Rotated { new_key_id, .. } = server.provider().rotate_keys().await else {
        anyhow::bail!("rotation should succeed");
    };

    let after: JwkSet = reqwest::get(server.jwks_url()).await?.json().await?;
    after
        .assert_key_count(2)
        .assert_contains_kid(&new_key_id)
        .assert_contains_kid(&before.keys[0].kid);
    assert_eq!(after.keys[0].kid, new_key_id, "newest key is listed first");

    Ok(())
}

#[tokio::test]
async fn test_health_reports_loaded_ring() -> Result<(), anyhow::Error> {
    let server = spawn_server(Duration::from_secs(300)).await?;
    let client = reqwest::Client::new();

    let health: HealthResponse = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert!(!health.keys_loaded);
    assert_eq!(health.status, "degraded");

    client.get(server.jwks_url()).send().await?;

    let health: HealthResponse = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert!(health.keys_loaded);
    assert_eq!(health.key_count, 1);
    assert_eq!(health.status, "healthy");

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_served() -> Result<(), anyhow::Error> {
    let server = spawn_server(Duration::from_secs(300)).await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}
