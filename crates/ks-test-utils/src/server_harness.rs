//! Test server harness for E2E testing
//!
//! Provides TestKeyServer for serving a provider over real HTTP in tests.

use key_service::observability::metrics;
use key_service::provider::JwkProvider;
use key_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the key service HTTP surface in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_jwks_e2e() -> Result<()> {
///     let provider = Arc::new(TestProviderBuilder::new(blobs).build());
///     let server = TestKeyServer::spawn(provider).await?;
///
///     let response = reqwest::get(server.jwks_url()).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestKeyServer {
    addr: SocketAddr,
    provider: Arc<JwkProvider>,
    _handle: JoinHandle<()>,
}

impl TestKeyServer {
    /// Spawn a server for `provider` on a random local port.
    ///
    /// No rotation task is started; tests drive rotation directly through
    /// [`TestKeyServer::provider`].
    pub async fn spawn(provider: Arc<JwkProvider>) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState {
            provider: Arc::clone(&provider),
        });

        // The global recorder can only be installed once per test process.
        // Later servers get a standalone recorder.
        let metrics_handle = match metrics::init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        let app = routes::build_routes(state, Some(metrics_handle));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            provider,
            _handle: handle,
        })
    }

    /// Base URL, e.g. "http://127.0.0.1:12345".
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.url())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn provider(&self) -> &Arc<JwkProvider> {
        &self.provider
    }
}
