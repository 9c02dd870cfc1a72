//! # Key Service Test Utilities
//!
//! Shared test utilities for the key service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed key encryption key, test oracle)
//! - Fault-injecting blob stores, oracles and key generators
//! - A provider builder with test-friendly TTLs
//! - Server test harness (TestKeyServer for E2E tests)
//! - Token assertions against a served key set
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ks_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let blobs = Arc::new(MemoryBlobStore::new());
//!     let provider = TestProviderBuilder::new(blobs).build();
//!     let server = TestKeyServer::spawn(Arc::new(provider)).await?;
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod faults;
pub mod provider_builder;
pub mod server_harness;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use faults::*;
pub use provider_builder::*;
pub use server_harness::*;
