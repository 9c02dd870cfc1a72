//! Key Service Library
//!
//! Maintains a shared, rotating set of RS256 signing keys for a fleet of
//! stateless instances that coordinate only through a blob store.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Encryption oracles and the key material codec
//! - `storage` - Blob store backends and the encrypted key bundle
//! - `lock` - Advisory distributed lock over the blob store
//! - `keys` - Key entries, the key ring and key generation
//! - `cache` - TTL cache of the key ring
//! - `provider` - Public keys, signing key and rotation
//! - `service` - Wiring of the above from configuration
//! - `tasks` - Background rotation task
//! - `handlers` / `routes` - HTTP surface

pub mod cache;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod lock;
pub mod observability;
pub mod provider;
pub mod routes;
pub mod service;
pub mod storage;
pub mod tasks;
