//! Deterministic cryptographic fixtures for testing

use base64::{engine::general_purpose, Engine as _};
use key_service::crypto::LocalAeadOracle;
use secrecy::SecretString;
use std::sync::Arc;

/// Object key used for the key bundle in tests.
pub const TEST_OBJECT_KEY: &str = "encrypted-keys-test.txt";

/// Fixed 32-byte key encryption key.
///
/// The same seed always produces the same key, so stores written in one part
/// of a test can be read in another.
pub fn test_key_encryption_key(seed: u8) -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = seed.wrapping_mul(31).wrapping_add(i as u8);
    }
    key
}

/// Base64 form, as `KEY_ENCRYPTION_KEY` expects it.
pub fn test_key_encryption_key_base64(seed: u8) -> SecretString {
    SecretString::from(general_purpose::STANDARD.encode(test_key_encryption_key(seed)))
}

/// Local AES-GCM oracle over the fixed test key.
pub fn test_oracle(seed: u8) -> Arc<LocalAeadOracle> {
    Arc::new(
        LocalAeadOracle::new(&test_key_encryption_key(seed))
            .expect("32-byte key is always accepted"),
    )
}
