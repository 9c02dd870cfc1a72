use super::entry::{KeyEntry, RSA_KEY_BITS};
use crate::errors::KsError;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;

/// Source of fresh signing keys.
///
/// Generation is CPU bound; async callers run it on the blocking pool.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyEntry, KsError>;
}

/// RSA-2048 generator backed by the OS random number generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaKeyGenerator;

impl KeyGenerator for RsaKeyGenerator {
    fn generate(&self) -> Result<KeyEntry, KsError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| KsError::KeyGenerationFailure(e.to_string()))?;

        tracing::debug!(target: "ks.keys", "Generated RSA-{} signing key", RSA_KEY_BITS);
        Ok(KeyEntry::from_private_key(private_key))
    }
}
