//! Encryption oracles protecting key material at rest.
//!
//! Both directions are opaque text to text. Nothing outside an oracle
//! interprets the ciphertext format.

use crate::errors::KsError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Connection timeout for the HTTP oracle client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TAG_LEN: usize = 16;

#[async_trait]
pub trait EncryptionOracle: Send + Sync {
    async fn encrypt(&self, plaintext: &SecretString) -> Result<String, KsError>;

    async fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KsError>;
}

#[derive(Serialize)]
struct OracleRequest<'a> {
    data: &'a str,
}

#[derive(Deserialize)]
struct OracleResponse {
    data: String,
}

/// Oracle reachable over HTTP (`POST {base}/encrypt`, `POST {base}/decrypt`).
pub struct HttpEncryptionOracle {
    base_url: String,
    client: reqwest::Client,
}

impl fmt::Debug for HttpEncryptionOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEncryptionOracle")
            .field("base_url", &self.base_url)
            .finish()
    }
}

enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    fn path(&self) -> &'static str {
        match self {
            Direction::Encrypt => "encrypt",
            Direction::Decrypt => "decrypt",
        }
    }
}

impl HttpEncryptionOracle {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, KsError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| KsError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call(&self, direction: Direction, data: &str) -> Result<String, KsError> {
        let url = format!("{}/{}", self.base_url, direction.path());

        let response = self
            .client
            .post(&url)
            .json(&OracleRequest { data })
            .send()
            .await
            .map_err(|e| {
                debug!(target: "ks.crypto.oracle", error = %e, url = %url, "Oracle request failed");
                KsError::EncryptionUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            warn!(target: "ks.crypto.oracle", status = %status, "Oracle returned server error");
            return Err(KsError::EncryptionUnavailable(format!(
                "oracle returned {}",
                status
            )));
        }
        if !status.is_success() {
            warn!(target: "ks.crypto.oracle", status = %status, "Oracle rejected request");
            return Err(match direction {
                Direction::Decrypt => {
                    KsError::DecryptionFailure(format!("oracle returned {}", status))
                }
                Direction::Encrypt => {
                    KsError::EncryptionUnavailable(format!("oracle returned {}", status))
                }
            });
        }

        let body: OracleResponse = response.json().await.map_err(|e| match direction {
            Direction::Decrypt => KsError::DecryptionFailure(format!("malformed response: {}", e)),
            Direction::Encrypt => {
                KsError::EncryptionUnavailable(format!("malformed response: {}", e))
            }
        })?;

        Ok(body.data)
    }
}

#[async_trait]
impl EncryptionOracle for HttpEncryptionOracle {
    #[instrument(skip_all)]
    async fn encrypt(&self, plaintext: &SecretString) -> Result<String, KsError> {
        self.call(Direction::Encrypt, plaintext.expose_secret())
            .await
    }

    #[instrument(skip_all)]
    async fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KsError> {
        self.call(Direction::Decrypt, ciphertext)
            .await
            .map(SecretString::from)
    }
}

/// AES-256-GCM with a locally held key.
///
/// Ciphertext text is `base64(nonce || ciphertext || tag)`.
pub struct LocalAeadOracle {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for LocalAeadOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAeadOracle")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl LocalAeadOracle {
    pub fn new(key: &[u8]) -> Result<Self, KsError> {
        if key.len() != 32 {
            return Err(KsError::Internal(format!(
                "Invalid key encryption key length: {} (expected 32)",
                key.len()
            )));
        }
        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|e| KsError::Internal(format!("Cipher key creation failed: {}", e)))?;

        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Build from the base64 key held in configuration.
    pub fn from_base64(key_base64: &SecretString) -> Result<Self, KsError> {
        let key = general_purpose::STANDARD
            .decode(key_base64.expose_secret())
            .map_err(|e| KsError::Internal(format!("Invalid key encryption key: {}", e)))?;
        Self::new(&key)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, KsError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|e| KsError::EncryptionUnavailable(format!("Nonce generation failed: {}", e)))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|e| {
                KsError::EncryptionUnavailable(format!("Encryption operation failed: {}", e))
            })?;

        let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(output))
    }

    fn open(&self, ciphertext: &str) -> Result<Vec<u8>, KsError> {
        let raw = general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| KsError::DecryptionFailure(format!("ciphertext is not base64: {}", e)))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(KsError::DecryptionFailure(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }
        let (nonce_part, sealed) = raw.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_part
            .try_into()
            .map_err(|e| KsError::DecryptionFailure(format!("Invalid nonce format: {}", e)))?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|e| {
                KsError::DecryptionFailure(format!("Decryption operation failed: {}", e))
            })?;

        Ok(plaintext.to_vec())
    }
}

#[async_trait]
impl EncryptionOracle for LocalAeadOracle {
    async fn encrypt(&self, plaintext: &SecretString) -> Result<String, KsError> {
        self.seal(plaintext.expose_secret().as_bytes())
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KsError> {
        let bytes = self.open(ciphertext)?;
        String::from_utf8(bytes)
            .map(SecretString::from)
            .map_err(|e| KsError::DecryptionFailure(format!("plaintext is not UTF-8: {}", e)))
    }
}
