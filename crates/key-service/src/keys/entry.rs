//! A single RS256 signing key and its JWK representations.

use crate::errors::KsError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const KEY_TYPE: &str = "RSA";
pub const KEY_ALGORITHM: &str = "RS256";
pub const KEY_USE: &str = "sig";
pub const RSA_KEY_BITS: usize = 2048;

/// Public half of a key in JWK form (RFC 7517).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    /// Public exponent (base64url).
    pub e: String,
    /// Modulus (base64url).
    pub n: String,
}

/// JSON Web Key Set served to verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<PublicJwk>,
}

/// Full private JWK as persisted inside the encrypted bundle.
///
/// Never logged and never returned over HTTP.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateJwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub e: String,
    pub n: String,
    pub d: String,
    pub p: String,
    pub q: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

impl fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// One entry of the key ring: an RSA-2048 key pair with its key id.
#[derive(Clone)]
pub struct KeyEntry {
    kid: String,
    private_key: RsaPrivateKey,
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("kid", &self.kid)
            .field("alg", &KEY_ALGORITHM)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

fn b64(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_component(name: &str, value: &str) -> Result<BigUint, KsError> {
    let bytes = URL_SAFE_NO_PAD.decode(value).map_err(|e| {
        KsError::DecryptionFailure(format!("JWK component '{}' is not base64url: {}", name, e))
    })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// RFC 7638 thumbprint of an RSA public key, base64url encoded.
pub fn thumbprint(public_key: &RsaPublicKey) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = format!(
        r#"{{"e":"{}","kty":"{}","n":"{}"}}"#,
        b64(public_key.e()),
        KEY_TYPE,
        b64(public_key.n())
    );
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

impl KeyEntry {
    /// Wrap a private key; the key id is its thumbprint.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let kid = thumbprint(&private_key.to_public_key());
        Self { kid, private_key }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub fn to_public_jwk(&self) -> PublicJwk {
        PublicJwk {
            kty: KEY_TYPE.to_string(),
            kid: self.kid.clone(),
            key_use: KEY_USE.to_string(),
            alg: KEY_ALGORITHM.to_string(),
            e: b64(self.private_key.e()),
            n: b64(self.private_key.n()),
        }
    }

    pub fn to_private_jwk(&self) -> Result<PrivateJwk, KsError> {
        let (p, q) = match self.private_key.primes() {
            [p, q] => (p, q),
            primes => {
                return Err(KsError::Internal(format!(
                    "expected 2 primes, key has {}",
                    primes.len()
                )))
            }
        };

        Ok(PrivateJwk {
            kty: KEY_TYPE.to_string(),
            kid: self.kid.clone(),
            key_use: KEY_USE.to_string(),
            alg: KEY_ALGORITHM.to_string(),
            e: b64(self.private_key.e()),
            n: b64(self.private_key.n()),
            d: b64(self.private_key.d()),
            p: b64(p),
            q: b64(q),
            dp: self.private_key.dp().map(b64),
            dq: self.private_key.dq().map(b64),
            qi: self.private_key.crt_coefficient().as_ref().map(b64),
        })
    }

    /// Rebuild an entry from its persisted JWK.
    ///
    /// The stored `kid` is kept as is so that tokens already issued under it
    /// still resolve. CRT parameters are recomputed.
    pub fn from_private_jwk(jwk: &PrivateJwk) -> Result<Self, KsError> {
        if jwk.kty != KEY_TYPE || jwk.alg != KEY_ALGORITHM {
            return Err(KsError::DecryptionFailure(format!(
                "unsupported key {}/{} for kid {}",
                jwk.kty, jwk.alg, jwk.kid
            )));
        }

        let private_key = RsaPrivateKey::from_components(
            decode_component("n", &jwk.n)?,
            decode_component("e", &jwk.e)?,
            decode_component("d", &jwk.d)?,
            vec![
                decode_component("p", &jwk.p)?,
                decode_component("q", &jwk.q)?,
            ],
        )
        .map_err(|e| {
            KsError::DecryptionFailure(format!("invalid RSA key for kid {}: {}", jwk.kid, e))
        })?;

        Ok(Self {
            kid: jwk.kid.clone(),
            private_key,
        })
    }

    /// Key for signing tokens with this entry (RS256).
    pub fn encoding_key(&self) -> Result<EncodingKey, KsError> {
        let der = self
            .private_key
            .to_pkcs1_der()
            .map_err(|e| KsError::Internal(format!("PKCS#1 encoding failed: {}", e)))?;
        Ok(EncodingKey::from_rsa_der(der.as_bytes()))
    }

    /// Key for verifying tokens signed by this entry.
    pub fn decoding_key(&self) -> Result<DecodingKey, KsError> {
        let jwk = self.to_public_jwk();
        DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| KsError::Internal(format!("invalid RSA components: {}", e)))
    }
}
