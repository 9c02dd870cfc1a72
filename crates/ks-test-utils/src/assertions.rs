//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for served key sets and tokens signed
//! with provider keys.

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use key_service::keys::{JwkSet, KeyEntry};
use serde_json::{json, Value};

/// Sign a short-lived RS256 token with `key`, carrying its kid.
pub fn sign_test_token(key: &KeyEntry, subject: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid().to_string());
    let claims = json!({
        "sub": subject,
        "iat": Utc::now().timestamp(),
        "exp": Utc::now().timestamp() + 300,
    });
    let encoding_key = key.encoding_key().expect("signing key must encode");
    encode(&header, &claims, &encoding_key).expect("token signing must succeed")
}

/// Custom assertions for a served JWK set
///
/// # Example
/// ```rust,ignore
/// jwks.assert_key_count(2)
///     .assert_contains_kid(&new_kid)
///     .assert_verifies(&token);
/// ```
pub trait JwkSetAssertions {
    /// Assert the number of published keys
    fn assert_key_count(&self, expected: usize) -> &Self;

    /// Assert that a key with `kid` is published
    fn assert_contains_kid(&self, kid: &str) -> &Self;

    /// Assert that no key with `kid` is published
    fn assert_lacks_kid(&self, kid: &str) -> &Self;

    /// Assert every key is an RS256 signing key with a unique kid
    fn assert_well_formed(&self) -> &Self;

    /// Assert that `token` verifies against the published key its header names
    fn assert_verifies(&self, token: &str) -> &Self;
}

impl JwkSetAssertions for JwkSet {
    fn assert_key_count(&self, expected: usize) -> &Self {
        assert_eq!(
            self.keys.len(),
            expected,
            "Expected {} published keys, got {:?}",
            expected,
            self.keys.iter().map(|k| &k.kid).collect::<Vec<_>>()
        );
        self
    }

    fn assert_contains_kid(&self, kid: &str) -> &Self {
        assert!(
            self.keys.iter().any(|k| k.kid == kid),
            "Key '{}' is not published",
            kid
        );
        self
    }

    fn assert_lacks_kid(&self, kid: &str) -> &Self {
        assert!(
            self.keys.iter().all(|k| k.kid != kid),
            "Key '{}' should not be published",
            kid
        );
        self
    }

    fn assert_well_formed(&self) -> &Self {
        for key in &self.keys {
            assert_eq!(key.kty, "RSA", "Key '{}' has wrong kty", key.kid);
            assert_eq!(key.alg, "RS256", "Key '{}' has wrong alg", key.kid);
            assert_eq!(key.key_use, "sig", "Key '{}' has wrong use", key.kid);
            assert!(!key.n.is_empty() && !key.e.is_empty());
        }
        let mut kids: Vec<_> = self.keys.iter().map(|k| k.kid.as_str()).collect();
        kids.sort_unstable();
        kids.dedup();
        assert_eq!(kids.len(), self.keys.len(), "Published kids must be unique");
        self
    }

    fn assert_verifies(&self, token: &str) -> &Self {
        let header = decode_header(token).expect("token header must parse");
        let kid = header.kid.expect("token header must carry a kid");
        let jwk = self
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .unwrap_or_else(|| panic!("Token kid '{}' is not published", kid));

        let decoding_key =
            DecodingKey::from_rsa_components(&jwk.n, &jwk.e).expect("published key must decode");
        let result = decode::<Value>(token, &decoding_key, &Validation::new(Algorithm::RS256));
        assert!(
            result.is_ok(),
            "Token failed verification against '{}': {:?}",
            kid,
            result.err()
        );
        self
    }
}
