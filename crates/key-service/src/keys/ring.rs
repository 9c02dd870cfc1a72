use super::entry::{JwkSet, KeyEntry};
use super::generator::KeyGenerator;
use crate::errors::KsError;

/// Number of keys kept: the signing key plus one retired verification key.
pub const DEFAULT_RING_CAPACITY: usize = 2;

/// Ordered set of keys, newest first.
///
/// `entries[0]` signs; the rest only verify tokens issued before the last
/// rotation. Never holds more than `capacity` entries.
#[derive(Debug, Clone)]
pub struct KeyRing {
    entries: Vec<KeyEntry>,
    capacity: usize,
}

impl KeyRing {
    /// Build a ring from entries ordered newest first.
    ///
    /// Entries beyond `capacity` are the oldest and are dropped.
    pub fn from_entries(mut entries: Vec<KeyEntry>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        if entries.len() > capacity {
            tracing::warn!(
                target: "ks.keys",
                loaded = entries.len(),
                capacity,
                "Key ring larger than capacity, dropping oldest entries"
            );
            entries.truncate(capacity);
        }
        Self { entries, capacity }
    }

    /// Ring holding one freshly generated key.
    pub fn bootstrap(generator: &dyn KeyGenerator) -> Result<Self, KsError> {
        Ok(Self::from_entries(
            vec![generator.generate()?],
            DEFAULT_RING_CAPACITY,
        ))
    }

    /// Generate a new key, prepend it and drop the oldest entry past capacity.
    ///
    /// Leaves `self` untouched; the caller decides whether to publish the
    /// result.
    pub fn rotate(&self, generator: &dyn KeyGenerator) -> Result<Self, KsError> {
        let new_key = generator.generate()?;
        let mut entries = Vec::with_capacity(self.capacity);
        entries.push(new_key);
        entries.extend(self.entries.iter().take(self.capacity - 1).cloned());
        Ok(Self {
            entries,
            capacity: self.capacity,
        })
    }

    /// Key used to sign new tokens.
    pub fn signing_key(&self) -> Option<&KeyEntry> {
        self.entries.first()
    }

    pub fn find(&self, kid: &str) -> Option<&KeyEntry> {
        self.entries.iter().find(|entry| entry.kid() == kid)
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    pub fn kids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.kid().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Public halves of every entry, newest first.
    pub fn public_jwks(&self) -> JwkSet {
        JwkSet {
            keys: self.entries.iter().map(KeyEntry::to_public_jwk).collect(),
        }
    }
}
