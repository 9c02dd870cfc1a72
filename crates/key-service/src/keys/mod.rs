pub mod entry;
pub mod generator;
pub mod ring;

pub use entry::{JwkSet, KeyEntry, PrivateJwk, PublicJwk};
pub use generator::{KeyGenerator, RsaKeyGenerator};
pub use ring::{KeyRing, DEFAULT_RING_CAPACITY};
