//! Background tasks for the key service.
//!
//! - `key_rotation` - Periodically rotates the signing key under the distributed lock

pub mod key_rotation;

pub use key_rotation::start_key_rotation;
