pub mod codec;
pub mod oracle;

pub use codec::KeyMaterialCodec;
pub use oracle::{EncryptionOracle, HttpEncryptionOracle, LocalAeadOracle};
