pub mod blob;
pub mod key_object;
pub mod memory;
pub mod s3;

pub use blob::{BlobStore, ObjectMeta, StoreError};
pub use key_object::KeyObjectStore;
pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;
