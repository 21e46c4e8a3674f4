// Stratus Infrastructure - Object Store Adapters
// Implements: ObjectStore

mod directory_store;
#[cfg(feature = "s3")]
mod s3_store;

pub use directory_store::DirectoryObjectStore;
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
