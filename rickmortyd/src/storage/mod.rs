pub mod blob_store;

pub use blob_store::{BlobError, BlobKey, BlobStore, CloudinaryCredentials, CloudinaryStore};
