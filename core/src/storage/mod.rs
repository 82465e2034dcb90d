pub mod s3;

use std::path::Path;

use crate::errors::StorageError;

pub use self::s3::S3Storage;

/// A bucket that archive files are mirrored into.
#[allow(async_fn_in_trait)]
pub trait ObjectStorage: Send + Sync {
    /// Bucket name, for logs.
    fn bucket(&self) -> &str;

    /// Full object key for a file name, including any configured prefix.
    fn object_key(&self, name: &str) -> String;

    /// Succeeds if the bucket exists or was created; a bucket owned by
    /// someone else is [`StorageError::BucketForbidden`].
    async fn ensure_bucket(&self) -> Result<(), StorageError>;

    async fn upload_file(&self, key: &str, path: &Path) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Joins a key prefix and a name with exactly one `/`.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
