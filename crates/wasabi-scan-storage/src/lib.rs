// wasabi-scan-storage - Region-aware S3-compatible object-store client
//
// Wraps an S3-compatible endpoint (signature v4) behind a small trait so
// the scanner and pipeline can be tested against an in-memory double
// instead of a real bucket.

mod client;
pub mod error;
mod memory;

pub use client::{S3Credentials, S3ObjectStore};
pub use error::{Result, StorageError};
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;

/// One object returned by a `list_page` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
}

/// One page of a `ListObjectsV2`-style paginated listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// ACL applied to an uploaded object. `upload`'s `acl` parameter is
/// `Option<Acl>` rather than a richer enum because the only ACL this
/// crate ever requests is `public-read`; `None` leaves the bucket's
/// default ACL in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    PublicRead,
}

/// Behavior required of an S3-compatible object store.
///
/// Implemented by [`S3ObjectStore`] against a real endpoint and by
/// [`InMemoryObjectStore`] for unit tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Region for `bucket`, cached after the first lookup.
    async fn bucket_region(&self, bucket: &str) -> Result<String>;

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<Page>;

    /// Downloads to a temp file beside `local_path` and renames into
    /// place on success, so a crash mid-transfer never leaves a partial
    /// file at the destination.
    async fn download(&self, bucket: &str, key: &str, local_path: &std::path::Path)
        -> Result<()>;

    /// Uploads `bytes` to `key`. Implementations should attempt a
    /// best-effort empty-body "directory marker" put for the key's
    /// parent prefix first and ignore its failure.
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8], acl: Option<Acl>) -> Result<()>;
}
