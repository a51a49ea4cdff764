//! File storage contract (media attachment buckets).

use async_trait::async_trait;

use confide_shared::TransportError;

/// Blob storage the backend exposes per named bucket.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Upload a blob. Overwrites any existing object at the same path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError>;

    /// Stable public URL of an object. Does not verify existence.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Paths under a prefix, lexicographically ordered.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError>;

    /// Remove objects; missing paths are ignored.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), TransportError>;
}
