//! Artwork source abstraction.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Loads artwork bytes for an art key.
///
/// `url` is the remote location known for the entity, if any. Implementations
/// decide whether to use the key, the url or both.
#[async_trait]
pub trait ArtworkFetcher: Send + Sync {
    async fn fetch(&self, key: &str, url: Option<&str>) -> Result<Bytes>;
}
