//! Artwork fetcher reading image files with Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    ArtworkFetcher,
};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Reads artwork from a directory of image files.
///
/// An art key maps to the file of the same name (characters outside
/// `[A-Za-z0-9._-]` replaced by `_`). When that file does not exist and the
/// entity carries a `file://` url, the url's path is read instead.
pub struct FileArtworkFetcher {
    root: PathBuf,
}

impl FileArtworkFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Fetcher rooted in the platform cache directory.
    pub fn in_cache_dir() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("omnimusic")
            .join("artwork");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an art key is stored under.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(file_name)
    }

    async fn read(path: &Path) -> Result<Option<Bytes>> {
        match fs::read(path).await {
            Ok(data) => {
                debug!(path = ?path, size = data.len(), "Read artwork file");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[async_trait]
impl ArtworkFetcher for FileArtworkFetcher {
    async fn fetch(&self, key: &str, url: Option<&str>) -> Result<Bytes> {
        if let Some(data) = Self::read(&self.path_for(key)).await? {
            return Ok(data);
        }

        if let Some(path) = url.and_then(|u| u.strip_prefix("file://")) {
            if let Some(data) = Self::read(Path::new(path)).await? {
                return Ok(data);
            }
        }

        Err(BridgeError::NotFound(format!("artwork '{key}'")))
    }
}
