//! # Artwork Cache
//!
//! Serves album and song artwork through a [`KeyedAsyncCache`].
//!
//! ## Overview
//!
//! Every song or album maps to an [`ArtKey`]:
//! - the provider supplied art key, when present
//! - otherwise the remote art url, when present
//! - otherwise [`ArtKey::Default`], which is never fetched
//!
//! [`ArtworkCache::artwork`] always answers: a resolved entry, a freshly
//! fetched one, or the placeholder when the fetch fails or the entity has no
//! artwork at all. Concurrent requests for the same key share one fetch.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::ArtworkCache;
//!
//! let cache = ArtworkCache::new(fetcher, Some(256));
//! let bytes = cache.artwork_for_song(&song).await;
//! ```

use bridge_traits::ArtworkFetcher;
use bytes::Bytes;
use core_library::{Album, Song};
use core_runtime::logging::redact_url;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::cache::{CacheStats, EntryState, KeyedAsyncCache};
use crate::error::{MetadataError, Result};

/// Cache key reserved for the built-in placeholder art.
pub const DEFAULT_ART_KEY: &str = "default-art";

/// Where an entity's artwork comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtKey {
    /// Provider supplied key, with the remote url if the provider knows one.
    Provided { key: String, url: Option<String> },
    /// Only a remote url is known.
    Url(String),
    /// No artwork; always served from the placeholder.
    Default,
}

impl ArtKey {
    pub fn for_song(song: &Song) -> Self {
        Self::from_parts(song.art_key.as_deref(), song.art_url.as_deref())
    }

    pub fn for_album(album: &Album) -> Self {
        Self::from_parts(album.art_key.as_deref(), None)
    }

    fn from_parts(key: Option<&str>, url: Option<&str>) -> Self {
        match (key.filter(|k| !k.is_empty()), url.filter(|u| !u.is_empty())) {
            (Some(key), url) => ArtKey::Provided {
                key: key.to_string(),
                url: url.map(str::to_string),
            },
            (None, Some(url)) => ArtKey::Url(url.to_string()),
            (None, None) => ArtKey::Default,
        }
    }

    /// Key under which the artwork is cached.
    pub fn cache_key(&self) -> String {
        match self {
            ArtKey::Provided { key, .. } => key.clone(),
            ArtKey::Url(url) => format!("url:{url}"),
            ArtKey::Default => DEFAULT_ART_KEY.to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ArtKey::Default)
    }

    fn fetch_args(&self) -> (String, Option<String>) {
        match self {
            ArtKey::Provided { key, url } => (key.clone(), url.clone()),
            ArtKey::Url(url) => (url.clone(), Some(url.clone())),
            ArtKey::Default => (DEFAULT_ART_KEY.to_string(), None),
        }
    }
}

impl fmt::Display for ArtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

pub struct ArtworkCache {
    cache: KeyedAsyncCache<String, Bytes>,
    fetcher: Arc<dyn ArtworkFetcher>,
    placeholder: Arc<Bytes>,
}

impl ArtworkCache {
    /// `capacity` bounds the number of resolved images kept; `None` keeps
    /// everything.
    pub fn new(fetcher: Arc<dyn ArtworkFetcher>, capacity: Option<usize>) -> Self {
        Self {
            cache: KeyedAsyncCache::with_capacity("artwork", capacity),
            fetcher,
            placeholder: Arc::new(Bytes::new()),
        }
    }

    pub fn with_placeholder(mut self, placeholder: Bytes) -> Self {
        self.placeholder = Arc::new(placeholder);
        self
    }

    pub fn placeholder(&self) -> Arc<Bytes> {
        Arc::clone(&self.placeholder)
    }

    /// Artwork for `key`, or the placeholder if there is none or the fetch
    /// fails.
    #[instrument(skip(self, key), fields(key = redact_url(&key.cache_key())))]
    pub async fn artwork(&self, key: &ArtKey) -> Arc<Bytes> {
        if key.is_default() {
            return self.placeholder();
        }
        let fetch = self.fetch_for(key);
        self.cache
            .get_or_fetch(key.cache_key(), fetch, self.placeholder())
            .await
    }

    pub async fn artwork_for_song(&self, song: &Song) -> Arc<Bytes> {
        self.artwork(&ArtKey::for_song(song)).await
    }

    pub async fn artwork_for_album(&self, album: &Album) -> Arc<Bytes> {
        self.artwork(&ArtKey::for_album(album)).await
    }

    /// Like [`artwork`](Self::artwork) but reports failures instead of
    /// substituting the placeholder.
    pub async fn try_artwork(&self, key: &ArtKey) -> Result<Arc<Bytes>> {
        if key.is_default() {
            return Err(MetadataError::NoArtwork(key.cache_key()));
        }
        let fetch = self.fetch_for(key);
        Ok(self.cache.try_get_or_fetch(key.cache_key(), fetch).await?)
    }

    fn fetch_for(
        &self,
        key: &ArtKey,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, bridge_traits::Result<Bytes>> {
        let fetcher = Arc::clone(&self.fetcher);
        let (fetch_key, url) = key.fetch_args();
        move || {
            Box::pin(async move {
                debug!(key = redact_url(&fetch_key), "Fetching artwork");
                fetcher.fetch(&fetch_key, url.as_deref()).await
            })
        }
    }

    pub fn peek(&self, key: &ArtKey) -> EntryState<Bytes> {
        if key.is_default() {
            return EntryState::Resolved(self.placeholder());
        }
        self.cache.peek(&key.cache_key())
    }

    pub fn invalidate(&self, key: &ArtKey) -> bool {
        self.cache.invalidate(&key.cache_key())
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl fmt::Debug for ArtworkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtworkCache")
            .field("cache", &self.cache)
            .field("placeholder_len", &self.placeholder.len())
            .finish()
    }
}
