use thiserror::Error;

/// Failure of a keyed fetch. Cloned to every caller waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Fetch failed for key '{key}': {message}")]
    FetchFailed { key: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("No artwork source for {0}")]
    NoArtwork(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
