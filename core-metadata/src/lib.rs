//! # Metadata Module
//!
//! Keyed resource caching for the player core.
//!
//! ## Overview
//!
//! - [`KeyedAsyncCache`] guarantees at most one in-flight fetch per key and
//!   shares its result with every concurrent caller
//! - [`ArtworkCache`] derives art keys from entities and serves artwork
//!   through a `KeyedAsyncCache`, falling back to a placeholder

pub mod artwork;
pub mod cache;
pub mod error;

pub use artwork::{ArtKey, ArtworkCache, DEFAULT_ART_KEY};
pub use cache::{CacheStats, EntryState, KeyedAsyncCache};
pub use error::{CacheError, MetadataError, Result};
