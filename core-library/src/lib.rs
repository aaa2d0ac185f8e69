//! # Library Model Module
//!
//! Entity model shared by every provider plugin, the aggregator and the
//! playback channel.
//!
//! ## Overview
//!
//! This module provides:
//! - Provider-scoped entity references ([`EntityRef`]) used as the only
//!   identity of songs, albums, artists and playlists
//! - Immutable entity snapshots ([`Song`], [`Album`], [`Artist`], [`Playlist`])
//!   that relate to each other by reference, never by ownership
//! - Search queries and incrementally merged [`SearchResult`]s
//! - The [`EntityStore`] used by the aggregator as its unified view
//!
//! ## Identity
//!
//! Two entities are the same entity when their `(provider, identifier)` pair
//! matches exactly. Tracks reported by different providers are distinct even
//! when their metadata matches.
//!
//! ```
//! use core_library::{EntityRef, RefSet, Song};
//!
//! let song = Song::new(EntityRef::new("p1", "42"), "A");
//! let visible: RefSet = [EntityRef::new("p1", "42")].into_iter().collect();
//! assert!(visible.contains_entity(&song));
//! ```

pub mod error;
pub mod models;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    Album, Artist, Entity, EntityKind, EntityRef, Playlist, ProviderId, RefSet, SearchQuery,
    SearchQueryId, SearchResult, Song,
};
pub use store::{EntityStore, EntityTable, Upsert};
