//! Domain models for the aggregated music catalog
//!
//! Every entity is an immutable value snapshot identified by an [`EntityRef`].
//! Relations between entities (a song's artist, an album's track list) are
//! stored as references and resolved through the aggregator on demand.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

/// Name of the provider plugin that owns an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique entity identity: the owning provider plus that provider's
/// local identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub provider: ProviderId,
    pub identifier: String,
}

impl EntityRef {
    pub fn new(provider: impl Into<ProviderId>, identifier: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            identifier: identifier.into(),
        }
    }

    /// Parse the `provider:identifier` form produced by `Display`.
    ///
    /// Only the first `:` separates the two halves, so identifiers may
    /// themselves contain colons.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some((provider, identifier)) if !provider.is_empty() && !identifier.is_empty() => {
                Ok(Self::new(provider, identifier))
            }
            _ => Err(LibraryError::InvalidRef(value.to_string())),
        }
    }

    pub fn is_owned_by(&self, provider: &ProviderId) -> bool {
        &self.provider == provider
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.identifier)
    }
}

/// Identifier assigned to every search dispatched through the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQueryId(pub Uuid);

impl SearchQueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SearchQueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SearchQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Entity Trait
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Song,
    Album,
    Artist,
    Playlist,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Song => "song",
            EntityKind::Album => "album",
            EntityKind::Artist => "artist",
            EntityKind::Playlist => "playlist",
        };
        f.write_str(name)
    }
}

/// Behaviour shared by every catalog entity.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    fn entity_ref(&self) -> &EntityRef;

    /// `false` for placeholders handed out before the provider answered.
    fn is_loaded(&self) -> bool;

    /// Minimal placeholder carrying only the identity.
    fn stub(entity_ref: EntityRef) -> Self;
}

// =============================================================================
// Domain Models
// =============================================================================

/// A playable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub entity_ref: EntityRef,
    pub title: String,
    /// Performing artist, resolved through the aggregator.
    pub artist: Option<EntityRef>,
    /// Album the track belongs to, when known.
    pub album: Option<EntityRef>,
    pub duration_ms: Option<u64>,
    pub track_number: Option<u32>,
    /// Provider-supplied artwork cache key.
    pub art_key: Option<String>,
    /// Remote artwork location used when no art key is available.
    pub art_url: Option<String>,
    pub loaded: bool,
}

impl Song {
    pub fn new(entity_ref: EntityRef, title: impl Into<String>) -> Self {
        Self {
            entity_ref,
            title: title.into(),
            artist: None,
            album: None,
            duration_ms: None,
            track_number: None,
            art_key: None,
            art_url: None,
            loaded: true,
        }
    }

    pub fn with_artist(mut self, artist: EntityRef) -> Self {
        self.artist = Some(artist);
        self
    }

    pub fn with_album(mut self, album: EntityRef) -> Self {
        self.album = Some(album);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_track_number(mut self, track_number: u32) -> Self {
        self.track_number = Some(track_number);
        self
    }

    pub fn with_art_key(mut self, art_key: impl Into<String>) -> Self {
        self.art_key = Some(art_key.into());
        self
    }

    pub fn with_art_url(mut self, art_url: impl Into<String>) -> Self {
        self.art_url = Some(art_url.into());
        self
    }
}

impl Entity for Song {
    const KIND: EntityKind = EntityKind::Song;

    fn entity_ref(&self) -> &EntityRef {
        &self.entity_ref
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn stub(entity_ref: EntityRef) -> Self {
        Self {
            loaded: false,
            ..Self::new(entity_ref, "")
        }
    }
}

/// An album with an ordered track list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub entity_ref: EntityRef,
    pub name: String,
    pub artist: Option<EntityRef>,
    pub songs: Vec<EntityRef>,
    pub year: Option<u16>,
    pub art_key: Option<String>,
    pub loaded: bool,
}

impl Album {
    pub fn new(entity_ref: EntityRef, name: impl Into<String>) -> Self {
        Self {
            entity_ref,
            name: name.into(),
            artist: None,
            songs: Vec::new(),
            year: None,
            art_key: None,
            loaded: true,
        }
    }

    pub fn with_artist(mut self, artist: EntityRef) -> Self {
        self.artist = Some(artist);
        self
    }

    pub fn with_songs(mut self, songs: impl IntoIterator<Item = EntityRef>) -> Self {
        self.songs = songs.into_iter().collect();
        self
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_art_key(mut self, art_key: impl Into<String>) -> Self {
        self.art_key = Some(art_key.into());
        self
    }
}

impl Entity for Album {
    const KIND: EntityKind = EntityKind::Album;

    fn entity_ref(&self) -> &EntityRef {
        &self.entity_ref
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn stub(entity_ref: EntityRef) -> Self {
        Self {
            loaded: false,
            ..Self::new(entity_ref, "")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub entity_ref: EntityRef,
    pub name: String,
    pub albums: Vec<EntityRef>,
    pub loaded: bool,
}

impl Artist {
    pub fn new(entity_ref: EntityRef, name: impl Into<String>) -> Self {
        Self {
            entity_ref,
            name: name.into(),
            albums: Vec::new(),
            loaded: true,
        }
    }

    pub fn with_albums(mut self, albums: impl IntoIterator<Item = EntityRef>) -> Self {
        self.albums = albums.into_iter().collect();
        self
    }
}

impl Entity for Artist {
    const KIND: EntityKind = EntityKind::Artist;

    fn entity_ref(&self) -> &EntityRef {
        &self.entity_ref
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn stub(entity_ref: EntityRef) -> Self {
        Self {
            loaded: false,
            ..Self::new(entity_ref, "")
        }
    }
}

/// User or provider curated list of songs. Order is significant and
/// duplicates are permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub entity_ref: EntityRef,
    pub name: String,
    pub songs: Vec<EntityRef>,
    pub loaded: bool,
}

impl Playlist {
    pub fn new(entity_ref: EntityRef, name: impl Into<String>) -> Self {
        Self {
            entity_ref,
            name: name.into(),
            songs: Vec::new(),
            loaded: true,
        }
    }

    pub fn with_songs(mut self, songs: impl IntoIterator<Item = EntityRef>) -> Self {
        self.songs = songs.into_iter().collect();
        self
    }
}

impl Entity for Playlist {
    const KIND: EntityKind = EntityKind::Playlist;

    fn entity_ref(&self) -> &EntityRef {
        &self.entity_ref
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn stub(entity_ref: EntityRef) -> Self {
        Self {
            loaded: false,
            ..Self::new(entity_ref, "")
        }
    }
}

// =============================================================================
// Search
// =============================================================================

/// A query dispatched to every connected provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: SearchQueryId,
    pub text: String,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: SearchQueryId::new(),
            text: text.into(),
        }
    }
}

/// Search hits for one query, as references into the aggregated view.
///
/// Providers report one `SearchResult` each; the aggregator merges them into
/// a running result that is re-announced on every partial arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query_id: SearchQueryId,
    pub query: String,
    pub songs: Vec<EntityRef>,
    pub albums: Vec<EntityRef>,
    pub artists: Vec<EntityRef>,
    pub playlists: Vec<EntityRef>,
    /// Providers the query was dispatched to that have not answered yet.
    #[serde(default)]
    pub pending_providers: Vec<ProviderId>,
}

impl SearchResult {
    pub fn new(query: &SearchQuery) -> Self {
        Self {
            query_id: query.id,
            query: query.text.clone(),
            songs: Vec::new(),
            albums: Vec::new(),
            artists: Vec::new(),
            playlists: Vec::new(),
            pending_providers: Vec::new(),
        }
    }

    pub fn with_songs(mut self, songs: impl IntoIterator<Item = EntityRef>) -> Self {
        self.songs.extend(songs);
        self
    }

    pub fn with_albums(mut self, albums: impl IntoIterator<Item = EntityRef>) -> Self {
        self.albums.extend(albums);
        self
    }

    pub fn with_artists(mut self, artists: impl IntoIterator<Item = EntityRef>) -> Self {
        self.artists.extend(artists);
        self
    }

    pub fn with_playlists(mut self, playlists: impl IntoIterator<Item = EntityRef>) -> Self {
        self.playlists.extend(playlists);
        self
    }

    /// Append the hits of `other` that are not already present, preserving
    /// arrival order. Returns whether anything was added.
    pub fn merge(&mut self, other: &SearchResult) -> Result<bool> {
        if other.query_id != self.query_id {
            return Err(LibraryError::QueryMismatch {
                expected: self.query_id,
                actual: other.query_id,
            });
        }

        let mut changed = append_unique(&mut self.songs, &other.songs);
        changed |= append_unique(&mut self.albums, &other.albums);
        changed |= append_unique(&mut self.artists, &other.artists);
        changed |= append_unique(&mut self.playlists, &other.playlists);
        Ok(changed)
    }

    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.songs.contains(entity_ref)
            || self.albums.contains(entity_ref)
            || self.artists.contains(entity_ref)
            || self.playlists.contains(entity_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
            && self.albums.is_empty()
            && self.artists.is_empty()
            && self.playlists.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.songs.len() + self.albums.len() + self.artists.len() + self.playlists.len()
    }

    /// `true` once every provider the query was sent to has answered.
    pub fn is_complete(&self) -> bool {
        self.pending_providers.is_empty()
    }
}

fn append_unique(target: &mut Vec<EntityRef>, incoming: &[EntityRef]) -> bool {
    let mut seen: HashSet<EntityRef> = target.iter().cloned().collect();
    let before = target.len();
    for entity_ref in incoming {
        if seen.insert(entity_ref.clone()) {
            target.push(entity_ref.clone());
        }
    }
    target.len() != before
}

// =============================================================================
// Relevance Filtering
// =============================================================================

/// The set of references an observer currently displays.
///
/// Observers test broadcast batches against it to skip redraws for updates
/// that do not concern them. This is a filter, not an identity mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefSet {
    refs: HashSet<EntityRef>,
}

impl RefSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_ref: EntityRef) -> bool {
        self.refs.insert(entity_ref)
    }

    pub fn remove(&mut self, entity_ref: &EntityRef) -> bool {
        self.refs.remove(entity_ref)
    }

    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.refs.contains(entity_ref)
    }

    pub fn contains_entity<E: Entity>(&self, entity: &E) -> bool {
        self.refs.contains(entity.entity_ref())
    }

    /// Whether any entity of a broadcast batch is displayed.
    pub fn intersects<E: Entity>(&self, batch: &[Arc<E>]) -> bool {
        batch.iter().any(|entity| self.contains_entity(entity.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn clear(&mut self) {
        self.refs.clear();
    }
}

impl FromIterator<EntityRef> for RefSet {
    fn from_iter<I: IntoIterator<Item = EntityRef>>(iter: I) -> Self {
        Self {
            refs: iter.into_iter().collect(),
        }
    }
}

impl Extend<EntityRef> for RefSet {
    fn extend<I: IntoIterator<Item = EntityRef>>(&mut self, iter: I) {
        self.refs.extend(iter);
    }
}
