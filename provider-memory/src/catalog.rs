//! Catalog storage and text search.

use core_library::{Album, Artist, Entity, EntityRef, Playlist, Song};
use std::collections::BTreeMap;

/// Entities matched by one text search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogHits {
    pub songs: Vec<Song>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub playlists: Vec<Playlist>,
}

impl CatalogHits {
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
            && self.albums.is_empty()
            && self.artists.is_empty()
            && self.playlists.is_empty()
    }
}

/// Entities keyed by identifier. Iteration order is by identifier, so search
/// results are stable.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    songs: BTreeMap<String, Song>,
    albums: BTreeMap<String, Album>,
    artists: BTreeMap<String, Artist>,
    playlists: BTreeMap<String, Playlist>,
}

fn key_of<E: Entity>(entity: &E) -> String {
    entity.entity_ref().identifier.clone()
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_song(mut self, song: Song) -> Self {
        self.insert_song(song);
        self
    }

    pub fn with_album(mut self, album: Album) -> Self {
        self.insert_album(album);
        self
    }

    pub fn with_artist(mut self, artist: Artist) -> Self {
        self.insert_artist(artist);
        self
    }

    pub fn with_playlist(mut self, playlist: Playlist) -> Self {
        self.insert_playlist(playlist);
        self
    }

    pub fn insert_song(&mut self, song: Song) {
        self.songs.insert(key_of(&song), song);
    }

    pub fn insert_album(&mut self, album: Album) {
        self.albums.insert(key_of(&album), album);
    }

    pub fn insert_artist(&mut self, artist: Artist) {
        self.artists.insert(key_of(&artist), artist);
    }

    pub fn insert_playlist(&mut self, playlist: Playlist) {
        self.playlists.insert(key_of(&playlist), playlist);
    }

    pub fn song(&self, identifier: &str) -> Option<&Song> {
        self.songs.get(identifier)
    }

    pub fn album(&self, identifier: &str) -> Option<&Album> {
        self.albums.get(identifier)
    }

    pub fn artist(&self, identifier: &str) -> Option<&Artist> {
        self.artists.get(identifier)
    }

    pub fn playlist(&self, identifier: &str) -> Option<&Playlist> {
        self.playlists.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.songs.len() + self.albums.len() + self.artists.len() + self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Case-insensitive substring match on titles and names. A blank query
    /// matches nothing.
    pub fn search(&self, text: &str) -> CatalogHits {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return CatalogHits::default();
        }
        let matches = |value: &str| value.to_lowercase().contains(&needle);

        CatalogHits {
            songs: self.songs.values().filter(|s| matches(&s.title)).cloned().collect(),
            albums: self.albums.values().filter(|a| matches(&a.name)).cloned().collect(),
            artists: self.artists.values().filter(|a| matches(&a.name)).cloned().collect(),
            playlists: self
                .playlists
                .values()
                .filter(|p| matches(&p.name))
                .cloned()
                .collect(),
        }
    }

    /// References of every entity, for tests and demos.
    pub fn refs(&self) -> Vec<EntityRef> {
        self.songs
            .values()
            .map(|e| e.entity_ref.clone())
            .chain(self.albums.values().map(|e| e.entity_ref.clone()))
            .chain(self.artists.values().map(|e| e.entity_ref.clone()))
            .chain(self.playlists.values().map(|e| e.entity_ref.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .with_song(Song::new(EntityRef::new("mem", "1"), "Moonlight Sonata"))
            .with_song(Song::new(EntityRef::new("mem", "2"), "Blue Moon"))
            .with_song(Song::new(EntityRef::new("mem", "3"), "Sunrise"))
            .with_album(Album::new(EntityRef::new("mem", "a1"), "Harvest Moon"))
            .with_artist(Artist::new(EntityRef::new("mem", "r1"), "Neil Young"))
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let hits = catalog().search("MOON");
        assert_eq!(hits.songs.len(), 2);
        assert_eq!(hits.albums.len(), 1);
        assert!(hits.artists.is_empty());
    }

    #[test]
    fn test_blank_query_matches_nothing() {
        assert!(catalog().search("   ").is_empty());
    }

    #[test]
    fn test_insert_replaces_by_identifier() {
        let mut catalog = catalog();
        catalog.insert_song(Song::new(EntityRef::new("mem", "3"), "Sunset"));
        assert_eq!(catalog.song("3").map(|s| s.title.as_str()), Some("Sunset"));
        assert_eq!(catalog.len(), 5);
    }
}
