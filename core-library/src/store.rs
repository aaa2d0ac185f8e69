//! In-memory entity store backing the aggregated view.
//!
//! The store itself is not synchronized; the aggregator wraps it in a lock so
//! that merge-and-broadcast is serialized while lookups run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Album, Artist, Entity, EntityRef, Playlist, ProviderId, Song};

/// Result of merging one reported entity into a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<E> {
    /// The ref was unknown; the entity is now cached.
    Inserted(Arc<E>),
    /// A different value was cached; it has been replaced.
    Replaced(Arc<E>),
    /// The cached value is equal to, or more complete than, the report.
    Unchanged(Arc<E>),
}

impl<E> Upsert<E> {
    pub fn changed(&self) -> Option<&Arc<E>> {
        match self {
            Upsert::Inserted(entity) | Upsert::Replaced(entity) => Some(entity),
            Upsert::Unchanged(_) => None,
        }
    }

    pub fn into_inner(self) -> Arc<E> {
        match self {
            Upsert::Inserted(entity) | Upsert::Replaced(entity) | Upsert::Unchanged(entity) => {
                entity
            }
        }
    }
}

/// All cached entities of one kind, keyed by ref.
#[derive(Debug)]
pub struct EntityTable<E> {
    entries: HashMap<EntityRef, Arc<E>>,
}

impl<E: Entity> Default for EntityTable<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<E: Entity> EntityTable<E> {
    pub fn get(&self, entity_ref: &EntityRef) -> Option<Arc<E>> {
        self.entries.get(entity_ref).cloned()
    }

    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.entries.contains_key(entity_ref)
    }

    /// Replace the cached copy with `entity`.
    ///
    /// Same ref means replace, never duplicate. An unloaded report never
    /// overwrites a loaded entry.
    pub fn upsert(&mut self, entity: E) -> Upsert<E> {
        match self.entries.get(entity.entity_ref()) {
            Some(existing) if existing.as_ref() == &entity => Upsert::Unchanged(existing.clone()),
            Some(existing) if existing.is_loaded() && !entity.is_loaded() => {
                Upsert::Unchanged(existing.clone())
            }
            Some(_) => {
                let entity = Arc::new(entity);
                self.entries
                    .insert(entity.entity_ref().clone(), entity.clone());
                Upsert::Replaced(entity)
            }
            None => {
                let entity = Arc::new(entity);
                self.entries
                    .insert(entity.entity_ref().clone(), entity.clone());
                Upsert::Inserted(entity)
            }
        }
    }

    /// Return the cached entity, inserting a stub when the ref is unknown.
    /// The flag is `true` when a stub was created.
    pub fn get_or_stub(&mut self, entity_ref: &EntityRef) -> (Arc<E>, bool) {
        if let Some(existing) = self.entries.get(entity_ref) {
            return (existing.clone(), false);
        }
        let stub = Arc::new(E::stub(entity_ref.clone()));
        self.entries.insert(entity_ref.clone(), stub.clone());
        (stub, true)
    }

    /// Refs of every placeholder owned by `provider`.
    pub fn unloaded_refs(&self, provider: &ProviderId) -> Vec<EntityRef> {
        self.entries
            .iter()
            .filter(|(entity_ref, entity)| entity_ref.is_owned_by(provider) && !entity.is_loaded())
            .map(|(entity_ref, _)| entity_ref.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The unified view: one table per entity kind.
#[derive(Debug, Default)]
pub struct EntityStore {
    pub songs: EntityTable<Song>,
    pub albums: EntityTable<Album>,
    pub artists: EntityTable<Artist>,
    pub playlists: EntityTable<Playlist>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.songs.len() + self.albums.len() + self.artists.len() + self.playlists.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, title: &str) -> Song {
        Song::new(EntityRef::new("p1", id), title)
    }

    #[test]
    fn test_upsert_inserts_then_replaces() {
        let mut table = EntityTable::<Song>::default();

        assert!(matches!(table.upsert(song("42", "A")), Upsert::Inserted(_)));
        let replaced = table.upsert(song("42", "B"));
        assert_eq!(replaced.changed().unwrap().title, "B");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&EntityRef::new("p1", "42")).unwrap().title, "B");
    }

    #[test]
    fn test_upsert_same_value_is_unchanged() {
        let mut table = EntityTable::<Song>::default();
        table.upsert(song("42", "A"));

        let outcome = table.upsert(song("42", "A"));
        assert!(outcome.changed().is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stub_never_overwrites_loaded_entry() {
        let mut table = EntityTable::<Song>::default();
        table.upsert(song("42", "A"));

        let outcome = table.upsert(Song::stub(EntityRef::new("p1", "42")));
        assert!(outcome.changed().is_none());
        assert_eq!(outcome.into_inner().title, "A");
    }

    #[test]
    fn test_get_or_stub_creates_once() {
        let mut table = EntityTable::<Album>::default();
        let entity_ref = EntityRef::new("p1", "al");

        let (first, created) = table.get_or_stub(&entity_ref);
        assert!(created);
        assert!(!first.is_loaded());

        let (_, created_again) = table.get_or_stub(&entity_ref);
        assert!(!created_again);
        assert_eq!(table.unloaded_refs(&ProviderId::new("p1")), vec![entity_ref]);
        assert!(table.unloaded_refs(&ProviderId::new("p2")).is_empty());
    }

    #[test]
    fn test_loaded_report_replaces_stub() {
        let mut table = EntityTable::<Song>::default();
        table.get_or_stub(&EntityRef::new("p1", "42"));

        let outcome = table.upsert(song("42", "A"));
        assert!(matches!(outcome, Upsert::Replaced(_)));
        assert!(table.unloaded_refs(&ProviderId::new("p1")).is_empty());
    }
}
