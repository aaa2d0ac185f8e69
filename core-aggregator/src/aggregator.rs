//! # Provider Aggregator
//!
//! The single merge point for entity reports from every provider plugin and
//! the lookup surface the UI reads the catalog through.
//!
//! ## Overview
//!
//! - Reports are merged into an [`EntityStore`]: same ref replaces, never
//!   duplicates. Entities owned by another provider than the reporter are
//!   rejected.
//! - Only entities whose cached value changed are broadcast, so delivering
//!   the same report twice leaves both the view and the observers untouched.
//! - `retrieve_*` never waits on a provider. An unknown ref yields an
//!   unloaded stub and the owning provider is asked to resolve it; the answer
//!   arrives through the normal update callbacks.
//! - Searches fan out to every connected provider and the running result is
//!   re-announced on every partial arrival under the same query id.
//!
//! ## Consistency
//!
//! Merge and broadcast run under one dispatch lock, so observers see updates
//! in commit order and each broadcast carries the latest merged values.
//! Lookups take a read lock on the store and run concurrently with each
//! other. Observers are called after the store lock is released and may call
//! back into `retrieve_*` or `lookup_*`.

use bridge_traits::{MusicProvider, ReporterFactory};
use core_library::{
    Album, Artist, Entity, EntityKind, EntityRef, EntityStore, EntityTable, Playlist, ProviderId,
    SearchQuery, SearchQueryId, SearchResult, Song,
};
use core_plugins::{ProviderRegistry, RegistryError};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_runtime::{ObserverId, ObserverList};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

use crate::error::{AggregatorError, Result};
use crate::observer::ProviderObserver;
use crate::search::{self, SearchSessions};

/// Default number of searches whose results stay queryable.
pub const DEFAULT_MAX_TRACKED_SEARCHES: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct AggregatorOptions {
    pub max_tracked_searches: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            max_tracked_searches: DEFAULT_MAX_TRACKED_SEARCHES,
        }
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_tracked_searches: config.max_tracked_searches,
        }
    }
}

// =============================================================================
// Per-kind plumbing
// =============================================================================

/// Ties an entity kind to its table and its observer callback.
pub(crate) trait Stored: Entity {
    fn table(store: &EntityStore) -> &EntityTable<Self>;

    fn table_mut(store: &mut EntityStore) -> &mut EntityTable<Self>;

    fn announce(observer: &dyn ProviderObserver, batch: &[Arc<Self>]);
}

impl Stored for Song {
    fn table(store: &EntityStore) -> &EntityTable<Self> {
        &store.songs
    }

    fn table_mut(store: &mut EntityStore) -> &mut EntityTable<Self> {
        &mut store.songs
    }

    fn announce(observer: &dyn ProviderObserver, batch: &[Arc<Self>]) {
        observer.on_song_update(batch);
    }
}

impl Stored for Album {
    fn table(store: &EntityStore) -> &EntityTable<Self> {
        &store.albums
    }

    fn table_mut(store: &mut EntityStore) -> &mut EntityTable<Self> {
        &mut store.albums
    }

    fn announce(observer: &dyn ProviderObserver, batch: &[Arc<Self>]) {
        observer.on_album_update(batch);
    }
}

impl Stored for Artist {
    fn table(store: &EntityStore) -> &EntityTable<Self> {
        &store.artists
    }

    fn table_mut(store: &mut EntityStore) -> &mut EntityTable<Self> {
        &mut store.artists
    }

    fn announce(observer: &dyn ProviderObserver, batch: &[Arc<Self>]) {
        observer.on_artist_update(batch);
    }
}

impl Stored for Playlist {
    fn table(store: &EntityStore) -> &EntityTable<Self> {
        &store.playlists
    }

    fn table_mut(store: &mut EntityStore) -> &mut EntityTable<Self> {
        &mut store.playlists
    }

    fn announce(observer: &dyn ProviderObserver, batch: &[Arc<Self>]) {
        observer.on_playlist_update(batch);
    }
}

type PendingRequest = (EntityKind, EntityRef);

// =============================================================================
// Aggregator
// =============================================================================

/// Process-wide aggregated view of every provider's catalog.
pub struct ProviderAggregator {
    registry: Arc<ProviderRegistry>,
    events: EventBus,
    store: RwLock<EntityStore>,
    observers: ObserverList<dyn ProviderObserver>,
    searches: Mutex<SearchSessions>,
    /// Refs with a provider request in flight.
    requested: Mutex<HashSet<PendingRequest>>,
    /// Serializes merge-and-broadcast.
    dispatch: Mutex<()>,
    this: Weak<ProviderAggregator>,
}

impl ProviderAggregator {
    /// Create the aggregator and route the registry's provider reports to it.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        events: EventBus,
        options: AggregatorOptions,
    ) -> Arc<Self> {
        let aggregator = Arc::new_cyclic(|this| Self {
            registry: Arc::clone(&registry),
            events,
            store: RwLock::new(EntityStore::new()),
            observers: ObserverList::new("provider-observers"),
            searches: Mutex::new(SearchSessions::new(options.max_tracked_searches)),
            requested: Mutex::new(HashSet::new()),
            dispatch: Mutex::new(()),
            this: this.clone(),
        });
        let factory: Weak<dyn ReporterFactory> = Arc::downgrade(&aggregator) as Weak<ProviderAggregator>;
        registry.attach_reporter_factory(factory);
        aggregator
    }

    pub(crate) fn downgrade(&self) -> Weak<ProviderAggregator> {
        self.this.clone()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn emit(&self, event: LibraryEvent) {
        self.events.emit(CoreEvent::Library(event)).ok();
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn ProviderObserver>) -> ObserverId {
        let id = self.observers.register(observer);
        debug!(observer = %id, "Observer added");
        id
    }

    /// Stop deliveries to an observer. Returns `false` if it was not
    /// registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // -------------------------------------------------------------------------
    // Merging reports
    // -------------------------------------------------------------------------

    pub(crate) fn merge_entities<E: Stored>(&self, provider: &ProviderId, entities: Vec<E>) {
        let reported = entities.len();
        let owned: Vec<E> = entities
            .into_iter()
            .filter(|e| e.entity_ref().is_owned_by(provider))
            .collect();
        if owned.len() != reported {
            self.reject(provider, E::KIND, reported - owned.len());
        }
        if owned.is_empty() {
            return;
        }

        let answered: Vec<PendingRequest> = owned
            .iter()
            .filter(|e| e.is_loaded())
            .map(|e| (E::KIND, e.entity_ref().clone()))
            .collect();

        let _dispatch = self.dispatch.lock();
        let changed = {
            let mut store = self.store.write();
            let table = E::table_mut(&mut store);
            let mut changed: Vec<Arc<E>> = Vec::new();
            for entity in owned {
                if let Some(merged) = table.upsert(entity).changed() {
                    // A batch may carry the same ref twice; the last report wins.
                    changed.retain(|c| c.entity_ref() != merged.entity_ref());
                    changed.push(Arc::clone(merged));
                }
            }
            changed
        };

        {
            let mut requested = self.requested.lock();
            for pending in &answered {
                requested.remove(pending);
            }
        }

        if changed.is_empty() {
            debug!(provider = %provider, kind = %E::KIND, reported, "Report changed nothing");
            return;
        }

        debug!(provider = %provider, kind = %E::KIND, changed = changed.len(), "Merged report");
        self.emit(LibraryEvent::EntitiesMerged {
            provider_id: provider.to_string(),
            kind: E::KIND.to_string(),
            changed: changed.len(),
        });
        self.observers.notify(|observer| E::announce(observer, &changed));
    }

    fn reject(&self, provider: &ProviderId, kind: EntityKind, count: usize) {
        warn!(
            provider = %provider,
            kind = %kind,
            count,
            "Dropped entities reported for another provider"
        );
        self.emit(LibraryEvent::ReportRejected {
            provider_id: provider.to_string(),
            reason: format!("{count} {kind} entities owned by another provider"),
        });
    }

    pub(crate) fn merge_search_result(&self, provider: &ProviderId, partial: SearchResult) {
        let (partial, dropped) = search::scoped(provider, partial);
        if dropped > 0 {
            warn!(provider = %provider, dropped, "Dropped search hits owned by another provider");
            self.emit(LibraryEvent::ReportRejected {
                provider_id: provider.to_string(),
                reason: format!("{dropped} search hits owned by another provider"),
            });
        }

        let _dispatch = self.dispatch.lock();
        let merged = self.searches.lock().apply(provider, &partial);
        match merged {
            Some(merged) => self.announce_search(&merged),
            None => warn!(
                provider = %provider,
                query_id = %partial.query_id,
                "Search result for unknown query dropped"
            ),
        }
    }

    fn announce_search(&self, merged: &SearchResult) {
        debug!(
            query_id = %merged.query_id,
            hits = merged.hit_count(),
            complete = merged.is_complete(),
            "Search updated"
        );
        self.emit(LibraryEvent::SearchUpdated {
            query_id: merged.query_id.to_string(),
            hits: merged.hit_count(),
            complete: merged.is_complete(),
        });
        self.observers.notify(|observer| observer.on_search_result(merged));
    }

    /// Announce the connection and ask the provider again for every stub it
    /// owns.
    pub(crate) fn provider_connected(&self, provider: &ProviderId) {
        info!(provider = %provider, "Provider reported connected");
        self.observers
            .notify(|observer| observer.on_provider_connected(provider));

        let stubs: Vec<PendingRequest> = {
            let store = self.store.read();
            let tag = |kind: EntityKind| move |r: EntityRef| (kind, r);
            store
                .songs
                .unloaded_refs(provider)
                .into_iter()
                .map(tag(EntityKind::Song))
                .chain(store.albums.unloaded_refs(provider).into_iter().map(tag(EntityKind::Album)))
                .chain(store.artists.unloaded_refs(provider).into_iter().map(tag(EntityKind::Artist)))
                .chain(
                    store
                        .playlists
                        .unloaded_refs(provider)
                        .into_iter()
                        .map(tag(EntityKind::Playlist)),
                )
                .collect()
        };
        if stubs.is_empty() {
            return;
        }

        debug!(provider = %provider, count = stubs.len(), "Re-requesting unresolved entities");
        for (kind, entity_ref) in stubs {
            self.requested.lock().remove(&(kind, entity_ref.clone()));
            self.request(kind, entity_ref);
        }
    }

    // -------------------------------------------------------------------------
    // Retrieval
    // -------------------------------------------------------------------------

    fn retrieve<E: Stored>(&self, entity_ref: &EntityRef) -> Arc<E> {
        if let Some(entity) = E::table(&self.store.read()).get(entity_ref) {
            if entity.is_loaded() {
                return entity;
            }
        }

        let (entity, _) = E::table_mut(&mut self.store.write()).get_or_stub(entity_ref);
        if !entity.is_loaded() {
            self.request(E::KIND, entity_ref.clone());
        }
        entity
    }

    fn lookup<E: Stored>(&self, entity_ref: &EntityRef) -> Result<Arc<E>> {
        E::table(&self.store.read())
            .get(entity_ref)
            .filter(|entity| entity.is_loaded())
            .ok_or_else(|| AggregatorError::NotFound {
                kind: E::KIND,
                entity_ref: entity_ref.clone(),
            })
    }

    /// The cached song, or an unloaded stub while the owning provider is
    /// asked for it. Never waits on the provider.
    pub fn retrieve_song(&self, entity_ref: &EntityRef) -> Arc<Song> {
        self.retrieve(entity_ref)
    }

    pub fn retrieve_album(&self, entity_ref: &EntityRef) -> Arc<Album> {
        self.retrieve(entity_ref)
    }

    pub fn retrieve_artist(&self, entity_ref: &EntityRef) -> Arc<Artist> {
        self.retrieve(entity_ref)
    }

    pub fn retrieve_playlist(&self, entity_ref: &EntityRef) -> Arc<Playlist> {
        self.retrieve(entity_ref)
    }

    /// The cached song if a provider has reported it.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::NotFound`] when the ref is unknown or only a stub.
    pub fn lookup_song(&self, entity_ref: &EntityRef) -> Result<Arc<Song>> {
        self.lookup(entity_ref)
    }

    pub fn lookup_album(&self, entity_ref: &EntityRef) -> Result<Arc<Album>> {
        self.lookup(entity_ref)
    }

    pub fn lookup_artist(&self, entity_ref: &EntityRef) -> Result<Arc<Artist>> {
        self.lookup(entity_ref)
    }

    pub fn lookup_playlist(&self, entity_ref: &EntityRef) -> Result<Arc<Playlist>> {
        self.lookup(entity_ref)
    }

    /// `true` when a loaded entity of any kind with this ref is cached.
    ///
    /// Observers use it to decide whether a broadcast touches what they
    /// display; it says nothing about identity across providers.
    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        let store = self.store.read();
        let loaded = |found: Option<bool>| found.unwrap_or(false);
        loaded(store.songs.get(entity_ref).map(|e| e.is_loaded()))
            || loaded(store.albums.get(entity_ref).map(|e| e.is_loaded()))
            || loaded(store.artists.get(entity_ref).map(|e| e.is_loaded()))
            || loaded(store.playlists.get(entity_ref).map(|e| e.is_loaded()))
    }

    /// Number of cached entities, stubs included.
    pub fn entity_count(&self) -> usize {
        self.store.read().entity_count()
    }

    /// Ask the owning provider for a fresh copy of an entity, loaded or not.
    ///
    /// Returns once the provider accepted the request; the answer arrives
    /// through the update callbacks.
    ///
    /// # Errors
    ///
    /// - [`AggregatorError::ProviderUnavailable`] if the owning provider is
    ///   not connected
    /// - [`AggregatorError::RequestFailed`] if the provider rejected it
    #[instrument(skip(self), fields(entity = %entity_ref))]
    pub async fn refresh(&self, kind: EntityKind, entity_ref: &EntityRef) -> Result<()> {
        self.send_request(kind, entity_ref).await
    }

    fn request(&self, kind: EntityKind, entity_ref: EntityRef) {
        if !self.requested.lock().insert((kind, entity_ref.clone())) {
            return;
        }

        let runtime = tokio::runtime::Handle::try_current().ok();
        let (Some(aggregator), Some(runtime)) = (self.this.upgrade(), runtime) else {
            warn!(entity = %entity_ref, "No Tokio runtime; entity request not sent");
            self.requested.lock().remove(&(kind, entity_ref));
            return;
        };

        runtime.spawn(async move {
            if let Err(err) = aggregator.send_request(kind, &entity_ref).await {
                aggregator.requested.lock().remove(&(kind, entity_ref.clone()));
                debug!(entity = %entity_ref, %kind, error = %err, "Entity request not sent");
            }
        });
    }

    async fn send_request(&self, kind: EntityKind, entity_ref: &EntityRef) -> Result<()> {
        let provider = self.connected_provider(&entity_ref.provider)?;
        let identifier = entity_ref.identifier.as_str();
        let outcome = match kind {
            EntityKind::Song => provider.request_song(identifier).await,
            EntityKind::Album => provider.request_album(identifier).await,
            EntityKind::Artist => provider.request_artist(identifier).await,
            EntityKind::Playlist => provider.request_playlist(identifier).await,
        };

        outcome.map_err(|err| {
            if err.is_disconnect() {
                self.registry
                    .notify_disconnected(&entity_ref.provider, &err.to_string());
            }
            AggregatorError::RequestFailed {
                provider: entity_ref.provider.clone(),
                message: err.to_string(),
            }
        })
    }

    fn connected_provider(&self, provider: &ProviderId) -> Result<Arc<dyn MusicProvider>> {
        self.registry.provider(provider).map_err(|err| match err {
            RegistryError::UnknownProvider(id) | RegistryError::ProviderUnavailable(id) => {
                AggregatorError::ProviderUnavailable(id)
            }
            other => other.into(),
        })
    }

    // -------------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------------

    /// Tracks of an album in album order, stubs for those not yet reported.
    pub fn album_songs(&self, album: &Album) -> Vec<Arc<Song>> {
        album.songs.iter().map(|r| self.retrieve_song(r)).collect()
    }

    /// Tracks of a playlist in playlist order, duplicates kept.
    pub fn playlist_songs(&self, playlist: &Playlist) -> Vec<Arc<Song>> {
        playlist.songs.iter().map(|r| self.retrieve_song(r)).collect()
    }

    pub fn artist_albums(&self, artist: &Artist) -> Vec<Arc<Album>> {
        artist.albums.iter().map(|r| self.retrieve_album(r)).collect()
    }

    pub fn song_artist(&self, song: &Song) -> Option<Arc<Artist>> {
        song.artist.as_ref().map(|r| self.retrieve_artist(r))
    }

    pub fn song_album(&self, song: &Song) -> Option<Arc<Album>> {
        song.album.as_ref().map(|r| self.retrieve_album(r))
    }

    // -------------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------------

    /// Send `text` to every connected provider.
    ///
    /// Returns once every provider accepted or refused the query. Results are
    /// announced through [`ProviderObserver::on_search_result`] as each
    /// provider answers, always tagged with the returned id. A provider that
    /// refuses the query counts as answered without hits.
    ///
    /// # Arguments
    ///
    /// * `text` - Free-text query, interpreted by each provider
    ///
    /// # Errors
    ///
    /// [`AggregatorError::NoProviders`] when no provider is connected.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let query_id = aggregator.search("moon").await?;
    /// // observers receive on_search_result(..) with result.query_id == query_id
    /// ```
    #[instrument(skip(self))]
    pub async fn search(&self, text: &str) -> Result<SearchQueryId> {
        let providers = self.registry.connected_providers();
        if providers.is_empty() {
            return Err(AggregatorError::NoProviders);
        }

        let query = SearchQuery::new(text);
        let mut session = SearchResult::new(&query);
        session.pending_providers = providers
            .iter()
            .map(|provider| provider.provider_id().clone())
            .collect();
        if let Some(evicted) = self.searches.lock().start(session) {
            debug!(query_id = %evicted, "Evicted oldest search session");
        }

        info!(query_id = %query.id, providers = providers.len(), "Search dispatched");
        self.emit(LibraryEvent::SearchStarted {
            query_id: query.id.to_string(),
            query: query.text.clone(),
            providers: providers.len(),
        });

        let dispatches = providers.iter().map(|provider| {
            let query = &query;
            async move { (provider.provider_id().clone(), provider.search(query).await) }
        });

        for (provider_id, outcome) in join_all(dispatches).await {
            let Err(err) = outcome else { continue };
            warn!(provider = %provider_id, error = %err, "Provider refused search");
            if err.is_disconnect() {
                self.registry.notify_disconnected(&provider_id, &err.to_string());
            }

            let _dispatch = self.dispatch.lock();
            let abandoned = self.searches.lock().abandon(&query.id, &provider_id);
            if let Some(merged) = abandoned {
                self.announce_search(&merged);
            }
        }

        Ok(query.id)
    }

    /// Merged result so far of a recent search.
    pub fn search_result(&self, query_id: &SearchQueryId) -> Option<SearchResult> {
        self.searches.lock().get(query_id).cloned()
    }
}

impl fmt::Debug for ProviderAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAggregator")
            .field("entities", &self.entity_count())
            .field("observers", &self.observers.len())
            .field("pending_requests", &self.requested.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        error::Result as BridgeResult, BridgeError, ProviderConnector, ProviderReporter,
    };
    use core_plugins::RegistryOptions;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingObserver {
        songs: Mutex<Vec<Vec<Arc<Song>>>>,
        connected: Mutex<Vec<ProviderId>>,
    }

    impl RecordingObserver {
        fn song_batches(&self) -> Vec<Vec<Arc<Song>>> {
            self.songs.lock().clone()
        }
    }

    impl ProviderObserver for RecordingObserver {
        fn on_song_update(&self, songs: &[Arc<Song>]) {
            self.songs.lock().push(songs.to_vec());
        }

        fn on_provider_connected(&self, provider: &ProviderId) {
            self.connected.lock().push(provider.clone());
        }
    }

    /// Provider that records requests and answers nothing.
    struct RecordingProvider {
        id: ProviderId,
        requests: Mutex<Vec<String>>,
        fail_with: Option<BridgeError>,
    }

    #[async_trait]
    impl MusicProvider for RecordingProvider {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }

        async fn request_song(&self, identifier: &str) -> BridgeResult<()> {
            self.requests.lock().push(identifier.to_string());
            match &self.fail_with {
                Some(BridgeError::Disconnected(reason)) => {
                    Err(BridgeError::Disconnected(reason.clone()))
                }
                Some(_) => Err(BridgeError::NotFound(identifier.to_string())),
                None => Ok(()),
            }
        }

        async fn request_album(&self, identifier: &str) -> BridgeResult<()> {
            self.request_song(identifier).await
        }

        async fn request_artist(&self, identifier: &str) -> BridgeResult<()> {
            self.request_song(identifier).await
        }

        async fn request_playlist(&self, identifier: &str) -> BridgeResult<()> {
            self.request_song(identifier).await
        }

        async fn search(&self, _query: &SearchQuery) -> BridgeResult<()> {
            Err(BridgeError::OperationFailed("search index offline".to_string()))
        }
    }

    struct RecordingConnector {
        provider: Arc<RecordingProvider>,
    }

    #[async_trait]
    impl ProviderConnector for RecordingConnector {
        fn provider_id(&self) -> ProviderId {
            self.provider.id.clone()
        }

        async fn connect(
            &self,
            _reporter: Arc<dyn ProviderReporter>,
        ) -> BridgeResult<Arc<dyn MusicProvider>> {
            Ok(self.provider.clone())
        }
    }

    fn setup() -> (Arc<ProviderRegistry>, Arc<ProviderAggregator>) {
        setup_with(RegistryOptions::default())
    }

    fn setup_with(options: RegistryOptions) -> (Arc<ProviderRegistry>, Arc<ProviderAggregator>) {
        let registry = ProviderRegistry::new(options, EventBus::default());
        let aggregator = ProviderAggregator::new(
            Arc::clone(&registry),
            EventBus::default(),
            AggregatorOptions::default(),
        );
        (registry, aggregator)
    }

    async fn connected(
        registry: &Arc<ProviderRegistry>,
        fail_with: Option<BridgeError>,
    ) -> Arc<RecordingProvider> {
        let provider = Arc::new(RecordingProvider {
            id: ProviderId::new("p1"),
            requests: Mutex::new(Vec::new()),
            fail_with,
        });
        let id = registry
            .register_provider(Arc::new(RecordingConnector {
                provider: provider.clone(),
            }))
            .unwrap();
        registry.connect(&id).await.unwrap();
        provider
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn song(id: &str, title: &str) -> Song {
        Song::new(EntityRef::new("p1", id), title)
    }

    #[test]
    fn test_report_reaches_observer_once() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        let reporter = aggregator.reporter_for(&ProviderId::new("p1"));

        reporter.report_songs(vec![song("42", "A")]);

        let batches = observer.song_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].title, "A");
    }

    #[test]
    fn test_identical_report_is_not_rebroadcast() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        let reporter = aggregator.reporter_for(&ProviderId::new("p1"));

        reporter.report_songs(vec![song("42", "A")]);
        reporter.report_songs(vec![song("42", "A")]);

        assert_eq!(observer.song_batches().len(), 1);
        assert_eq!(aggregator.entity_count(), 1);
    }

    #[test]
    fn test_rereport_replaces_cached_value() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        let reporter = aggregator.reporter_for(&ProviderId::new("p1"));

        reporter.report_songs(vec![song("42", "A")]);
        reporter.report_songs(vec![song("42", "B")]);

        let batches = observer.song_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].title, "B");
        let current = aggregator.lookup_song(&EntityRef::new("p1", "42")).unwrap();
        assert_eq!(current.title, "B");
    }

    #[test]
    fn test_batch_keeps_last_report_per_ref() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        let reporter = aggregator.reporter_for(&ProviderId::new("p1"));

        reporter.report_songs(vec![song("1", "first"), song("2", "other"), song("1", "second")]);

        let batch = &observer.song_batches()[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].title, "second");
        assert_eq!(
            aggregator.lookup_song(&EntityRef::new("p1", "1")).unwrap().title,
            "second"
        );
    }

    #[test]
    fn test_foreign_entities_are_rejected() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        let mut events = aggregator.events.subscribe();
        let reporter = aggregator.reporter_for(&ProviderId::new("p2"));

        reporter.report_songs(vec![song("42", "A")]);

        assert!(observer.song_batches().is_empty());
        assert!(!aggregator.contains(&EntityRef::new("p1", "42")));
        assert!(matches!(
            events.try_recv(),
            Ok(CoreEvent::Library(LibraryEvent::ReportRejected { .. }))
        ));
    }

    #[test]
    fn test_removed_observer_receives_nothing() {
        let (_registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        let id = aggregator.add_observer(observer.clone());
        assert!(aggregator.remove_observer(id));
        assert!(!aggregator.remove_observer(id));

        aggregator
            .reporter_for(&ProviderId::new("p1"))
            .report_songs(vec![song("42", "A")]);

        assert!(observer.song_batches().is_empty());
    }

    #[test]
    fn test_lookup_of_unknown_ref_is_not_found() {
        let (_registry, aggregator) = setup();
        let entity_ref = EntityRef::new("p1", "missing");

        let err = aggregator.lookup_album(&entity_ref).unwrap_err();
        assert_eq!(
            err,
            AggregatorError::NotFound {
                kind: EntityKind::Album,
                entity_ref,
            }
        );
    }

    #[tokio::test]
    async fn test_retrieve_returns_stub_and_requests_once() {
        let (registry, aggregator) = setup();
        let provider = connected(&registry, None).await;
        let entity_ref = EntityRef::new("p1", "42");

        let stub = aggregator.retrieve_song(&entity_ref);
        assert!(!stub.is_loaded());
        assert_eq!(stub.entity_ref, entity_ref);
        let again = aggregator.retrieve_song(&entity_ref);
        assert!(!again.is_loaded());

        eventually(|| provider.requests.lock().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(provider.requests.lock().as_slice(), ["42"]);
        assert!(aggregator.lookup_song(&entity_ref).is_err());
        assert!(!aggregator.contains(&entity_ref));

        aggregator
            .reporter_for(&ProviderId::new("p1"))
            .report_songs(vec![song("42", "A")]);
        let loaded = aggregator.retrieve_song(&entity_ref);
        assert!(loaded.is_loaded());
        assert_eq!(loaded.title, "A");
        assert!(aggregator.contains(&entity_ref));
    }

    #[tokio::test]
    async fn test_failed_request_can_be_retried() {
        let (registry, aggregator) = setup();
        let provider = connected(&registry, Some(BridgeError::NotFound(String::new()))).await;
        let entity_ref = EntityRef::new("p1", "7");

        aggregator.retrieve_song(&entity_ref);
        eventually(|| provider.requests.lock().len() == 1).await;
        eventually(|| aggregator.requested.lock().is_empty()).await;

        aggregator.retrieve_song(&entity_ref);
        eventually(|| provider.requests.lock().len() == 2).await;
    }

    #[tokio::test]
    async fn test_refresh_reports_unavailable_provider() {
        let (_registry, aggregator) = setup();
        let err = aggregator
            .refresh(EntityKind::Song, &EntityRef::new("nowhere", "1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AggregatorError::ProviderUnavailable(ProviderId::new("nowhere"))
        );
    }

    #[tokio::test]
    async fn test_disconnected_provider_is_reported_to_registry() {
        let (registry, aggregator) = setup_with(RegistryOptions {
            auto_reconnect: false,
            ..RegistryOptions::default()
        });
        connected(&registry, Some(BridgeError::Disconnected("gone".to_string()))).await;

        let err = aggregator
            .refresh(EntityKind::Song, &EntityRef::new("p1", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AggregatorError::RequestFailed { .. }));
        assert_eq!(
            registry.state(&ProviderId::new("p1")),
            Some(core_plugins::ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_connect_announces_and_rerequests_stubs() {
        let (registry, aggregator) = setup();
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());

        // Stub created while the provider is still offline.
        aggregator.retrieve_song(&EntityRef::new("p1", "9"));
        eventually(|| aggregator.requested.lock().is_empty()).await;

        let provider = connected(&registry, None).await;
        assert_eq!(
            observer.connected.lock().as_slice(),
            [ProviderId::new("p1")]
        );
        eventually(|| provider.requests.lock().as_slice() == ["9"]).await;
    }

    #[tokio::test]
    async fn test_search_without_providers_fails() {
        let (_registry, aggregator) = setup();
        assert_eq!(
            aggregator.search("moon").await.unwrap_err(),
            AggregatorError::NoProviders
        );
    }

    #[tokio::test]
    async fn test_refused_search_completes_session() {
        let (registry, aggregator) = setup();
        connected(&registry, None).await;

        let query_id = aggregator.search("moon").await.unwrap();

        let result = aggregator.search_result(&query_id).unwrap();
        assert!(result.is_complete());
        assert!(result.is_empty());
    }

    #[test]
    fn test_unknown_query_result_is_dropped() {
        let (_registry, aggregator) = setup();
        let result = SearchResult::new(&SearchQuery::new("moon"))
            .with_songs([EntityRef::new("p1", "1")]);
        let query_id = result.query_id;

        aggregator
            .reporter_for(&ProviderId::new("p1"))
            .report_search_result(result);

        assert!(aggregator.search_result(&query_id).is_none());
    }

    #[test]
    fn test_relations_resolve_through_cache() {
        let (_registry, aggregator) = setup();
        let reporter = aggregator.reporter_for(&ProviderId::new("p1"));
        reporter.report_songs(vec![
            song("1", "One").with_artist(EntityRef::new("p1", "ar")),
            song("2", "Two"),
        ]);
        reporter.report_artists(vec![Artist::new(EntityRef::new("p1", "ar"), "Band")]);

        let playlist = Playlist::new(EntityRef::new("p1", "pl"), "Mix").with_songs([
            EntityRef::new("p1", "2"),
            EntityRef::new("p1", "1"),
            EntityRef::new("p1", "2"),
        ]);
        let titles: Vec<String> = aggregator
            .playlist_songs(&playlist)
            .iter()
            .map(|s| s.title.clone())
            .collect();
        assert_eq!(titles, ["Two", "One", "Two"]);

        let one = aggregator.lookup_song(&EntityRef::new("p1", "1")).unwrap();
        assert_eq!(aggregator.song_artist(&one).unwrap().name, "Band");
        assert!(aggregator.song_album(&one).is_none());
    }
}
