//! `MusicProvider` and `ProviderConnector` over a [`MemoryCatalog`].

use async_trait::async_trait;
use bridge_traits::{error::Result, MusicProvider, ProviderConnector, ProviderReporter};
use core_library::{EntityKind, ProviderId, SearchQuery, SearchResult, Song};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::catalog::MemoryCatalog;
use crate::error::MemoryProviderError;

/// Connected in-memory provider.
///
/// Requests return as soon as they are accepted; answers are delivered
/// through the reporter from a spawned task after `latency`.
pub struct MemoryProvider {
    id: ProviderId,
    catalog: Arc<RwLock<MemoryCatalog>>,
    reporter: Arc<dyn ProviderReporter>,
    latency: Duration,
}

impl MemoryProvider {
    pub fn new(
        id: ProviderId,
        catalog: Arc<RwLock<MemoryCatalog>>,
        reporter: Arc<dyn ProviderReporter>,
        latency: Duration,
    ) -> Self {
        Self {
            id,
            catalog,
            reporter,
            latency,
        }
    }

    /// Store `song` and push it to the aggregated view right away, as a
    /// provider does when its backing data changes.
    pub fn publish_song(&self, song: Song) {
        self.catalog.write().insert_song(song.clone());
        self.reporter.report_songs(vec![song]);
    }

    fn deliver<F>(&self, answer: F)
    where
        F: FnOnce(&dyn ProviderReporter) + Send + 'static,
    {
        let reporter = Arc::clone(&self.reporter);
        let latency = self.latency;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            answer(reporter.as_ref());
        });
    }

    fn lookup<T, F>(&self, kind: EntityKind, identifier: &str, find: F) -> Result<T>
    where
        F: FnOnce(&MemoryCatalog) -> Option<T>,
    {
        let catalog = self.catalog.read();
        find(&catalog).ok_or_else(|| {
            MemoryProviderError::NotInCatalog {
                kind,
                identifier: identifier.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl MusicProvider for MemoryProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn request_song(&self, identifier: &str) -> Result<()> {
        let song = self.lookup(EntityKind::Song, identifier, |c| c.song(identifier).cloned())?;
        self.deliver(move |reporter| reporter.report_songs(vec![song]));
        Ok(())
    }

    async fn request_album(&self, identifier: &str) -> Result<()> {
        let album = self.lookup(EntityKind::Album, identifier, |c| c.album(identifier).cloned())?;
        self.deliver(move |reporter| reporter.report_albums(vec![album]));
        Ok(())
    }

    async fn request_artist(&self, identifier: &str) -> Result<()> {
        let artist =
            self.lookup(EntityKind::Artist, identifier, |c| c.artist(identifier).cloned())?;
        self.deliver(move |reporter| reporter.report_artists(vec![artist]));
        Ok(())
    }

    async fn request_playlist(&self, identifier: &str) -> Result<()> {
        let playlist =
            self.lookup(EntityKind::Playlist, identifier, |c| c.playlist(identifier).cloned())?;
        self.deliver(move |reporter| reporter.report_playlists(vec![playlist]));
        Ok(())
    }

    #[instrument(skip(self, query), fields(query = %query.text))]
    async fn search(&self, query: &SearchQuery) -> Result<()> {
        let hits = self.catalog.read().search(&query.text);
        debug!(
            provider = %self.id,
            songs = hits.songs.len(),
            albums = hits.albums.len(),
            "Search matched catalog"
        );

        let result = SearchResult::new(query)
            .with_songs(hits.songs.iter().map(|s| s.entity_ref.clone()))
            .with_albums(hits.albums.iter().map(|a| a.entity_ref.clone()))
            .with_artists(hits.artists.iter().map(|a| a.entity_ref.clone()))
            .with_playlists(hits.playlists.iter().map(|p| p.entity_ref.clone()));

        self.deliver(move |reporter| {
            // Entities first, so the hits resolve in the aggregated view.
            if !hits.songs.is_empty() {
                reporter.report_songs(hits.songs);
            }
            if !hits.albums.is_empty() {
                reporter.report_albums(hits.albums);
            }
            if !hits.artists.is_empty() {
                reporter.report_artists(hits.artists);
            }
            if !hits.playlists.is_empty() {
                reporter.report_playlists(hits.playlists);
            }
            reporter.report_search_result(result);
        });
        Ok(())
    }
}

/// Connector creating [`MemoryProvider`]s over a shared catalog.
pub struct MemoryConnector {
    id: ProviderId,
    catalog: Arc<RwLock<MemoryCatalog>>,
    latency: Duration,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    connected: Mutex<Option<Arc<MemoryProvider>>>,
}

impl MemoryConnector {
    pub fn new(id: impl Into<ProviderId>, catalog: MemoryCatalog) -> Self {
        Self {
            id: id.into(),
            catalog: Arc::new(RwLock::new(catalog)),
            latency: Duration::ZERO,
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            connected: Mutex::new(None),
        }
    }

    /// Delay before each answer is reported.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `attempts` connection attempts.
    pub fn fail_attempts(self, attempts: u32) -> Self {
        self.failures_left.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The provider created by the last successful connect, if still connected.
    pub fn provider(&self) -> Option<Arc<MemoryProvider>> {
        self.connected.lock().clone()
    }

    pub fn catalog(&self) -> Arc<RwLock<MemoryCatalog>> {
        Arc::clone(&self.catalog)
    }
}

#[async_trait]
impl ProviderConnector for MemoryConnector {
    fn provider_id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn connect(
        &self,
        reporter: Arc<dyn ProviderReporter>,
    ) -> Result<Arc<dyn MusicProvider>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let starting = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if starting {
            debug!(provider = %self.id, attempt, "Simulated connection failure");
            return Err(MemoryProviderError::Starting { attempt }.into());
        }

        let provider = Arc::new(MemoryProvider::new(
            self.id.clone(),
            Arc::clone(&self.catalog),
            reporter,
            self.latency,
        ));
        *self.connected.lock() = Some(Arc::clone(&provider));
        info!(provider = %self.id, attempt, "Memory provider connected");
        Ok(provider)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;
    use core_library::{Album, Artist, EntityRef, Playlist};

    #[derive(Default)]
    struct CapturingReporter {
        songs: Mutex<Vec<Song>>,
        results: Mutex<Vec<SearchResult>>,
    }

    impl ProviderReporter for CapturingReporter {
        fn report_songs(&self, songs: Vec<Song>) {
            self.songs.lock().extend(songs);
        }
        fn report_albums(&self, _albums: Vec<Album>) {}
        fn report_artists(&self, _artists: Vec<Artist>) {}
        fn report_playlists(&self, _playlists: Vec<Playlist>) {}
        fn report_search_result(&self, result: SearchResult) {
            self.results.lock().push(result);
        }
        fn report_connected(&self) {}
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .with_song(Song::new(EntityRef::new("mem", "1"), "Moon River"))
            .with_song(Song::new(EntityRef::new("mem", "2"), "Daylight"))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_request_reports_through_reporter() {
        let reporter = Arc::new(CapturingReporter::default());
        let connector = MemoryConnector::new("mem", catalog());
        let provider = connector.connect(reporter.clone()).await.unwrap();

        provider.request_song("1").await.unwrap();
        settle().await;

        let songs = reporter.songs.lock().clone();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title, "Moon River");
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_not_found() {
        let connector = MemoryConnector::new("mem", catalog());
        let provider = connector
            .connect(Arc::new(CapturingReporter::default()))
            .await
            .unwrap();

        let err = provider.request_song("404").await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_search_reports_entities_and_tagged_result() {
        let reporter = Arc::new(CapturingReporter::default());
        let connector = MemoryConnector::new("mem", catalog());
        let provider = connector.connect(reporter.clone()).await.unwrap();

        let query = SearchQuery::new("moon");
        provider.search(&query).await.unwrap();
        settle().await;

        let results = reporter.results.lock().clone();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].query_id, query.id);
        assert_eq!(results[0].songs, vec![EntityRef::new("mem", "1")]);
        assert_eq!(reporter.songs.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_fails_configured_attempts() {
        let connector = MemoryConnector::new("mem", catalog()).fail_attempts(2);
        let reporter: Arc<dyn ProviderReporter> = Arc::new(CapturingReporter::default());

        for _ in 0..2 {
            let err = connector.connect(reporter.clone()).await.err().unwrap();
            assert!(err.is_disconnect());
        }
        assert!(connector.connect(reporter).await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert!(connector.provider().is_some());

        connector.disconnect().await.unwrap();
        assert!(connector.provider().is_none());
    }
}
