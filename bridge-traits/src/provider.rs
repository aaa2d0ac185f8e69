//! Provider plugin contract.
//!
//! A provider plugin is any music source (local files, a cloud drive, a
//! streaming catalog) that can answer entity requests and searches. Answers
//! are never returned from the request itself: the provider pushes them
//! through the [`ProviderReporter`] it received when it was connected, and the
//! aggregator merges whatever arrives.

use async_trait::async_trait;
use core_library::{Album, Artist, Playlist, ProviderId, SearchQuery, SearchResult, Song};
use std::sync::Arc;

use crate::error::Result;

/// Push channel from a provider into the aggregated view.
///
/// Calls may arrive from any thread and in any order. Implementations must
/// not block for long; the aggregator merges and broadcasts synchronously.
pub trait ProviderReporter: Send + Sync {
    fn report_songs(&self, songs: Vec<Song>);

    fn report_albums(&self, albums: Vec<Album>);

    fn report_artists(&self, artists: Vec<Artist>);

    fn report_playlists(&self, playlists: Vec<Playlist>);

    /// Report this provider's hits for a query. The result must carry the
    /// query id it was dispatched with.
    fn report_search_result(&self, result: SearchResult);

    /// Announce that the provider can serve requests. The registry calls
    /// this once per established connection; a provider may call it again
    /// after recovering from an internal outage.
    fn report_connected(&self);
}

/// Source of reporters bound to a single provider.
pub trait ReporterFactory: Send + Sync {
    fn reporter_for(&self, provider: &ProviderId) -> Arc<dyn ProviderReporter>;
}

/// A connected provider plugin.
///
/// Every `request_*` call only schedules work; a successful return means the
/// request was accepted, not that it was answered.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn provider_id(&self) -> &ProviderId;

    async fn request_song(&self, identifier: &str) -> Result<()>;

    async fn request_album(&self, identifier: &str) -> Result<()>;

    async fn request_artist(&self, identifier: &str) -> Result<()>;

    async fn request_playlist(&self, identifier: &str) -> Result<()>;

    /// Run `query` and report hits through
    /// [`ProviderReporter::report_search_result`].
    async fn search(&self, query: &SearchQuery) -> Result<()>;
}

/// Establishes the transport to one provider plugin.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::provider::{MusicProvider, ProviderConnector, ProviderReporter};
///
/// struct LocalFilesConnector { root: PathBuf }
///
/// #[async_trait::async_trait]
/// impl ProviderConnector for LocalFilesConnector {
///     fn provider_id(&self) -> ProviderId {
///         ProviderId::new("local")
///     }
///
///     async fn connect(
///         &self,
///         reporter: Arc<dyn ProviderReporter>,
///     ) -> Result<Arc<dyn MusicProvider>> {
///         let provider = LocalFiles::scan(&self.root, reporter).await?;
///         Ok(Arc::new(provider))
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Bind to the provider. The returned handle stays valid until the
    /// provider process dies or [`disconnect`](Self::disconnect) is called.
    async fn connect(&self, reporter: Arc<dyn ProviderReporter>)
        -> Result<Arc<dyn MusicProvider>>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
