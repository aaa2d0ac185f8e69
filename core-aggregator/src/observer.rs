//! Observer capability set of the aggregated view.

use core_library::{Album, Artist, Playlist, ProviderId, SearchResult, Song};
use std::sync::Arc;

/// Receives every change to the aggregated view.
///
/// Each update carries only the entities whose cached value changed, already
/// in their merged state. Successive updates reach one observer in the order
/// they were merged. Methods run on the reporting provider's thread and must
/// not report back into the aggregator synchronously.
///
/// All methods default to no-ops, so an observer implements only what it
/// displays.
pub trait ProviderObserver: Send + Sync {
    fn on_song_update(&self, _songs: &[Arc<Song>]) {}

    fn on_album_update(&self, _albums: &[Arc<Album>]) {}

    fn on_artist_update(&self, _artists: &[Arc<Artist>]) {}

    fn on_playlist_update(&self, _playlists: &[Arc<Playlist>]) {}

    /// Called on every partial arrival for a query. The result is the merged
    /// state so far; consumers must tolerate repeated deliveries for the same
    /// query id.
    fn on_search_result(&self, _result: &SearchResult) {}

    fn on_provider_connected(&self, _provider: &ProviderId) {}
}
