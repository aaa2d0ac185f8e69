//! Playback-control service bridge.
//!
//! The playback-control service owns the authoritative playback session
//! (current song, queue, transport state). Clients drive it through
//! [`PlaybackService`] and observe it through [`PlaybackCallback`]. The
//! abstraction is transport independent: the service may live in another
//! process, on another machine or in the same address space.

use async_trait::async_trait;
use core_library::Song;
use std::sync::Arc;

use crate::error::Result;

/// Token returned by [`PlaybackService::add_callback`], used to detach the
/// callback again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// Lifecycle events emitted by the playback-control service.
///
/// The service emits each event at most once per actual transition. Calls may
/// happen on a service-owned thread and must return promptly.
pub trait PlaybackCallback: Send + Sync {
    fn on_song_started(&self, song: &Song);

    /// Periodic position heartbeat while playing, in milliseconds.
    fn on_song_scrobble(&self, position_ms: u64);

    fn on_playback_pause(&self);

    fn on_playback_resume(&self);
}

/// Command surface of the playback-control service.
///
/// Every call may block on the underlying transport. Callers that cannot
/// wait should go through a dispatcher rather than calling directly.
#[async_trait]
pub trait PlaybackService: Send + Sync {
    /// Start or resume playback of the current queue.
    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Skip to the next song in the queue.
    async fn next(&self) -> Result<()>;

    async fn seek(&self, position_ms: u64) -> Result<()>;

    /// Replace the queue with `song` and start playing it.
    async fn play_song(&self, song: &Song) -> Result<()>;

    async fn current_track(&self) -> Result<Option<Song>>;

    /// Snapshot of the queue in play order. Duplicates are permitted.
    async fn current_queue(&self) -> Result<Vec<Song>>;

    async fn is_playing(&self) -> Result<bool>;

    async fn is_paused(&self) -> Result<bool>;

    async fn current_track_position(&self) -> Result<u64>;

    async fn current_track_length(&self) -> Result<u64>;

    async fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> Result<CallbackHandle>;

    async fn remove_callback(&self, handle: CallbackHandle) -> Result<()>;
}

/// Binds to the playback-control service.
///
/// Binding may fail while the service process is starting; the registry
/// retries with backoff.
#[async_trait]
pub trait PlaybackServiceBinder: Send + Sync {
    async fn bind(&self) -> Result<Arc<dyn PlaybackService>>;
}
