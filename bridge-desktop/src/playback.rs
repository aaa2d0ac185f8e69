//! In-process playback-control service.
//!
//! [`LocalPlaybackService`] keeps the authoritative session (queue, current
//! index, transport state, position) and notifies registered callbacks on
//! every real transition. Audio output is out of scope: position advances
//! with wall-clock time while playing.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CallbackHandle, PlaybackCallback, PlaybackService, PlaybackServiceBinder,
};
use core_library::Song;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between scrobble heartbeats while playing.
pub const DEFAULT_SCROBBLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug)]
struct Session {
    queue: Vec<Song>,
    index: Option<usize>,
    transport: Transport,
    /// Position accumulated before the current playing stretch.
    offset_ms: u64,
    resumed_at: Option<Instant>,
}

impl Session {
    fn current(&self) -> Option<&Song> {
        self.index.and_then(|i| self.queue.get(i))
    }

    fn length_ms(&self) -> u64 {
        self.current().and_then(|s| s.duration_ms).unwrap_or(0)
    }

    fn position_ms(&self) -> u64 {
        let elapsed = self
            .resumed_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let position = self.offset_ms.saturating_add(elapsed);
        match self.length_ms() {
            0 => position,
            length => position.min(length),
        }
    }

    fn finished(&self) -> bool {
        let length = self.length_ms();
        self.transport == Transport::Playing && length > 0 && self.position_ms() >= length
    }

    fn freeze_position(&mut self) {
        self.offset_ms = self.position_ms();
        self.resumed_at = None;
    }
}

/// A transition to announce once the session lock is released.
enum Event {
    Started(Song),
    Paused,
    Resumed,
}

struct Shared {
    session: Mutex<Session>,
    callbacks: Mutex<Vec<(CallbackHandle, Arc<dyn PlaybackCallback>)>>,
    next_handle: AtomicU64,
    scrobble_interval: Duration,
    ticker: Mutex<Option<CancellationToken>>,
    connected: AtomicBool,
    /// Serializes transitions so events leave in the order they happened.
    transition: Mutex<()>,
}

impl Shared {
    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BridgeError::Disconnected(
                "playback service is not running".to_string(),
            ))
        }
    }

    /// Apply `change` to the session and deliver the resulting events.
    fn transition<F>(self: &Arc<Self>, change: F)
    where
        F: FnOnce(&mut Session) -> Vec<Event>,
    {
        let _ordered = self.transition.lock();
        let (events, playing) = {
            let mut session = self.session.lock();
            let events = change(&mut session);
            (events, session.transport == Transport::Playing)
        };

        if playing {
            self.ensure_ticker();
        } else {
            self.stop_ticker();
        }

        if events.is_empty() {
            return;
        }
        let callbacks: Vec<_> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for event in &events {
            for callback in &callbacks {
                match event {
                    Event::Started(song) => callback.on_song_started(song),
                    Event::Paused => callback.on_playback_pause(),
                    Event::Resumed => callback.on_playback_resume(),
                }
            }
        }
    }

    fn ensure_ticker(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime; scrobble heartbeat disabled");
                return;
            }
        };

        let token = CancellationToken::new();
        *ticker = Some(token.clone());
        let weak = Arc::downgrade(self);
        let period = self.scrobble_interval;

        handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        shared.heartbeat();
                    }
                }
            }
        });
    }

    fn stop_ticker(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }

    fn heartbeat(self: &Arc<Self>) {
        let (position, finished) = {
            let session = self.session.lock();
            if session.transport != Transport::Playing {
                return;
            }
            (session.position_ms(), session.finished())
        };

        if finished {
            debug!("Song finished; advancing queue");
            self.transition(advance);
            return;
        }

        let callbacks: Vec<_> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback.on_song_scrobble(position);
        }
    }
}

fn start_at(session: &mut Session, index: usize) -> Vec<Event> {
    session.index = Some(index);
    session.transport = Transport::Playing;
    session.offset_ms = 0;
    session.resumed_at = Some(Instant::now());
    session
        .current()
        .cloned()
        .map(Event::Started)
        .into_iter()
        .collect()
}

fn advance(session: &mut Session) -> Vec<Event> {
    let next = session.index.map_or(0, |i| i + 1);
    if next < session.queue.len() {
        return start_at(session, next);
    }

    let was_playing = session.transport == Transport::Playing;
    session.index = None;
    session.transport = Transport::Stopped;
    session.offset_ms = 0;
    session.resumed_at = None;
    if was_playing {
        vec![Event::Paused]
    } else {
        Vec::new()
    }
}

/// Playback-control service living in the host process.
pub struct LocalPlaybackService {
    shared: Arc<Shared>,
}

impl LocalPlaybackService {
    pub fn new() -> Self {
        Self::with_scrobble_interval(DEFAULT_SCROBBLE_INTERVAL)
    }

    pub fn with_scrobble_interval(scrobble_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    queue: Vec::new(),
                    index: None,
                    transport: Transport::Stopped,
                    offset_ms: 0,
                    resumed_at: None,
                }),
                callbacks: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(1),
                scrobble_interval,
                ticker: Mutex::new(None),
                connected: AtomicBool::new(true),
                transition: Mutex::new(()),
            }),
        }
    }

    /// Replace the queue without starting playback.
    pub fn set_queue(&self, songs: Vec<Song>) {
        self.shared.transition(|session| {
            let was_playing = session.transport == Transport::Playing;
            session.queue = songs;
            session.index = None;
            session.transport = Transport::Stopped;
            session.offset_ms = 0;
            session.resumed_at = None;
            if was_playing {
                vec![Event::Paused]
            } else {
                Vec::new()
            }
        });
    }

    /// Append `song` to the end of the queue.
    pub fn enqueue(&self, song: Song) {
        self.shared.session.lock().queue.push(song);
    }

    /// Simulate the service process dying: every call fails with
    /// [`BridgeError::Disconnected`] until [`restart`](Self::restart).
    pub fn kill(&self) {
        info!("Local playback service stopped");
        self.shared.connected.store(false, Ordering::Release);
        self.shared.stop_ticker();
    }

    pub fn restart(&self) {
        info!("Local playback service restarted");
        self.shared.connected.store(true, Ordering::Release);
        if self.shared.session.lock().transport == Transport::Playing {
            self.shared.ensure_ticker();
        }
    }

    pub fn callback_count(&self) -> usize {
        self.shared.callbacks.lock().len()
    }
}

impl Default for LocalPlaybackService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalPlaybackService {
    fn drop(&mut self) {
        self.shared.stop_ticker();
    }
}

#[async_trait]
impl PlaybackService for LocalPlaybackService {
    async fn play(&self) -> Result<()> {
        self.shared.check_connected()?;
        self.shared.transition(|session| match session.transport {
            Transport::Playing => Vec::new(),
            Transport::Paused => {
                session.transport = Transport::Playing;
                session.resumed_at = Some(Instant::now());
                vec![Event::Resumed]
            }
            Transport::Stopped if session.queue.is_empty() => Vec::new(),
            Transport::Stopped => {
                let index = session.index.unwrap_or(0);
                start_at(session, index)
            }
        });
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.shared.check_connected()?;
        self.shared.transition(|session| {
            if session.transport != Transport::Playing {
                return Vec::new();
            }
            session.freeze_position();
            session.transport = Transport::Paused;
            vec![Event::Paused]
        });
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        self.shared.check_connected()?;
        self.shared.transition(advance);
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> Result<()> {
        self.shared.check_connected()?;
        let mut session = self.shared.session.lock();
        if session.current().is_none() {
            debug!(position_ms, "Seek with nothing playing ignored");
            return Ok(());
        }
        let length = session.length_ms();
        session.offset_ms = if length > 0 { position_ms.min(length) } else { position_ms };
        if session.resumed_at.is_some() {
            session.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn play_song(&self, song: &Song) -> Result<()> {
        self.shared.check_connected()?;
        let song = song.clone();
        self.shared.transition(move |session| {
            session.queue = vec![song];
            start_at(session, 0)
        });
        Ok(())
    }

    async fn current_track(&self) -> Result<Option<Song>> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().current().cloned())
    }

    async fn current_queue(&self) -> Result<Vec<Song>> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().queue.clone())
    }

    async fn is_playing(&self) -> Result<bool> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().transport == Transport::Playing)
    }

    async fn is_paused(&self) -> Result<bool> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().transport == Transport::Paused)
    }

    async fn current_track_position(&self) -> Result<u64> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().position_ms())
    }

    async fn current_track_length(&self) -> Result<u64> {
        self.shared.check_connected()?;
        Ok(self.shared.session.lock().length_ms())
    }

    async fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> Result<CallbackHandle> {
        self.shared.check_connected()?;
        let handle = CallbackHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        self.shared.callbacks.lock().push((handle, callback));
        debug!(handle = handle.0, "Playback callback added");
        Ok(handle)
    }

    async fn remove_callback(&self, handle: CallbackHandle) -> Result<()> {
        self.shared.check_connected()?;
        let mut callbacks = self.shared.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        if callbacks.len() == before {
            return Err(BridgeError::NotFound(format!("callback {}", handle.0)));
        }
        Ok(())
    }
}

/// Binder handing out a shared [`LocalPlaybackService`].
pub struct LocalServiceBinder {
    service: Arc<LocalPlaybackService>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl LocalServiceBinder {
    pub fn new(service: Arc<LocalPlaybackService>) -> Self {
        Self::with_startup_failures(service, 0)
    }

    /// Binder whose first `failures` bind attempts report the service as not
    /// yet available.
    pub fn with_startup_failures(service: Arc<LocalPlaybackService>, failures: u32) -> Self {
        Self {
            service,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackServiceBinder for LocalServiceBinder {
    async fn bind(&self) -> Result<Arc<dyn PlaybackService>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let still_starting = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if still_starting {
            debug!(attempt, "Playback service still starting");
            return Err(BridgeError::NotAvailable(
                "playback service is starting".to_string(),
            ));
        }
        self.service.shared.check_connected()?;
        Ok(self.service.clone() as Arc<dyn PlaybackService>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::EntityRef;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl PlaybackCallback for Recorder {
        fn on_song_started(&self, song: &Song) {
            self.events.lock().push(format!("started:{}", song.title));
        }

        fn on_song_scrobble(&self, _position_ms: u64) {
            self.events.lock().push("scrobble".to_string());
        }

        fn on_playback_pause(&self) {
            self.events.lock().push("pause".to_string());
        }

        fn on_playback_resume(&self) {
            self.events.lock().push("resume".to_string());
        }
    }

    fn song(id: &str, duration_ms: u64) -> Song {
        Song::new(EntityRef::new("local", id), id).with_duration_ms(duration_ms)
    }

    fn transitions(recorder: &Recorder) -> Vec<String> {
        recorder
            .events()
            .into_iter()
            .filter(|e| e != "scrobble")
            .collect()
    }

    #[tokio::test]
    async fn test_transitions_emit_once() {
        let service = LocalPlaybackService::with_scrobble_interval(Duration::from_secs(60));
        let recorder = Arc::new(Recorder::default());
        service.add_callback(recorder.clone()).await.unwrap();

        service.set_queue(vec![song("a", 60_000), song("b", 60_000)]);
        service.play().await.unwrap();
        service.play().await.unwrap();
        service.pause().await.unwrap();
        service.pause().await.unwrap();
        service.play().await.unwrap();
        service.next().await.unwrap();

        assert_eq!(
            transitions(&recorder),
            vec!["started:a", "pause", "resume", "started:b"]
        );
        assert_eq!(service.current_track().await.unwrap().unwrap().title, "b");
        assert!(service.is_playing().await.unwrap());
    }

    #[tokio::test]
    async fn test_next_past_end_stops() {
        let service = LocalPlaybackService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_callback(recorder.clone()).await.unwrap();

        service.play_song(&song("only", 1_000)).await.unwrap();
        service.next().await.unwrap();

        assert_eq!(transitions(&recorder), vec!["started:only", "pause"]);
        assert!(service.current_track().await.unwrap().is_none());
        assert!(!service.is_playing().await.unwrap());
    }

    #[tokio::test]
    async fn test_seek_clamps_and_ignores_empty_session() {
        let service = LocalPlaybackService::new();
        service.seek(5_000).await.unwrap();
        assert_eq!(service.current_track_position().await.unwrap(), 0);

        service.play_song(&song("a", 10_000)).await.unwrap();
        service.pause().await.unwrap();
        service.seek(4_000).await.unwrap();
        assert_eq!(service.current_track_position().await.unwrap(), 4_000);
        service.seek(50_000).await.unwrap();
        assert_eq!(service.current_track_position().await.unwrap(), 10_000);
        assert_eq!(service.current_track_length().await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_scrobble_heartbeat_only_while_playing() {
        let service = LocalPlaybackService::with_scrobble_interval(Duration::from_millis(10));
        let recorder = Arc::new(Recorder::default());
        service.add_callback(recorder.clone()).await.unwrap();

        service.play_song(&song("a", 60_000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        service.pause().await.unwrap();
        let scrobbles = recorder.events().iter().filter(|e| *e == "scrobble").count();
        assert!(scrobbles >= 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = recorder.events().iter().filter(|e| *e == "scrobble").count();
        assert_eq!(scrobbles, after);
    }

    #[tokio::test]
    async fn test_finished_song_advances_queue() {
        let service = LocalPlaybackService::with_scrobble_interval(Duration::from_millis(10));
        let recorder = Arc::new(Recorder::default());
        service.add_callback(recorder.clone()).await.unwrap();

        service.set_queue(vec![song("short", 20), song("next", 60_000)]);
        service.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            transitions(&recorder),
            vec!["started:short", "started:next"]
        );
    }

    #[tokio::test]
    async fn test_removed_callback_stops_receiving() {
        let service = LocalPlaybackService::new();
        let kept = Arc::new(Recorder::default());
        let removed = Arc::new(Recorder::default());
        service.add_callback(kept.clone()).await.unwrap();
        let handle = service.add_callback(removed.clone()).await.unwrap();

        service.remove_callback(handle).await.unwrap();
        assert!(matches!(
            service.remove_callback(handle).await,
            Err(BridgeError::NotFound(_))
        ));
        service.play_song(&song("a", 1_000)).await.unwrap();

        assert_eq!(transitions(&kept), vec!["started:a"]);
        assert!(removed.events().is_empty());
        assert_eq!(service.callback_count(), 1);
    }

    #[tokio::test]
    async fn test_killed_service_reports_disconnect() {
        let service = LocalPlaybackService::new();
        service.kill();
        let err = service.play().await.unwrap_err();
        assert!(err.is_disconnect());

        service.restart();
        service.play().await.unwrap();
    }

    #[tokio::test]
    async fn test_binder_startup_failures() {
        let service = Arc::new(LocalPlaybackService::new());
        let binder = LocalServiceBinder::with_startup_failures(service, 2);

        assert!(matches!(binder.bind().await, Err(BridgeError::NotAvailable(_))));
        assert!(matches!(binder.bind().await, Err(BridgeError::NotAvailable(_))));
        assert!(binder.bind().await.is_ok());
        assert_eq!(binder.attempts(), 3);
    }
}
