//! # Playback Control Channel
//!
//! Command and event channel between UI code and the playback-control
//! service, independent of how the service is reached.
//!
//! ## Overview
//!
//! - Commands resolve the service through the [`ProviderRegistry`] on every
//!   call. With no service bound they fail with
//!   [`PlaybackError::ServiceUnavailable`] and nothing is delivered to
//!   callbacks.
//! - The channel registers a single relay with the bound service and fans
//!   its events out to any number of [`PlaybackCallback`]s. Each callback is
//!   registered and removed independently.
//! - Events are delivered at most once per actual transition: a pause while
//!   already paused or a resume while already playing is dropped. Events
//!   from a relay attached to a previous service binding are ignored.
//! - A [`PlaybackSession`] mirror follows the events for cheap reads.
//!
//! ## Usage
//!
//! ```ignore
//! let channel = PlaybackControlChannel::new(registry.clone(), events, ChannelOptions::default());
//! channel.add_callback(Arc::new(PlayingBar::default()));
//!
//! match channel.play_song(&song).await {
//!     Ok(()) => {}
//!     Err(PlaybackError::ServiceUnavailable(_)) => disable_transport_buttons(),
//!     Err(err) => warn!(error = %err, "Play failed"),
//! }
//! ```

use bridge_traits::{BridgeError, CallbackHandle, PlaybackCallback, PlaybackService};
use core_library::Song;
use core_plugins::ProviderRegistry;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::{ObserverId, ObserverList};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{CommandDispatcher, CommandOutcome, PlaybackCommand};
use crate::error::{PlaybackError, Result};
use crate::session::{PlaybackSession, TransportState};

/// Default capacity of a [`CommandDispatcher`] queue.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Fail `seek` with [`PlaybackError::NothingPlaying`] instead of ignoring
    /// it when nothing is playing.
    pub strict_seek: bool,
    pub command_queue_depth: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            strict_seek: false,
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        }
    }
}

impl ChannelOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            strict_seek: config.features.strict_seek,
            command_queue_depth: config.command_queue_depth,
        }
    }
}

fn same_service(a: &Arc<dyn PlaybackService>, b: &Arc<dyn PlaybackService>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

// =============================================================================
// Relay
// =============================================================================

/// The one callback the channel registers with the service.
struct CallbackRelay {
    channel: Weak<PlaybackControlChannel>,
    generation: u64,
}

impl CallbackRelay {
    fn forward<F>(&self, deliver: F)
    where
        F: FnOnce(&PlaybackControlChannel),
    {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if channel.relay_generation.load(Ordering::Acquire) != self.generation {
            debug!(generation = self.generation, "Event from stale relay ignored");
            return;
        }
        deliver(&*channel);
    }
}

impl PlaybackCallback for CallbackRelay {
    fn on_song_started(&self, song: &Song) {
        self.forward(|channel| channel.song_started(song));
    }

    fn on_song_scrobble(&self, position_ms: u64) {
        self.forward(|channel| channel.scrobbled(position_ms));
    }

    fn on_playback_pause(&self) {
        self.forward(PlaybackControlChannel::paused);
    }

    fn on_playback_resume(&self) {
        self.forward(PlaybackControlChannel::resumed);
    }
}

struct RelayBinding {
    service: Arc<dyn PlaybackService>,
    handle: CallbackHandle,
}

impl RelayBinding {
    /// Unregister the relay. Hands the binding back when the service could
    /// not be reached, so removal can be retried once it is back.
    async fn remove(self) -> Option<Self> {
        match self.service.remove_callback(self.handle).await {
            Ok(()) => None,
            Err(err) if err.is_disconnect() => {
                debug!(handle = self.handle.0, error = %err, "Relay removal deferred");
                Some(self)
            }
            Err(err) => {
                debug!(handle = self.handle.0, error = %err, "Relay removal failed");
                None
            }
        }
    }
}

#[derive(Default)]
struct RelaySlot {
    current: Option<RelayBinding>,
    /// Relay left registered with a service that went away. Removed from
    /// that service before the next relay is attached.
    stale: Option<RelayBinding>,
}

// =============================================================================
// Channel
// =============================================================================

/// The sanctioned way to control playback and observe its transitions.
pub struct PlaybackControlChannel {
    registry: Arc<ProviderRegistry>,
    events: EventBus,
    options: ChannelOptions,
    callbacks: ObserverList<dyn PlaybackCallback>,
    session: RwLock<PlaybackSession>,
    binding: tokio::sync::Mutex<RelaySlot>,
    relay_generation: AtomicU64,
    /// Serializes the transition check with its delivery.
    delivery: Mutex<()>,
    shutdown: CancellationToken,
    this: Weak<PlaybackControlChannel>,
}

impl PlaybackControlChannel {
    /// Create the channel. Inside a Tokio runtime it also follows the
    /// registry's service binding, attaching its relay on every bind.
    /// Otherwise the relay is attached by the first command.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        events: EventBus,
        options: ChannelOptions,
    ) -> Arc<Self> {
        let channel = Arc::new_cyclic(|this| Self {
            registry,
            events,
            options,
            callbacks: ObserverList::new("playback-callbacks"),
            session: RwLock::new(PlaybackSession::default()),
            binding: tokio::sync::Mutex::new(RelaySlot::default()),
            relay_generation: AtomicU64::new(0),
            delivery: Mutex::new(()),
            shutdown: CancellationToken::new(),
            this: this.clone(),
        });
        channel.spawn_binding_watcher();
        channel
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    fn emit(&self, event: PlaybackEvent) {
        self.events.emit(CoreEvent::Playback(event)).ok();
    }

    fn spawn_binding_watcher(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No Tokio runtime; relay attaches on first command");
            return;
        };
        let mut receiver = self.registry.subscribe_playback_service();
        let channel = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        runtime.spawn(async move {
            loop {
                let bound = receiver.borrow_and_update().clone();
                {
                    let Some(channel) = channel.upgrade() else { return };
                    match bound {
                        Some(service) => {
                            if let Err(err) = channel.attach_relay(&service).await {
                                warn!(error = %err, "Could not attach playback relay");
                            }
                        }
                        None => channel.detach_relay().await,
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = receiver.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // Callbacks
    // -------------------------------------------------------------------------

    /// Register a callback for every future playback event.
    pub fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> ObserverId {
        let id = self.callbacks.register(callback);
        debug!(callback = %id, "Playback callback added");
        id
    }

    /// Detach one callback without affecting the others. Returns `false` if
    /// it was not registered.
    pub fn remove_callback(&self, id: ObserverId) -> bool {
        self.callbacks.unregister(id)
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Snapshot of the session mirror.
    pub fn session(&self) -> PlaybackSession {
        self.session.read().clone()
    }

    pub(crate) fn record_position(&self, position_ms: u64) {
        self.session.write().scrobbled(position_ms);
    }

    fn song_started(&self, song: &Song) {
        let _delivery = self.delivery.lock();
        self.session.write().song_started(song);
        info!(song = %song.entity_ref, title = %song.title, "Song started");
        self.emit(PlaybackEvent::Started {
            song_ref: song.entity_ref.to_string(),
            title: song.title.clone(),
        });
        self.callbacks.notify(|callback| callback.on_song_started(song));
        drop(_delivery);

        self.spawn_queue_refresh();
    }

    fn scrobbled(&self, position_ms: u64) {
        let _delivery = self.delivery.lock();
        {
            let mut session = self.session.write();
            if !session.is_playing() {
                debug!(position_ms, "Scrobble while not playing dropped");
                return;
            }
            session.scrobbled(position_ms);
        }
        self.callbacks
            .notify(|callback| callback.on_song_scrobble(position_ms));
    }

    fn paused(&self) {
        let _delivery = self.delivery.lock();
        if !self.session.write().paused() {
            debug!("Repeated pause dropped");
            return;
        }
        info!("Playback paused");
        self.emit(PlaybackEvent::Paused);
        self.callbacks.notify(|callback| callback.on_playback_pause());
    }

    fn resumed(&self) {
        let _delivery = self.delivery.lock();
        if !self.session.write().resumed() {
            debug!("Repeated resume dropped");
            return;
        }
        info!("Playback resumed");
        self.emit(PlaybackEvent::Resumed);
        self.callbacks.notify(|callback| callback.on_playback_resume());
    }

    fn spawn_queue_refresh(&self) {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let (Some(channel), Some(runtime)) = (self.this.upgrade(), runtime) else {
            return;
        };
        runtime.spawn(async move {
            let Some(service) = channel.registry.playback_service() else {
                return;
            };
            match service.current_queue().await {
                Ok(queue) => channel.session.write().queue = queue,
                Err(err) => debug!(error = %err, "Queue refresh failed"),
            }
        });
    }

    // -------------------------------------------------------------------------
    // Service binding
    // -------------------------------------------------------------------------

    /// `true` while a playback service is bound.
    pub fn is_available(&self) -> bool {
        !self.shutdown.is_cancelled() && self.registry.playback_service().is_some()
    }

    /// Wait until a playback service is bound and the relay is attached.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::ServiceUnavailable`] when `timeout` elapses first or
    /// the core shuts down.
    pub async fn wait_until_available(&self, timeout: Duration) -> Result<()> {
        let service = self.registry.wait_for_playback_service(timeout).await?;
        self.attach_relay(&service).await
    }

    async fn attach_relay(&self, service: &Arc<dyn PlaybackService>) -> Result<()> {
        let mut slot = self.binding.lock().await;
        if slot
            .current
            .as_ref()
            .is_some_and(|bound| same_service(&bound.service, service))
        {
            return Ok(());
        }
        let still_bound = self
            .registry
            .playback_service()
            .is_some_and(|current| same_service(&current, service));
        if !still_bound {
            debug!("Service replaced before its relay was attached");
            return Ok(());
        }

        for leftover in [slot.current.take(), slot.stale.take()].into_iter().flatten() {
            if let Some(unreachable) = leftover.remove().await {
                slot.stale = Some(unreachable);
            }
        }

        let generation = self.relay_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let relay = Arc::new(CallbackRelay {
            channel: self.this.clone(),
            generation,
        });
        match service.add_callback(relay).await {
            Ok(handle) => {
                slot.current = Some(RelayBinding {
                    service: Arc::clone(service),
                    handle,
                });
                info!(generation, "Playback relay attached");
            }
            Err(err) => return Err(self.fail("attach", err)),
        }
        drop(slot);

        if let Err(err) = self.refresh_from(service).await {
            debug!(error = %err, "Session refresh after attach failed");
        }
        Ok(())
    }

    async fn detach_relay(&self) {
        let mut slot = self.binding.lock().await;
        if self.registry.playback_service().is_some() {
            // Rebound before this loss was processed.
            return;
        }
        let detached = match slot.current.take() {
            Some(previous) => {
                slot.stale = Some(previous);
                true
            }
            None => false,
        };
        drop(slot);
        self.relay_generation.fetch_add(1, Ordering::AcqRel);
        *self.session.write() = PlaybackSession::default();
        if detached {
            info!("Playback service unbound; relay detached");
        }
    }

    /// Re-read the session from the service into the mirror.
    pub async fn refresh_session(&self) -> Result<PlaybackSession> {
        let service = self.service("refresh").await?;
        self.refresh_from(&service).await
    }

    async fn refresh_from(&self, service: &Arc<dyn PlaybackService>) -> Result<PlaybackSession> {
        let fail = |err| self.fail("refresh", err);
        let current = service.current_track().await.map_err(fail)?;
        let playing = service.is_playing().await.map_err(fail)?;
        let paused = service.is_paused().await.map_err(fail)?;
        let position_ms = service.current_track_position().await.map_err(fail)?;
        let queue = service.current_queue().await.map_err(fail)?;

        let state = match (playing, paused) {
            (true, _) => TransportState::Playing,
            (false, true) => TransportState::Paused,
            (false, false) => TransportState::Stopped,
        };
        let session = PlaybackSession {
            length_ms: current.as_ref().and_then(|song| song.duration_ms),
            current,
            state,
            position_ms,
            queue,
        };
        *self.session.write() = session.clone();
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn service(&self, command: &'static str) -> Result<Arc<dyn PlaybackService>> {
        let bound = if self.shutdown.is_cancelled() {
            None
        } else {
            self.registry.playback_service()
        };
        let Some(service) = bound else {
            return Err(self.unavailable(command));
        };
        self.attach_relay(&service).await?;
        Ok(service)
    }

    fn unavailable(&self, command: &'static str) -> PlaybackError {
        let message = "no playback service bound".to_string();
        debug!(command, "Playback command without service");
        self.emit(PlaybackEvent::CommandFailed {
            command: command.to_string(),
            message: message.clone(),
            service_unavailable: true,
        });
        PlaybackError::ServiceUnavailable(message)
    }

    /// Map a bridge failure. A dead service is reported to the registry so
    /// it can rebind.
    fn fail(&self, command: &'static str, err: BridgeError) -> PlaybackError {
        let message = err.to_string();
        let error = if err.is_disconnect() {
            if matches!(err, BridgeError::Disconnected(_)) {
                self.registry.notify_service_disconnected(&message);
            }
            PlaybackError::ServiceUnavailable(message.clone())
        } else {
            PlaybackError::CommandFailed {
                command: command.to_string(),
                message: message.clone(),
            }
        };

        warn!(command, error = %message, "Playback command failed");
        self.emit(PlaybackEvent::CommandFailed {
            command: command.to_string(),
            message,
            service_unavailable: error.is_service_unavailable(),
        });
        error
    }

    async fn call<T, F, Fut>(&self, command: &'static str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn PlaybackService>) -> Fut,
        Fut: Future<Output = bridge_traits::Result<T>>,
    {
        let service = self.service(command).await?;
        op(service).await.map_err(|err| self.fail(command, err))
    }

    /// Start, or resume, playback of the current queue.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::ServiceUnavailable`] if no service is bound or it
    ///   died during the call
    /// - [`PlaybackError::CommandFailed`] if the service rejected the command
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        self.call("play", |service| async move { service.play().await })
            .await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        self.call("pause", |service| async move { service.pause().await })
            .await
    }

    #[instrument(skip(self))]
    pub async fn next(&self) -> Result<()> {
        self.call("next", |service| async move { service.next().await })
            .await
    }

    /// Move the playhead of the current song.
    ///
    /// With nothing playing this is a successful no-op, or
    /// [`PlaybackError::NothingPlaying`] when strict seeking is enabled.
    #[instrument(skip(self))]
    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        let service = self.service("seek").await?;
        let current = service
            .current_track()
            .await
            .map_err(|err| self.fail("seek", err))?;
        if current.is_none() {
            if self.options.strict_seek {
                return Err(PlaybackError::NothingPlaying);
            }
            debug!(position_ms, "Seek with nothing playing ignored");
            return Ok(());
        }

        service
            .seek(position_ms)
            .await
            .map_err(|err| self.fail("seek", err))?;
        let clamped = match self.session.read().length_ms {
            Some(length) if length > 0 => position_ms.min(length),
            _ => position_ms,
        };
        self.record_position(clamped);
        Ok(())
    }

    /// Replace the queue with `song` and play it.
    #[instrument(skip(self, song), fields(song = %song.entity_ref))]
    pub async fn play_song(&self, song: &Song) -> Result<()> {
        let song = song.clone();
        self.call("play_song", move |service| async move {
            service.play_song(&song).await
        })
        .await
    }

    pub async fn current_track(&self) -> Result<Option<Song>> {
        self.call("current_track", |service| async move {
            service.current_track().await
        })
        .await
    }

    /// Queue in play order, duplicates kept.
    pub async fn current_queue(&self) -> Result<Vec<Song>> {
        let queue = self
            .call("current_queue", |service| async move {
                service.current_queue().await
            })
            .await?;
        self.session.write().queue = queue.clone();
        Ok(queue)
    }

    pub async fn is_playing(&self) -> Result<bool> {
        self.call("is_playing", |service| async move { service.is_playing().await })
            .await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.call("is_paused", |service| async move { service.is_paused().await })
            .await
    }

    pub async fn current_track_position(&self) -> Result<u64> {
        self.call("current_track_position", |service| async move {
            service.current_track_position().await
        })
        .await
    }

    pub async fn current_track_length(&self) -> Result<u64> {
        self.call("current_track_length", |service| async move {
            service.current_track_length().await
        })
        .await
    }

    /// Run one command and wrap its value.
    pub async fn run_command(&self, command: PlaybackCommand) -> Result<CommandOutcome> {
        match command {
            PlaybackCommand::Play => self.play().await.map(|()| CommandOutcome::Done),
            PlaybackCommand::Pause => self.pause().await.map(|()| CommandOutcome::Done),
            PlaybackCommand::Next => self.next().await.map(|()| CommandOutcome::Done),
            PlaybackCommand::Seek { position_ms } => {
                self.seek(position_ms).await.map(|()| CommandOutcome::Done)
            }
            PlaybackCommand::PlaySong(song) => {
                self.play_song(&song).await.map(|()| CommandOutcome::Done)
            }
            PlaybackCommand::CurrentTrack => self.current_track().await.map(CommandOutcome::Track),
            PlaybackCommand::CurrentQueue => self.current_queue().await.map(CommandOutcome::Queue),
            PlaybackCommand::IsPlaying => self.is_playing().await.map(CommandOutcome::Flag),
            PlaybackCommand::IsPaused => self.is_paused().await.map(CommandOutcome::Flag),
            PlaybackCommand::Position => {
                self.current_track_position().await.map(CommandOutcome::Millis)
            }
            PlaybackCommand::Length => self.current_track_length().await.map(CommandOutcome::Millis),
        }
    }

    /// A dispatcher running commands in order on a worker task, for callers
    /// that must not wait on the service themselves.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::spawn(self.this.clone(), self.options.command_queue_depth)
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Detach from the service and drop every callback. Commands fail with
    /// [`PlaybackError::ServiceUnavailable`] afterwards.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.relay_generation.fetch_add(1, Ordering::AcqRel);

        let slot = std::mem::take(&mut *self.binding.lock().await);
        for binding in [slot.current, slot.stale].into_iter().flatten() {
            let _ = binding.remove().await;
        }
        self.callbacks.clear();
        info!("Playback channel shut down");
    }
}

impl fmt::Debug for PlaybackControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackControlChannel")
            .field("available", &self.is_available())
            .field("callbacks", &self.callbacks.len())
            .field("state", &self.session.read().state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_library::EntityRef;
    use core_plugins::RegistryOptions;
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;

    mock! {
        Service {}

        #[async_trait]
        impl PlaybackService for Service {
            async fn play(&self) -> bridge_traits::Result<()>;
            async fn pause(&self) -> bridge_traits::Result<()>;
            async fn next(&self) -> bridge_traits::Result<()>;
            async fn seek(&self, position_ms: u64) -> bridge_traits::Result<()>;
            async fn play_song(&self, song: &Song) -> bridge_traits::Result<()>;
            async fn current_track(&self) -> bridge_traits::Result<Option<Song>>;
            async fn current_queue(&self) -> bridge_traits::Result<Vec<Song>>;
            async fn is_playing(&self) -> bridge_traits::Result<bool>;
            async fn is_paused(&self) -> bridge_traits::Result<bool>;
            async fn current_track_position(&self) -> bridge_traits::Result<u64>;
            async fn current_track_length(&self) -> bridge_traits::Result<u64>;
            async fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> bridge_traits::Result<CallbackHandle>;
            async fn remove_callback(&self, handle: CallbackHandle) -> bridge_traits::Result<()>;
        }
    }

    type CapturedRelay = Arc<Mutex<Option<Arc<dyn PlaybackCallback>>>>;

    /// Mock that accepts the relay into `slot` and reports an idle session.
    fn idle_service(slot: &CapturedRelay) -> MockService {
        let mut service = MockService::new();
        let captured = Arc::clone(slot);
        service.expect_add_callback().returning(move |callback| {
            *captured.lock() = Some(callback);
            Ok(CallbackHandle(1))
        });
        service.expect_current_track().returning(|| Ok(None));
        service.expect_is_playing().returning(|| Ok(false));
        service.expect_is_paused().returning(|| Ok(false));
        service.expect_current_track_position().returning(|| Ok(0));
        service.expect_current_queue().returning(|| Ok(Vec::new()));
        service
    }

    #[derive(Default)]
    struct CountingCallback {
        started: AtomicUsize,
        paused: AtomicUsize,
        resumed: AtomicUsize,
        scrobbles: AtomicUsize,
    }

    impl PlaybackCallback for CountingCallback {
        fn on_song_started(&self, _song: &Song) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_song_scrobble(&self, _position_ms: u64) {
            self.scrobbles.fetch_add(1, Ordering::SeqCst);
        }

        fn on_playback_pause(&self) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        fn on_playback_resume(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(options: ChannelOptions) -> (Arc<ProviderRegistry>, Arc<PlaybackControlChannel>) {
        let registry = ProviderRegistry::new(
            RegistryOptions {
                auto_reconnect: false,
                ..RegistryOptions::default()
            },
            EventBus::default(),
        );
        let channel = PlaybackControlChannel::new(Arc::clone(&registry), EventBus::default(), options);
        (registry, channel)
    }

    fn song() -> Song {
        Song::new(EntityRef::new("p1", "42"), "A").with_duration_ms(180_000)
    }

    #[tokio::test]
    async fn test_unbound_commands_are_unavailable() {
        let (_registry, channel) = setup(ChannelOptions::default());
        let callback = Arc::new(CountingCallback::default());
        channel.add_callback(callback.clone());

        assert!(channel.play().await.unwrap_err().is_service_unavailable());
        assert!(channel.pause().await.unwrap_err().is_service_unavailable());
        assert!(channel.next().await.unwrap_err().is_service_unavailable());
        assert!(channel.seek(1_000).await.unwrap_err().is_service_unavailable());
        assert!(channel.play_song(&song()).await.unwrap_err().is_service_unavailable());
        assert!(channel.current_track().await.unwrap_err().is_service_unavailable());
        assert!(channel.current_queue().await.unwrap_err().is_service_unavailable());
        assert!(channel.is_playing().await.unwrap_err().is_service_unavailable());
        assert!(channel.is_paused().await.unwrap_err().is_service_unavailable());
        assert!(channel
            .current_track_position()
            .await
            .unwrap_err()
            .is_service_unavailable());
        assert!(channel
            .current_track_length()
            .await
            .unwrap_err()
            .is_service_unavailable());

        assert_eq!(callback.started.load(Ordering::SeqCst), 0);
        assert_eq!(callback.paused.load(Ordering::SeqCst), 0);
        assert!(!channel.is_available());
    }

    #[tokio::test]
    async fn test_song_start_reaches_every_callback_once() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        let relay = Arc::clone(&slot);
        service.expect_play_song().times(1).returning(move |song| {
            if let Some(relay) = relay.lock().clone() {
                relay.on_song_started(song);
            }
            Ok(())
        });
        registry.set_playback_service(Arc::new(service));

        let first = Arc::new(CountingCallback::default());
        let second = Arc::new(CountingCallback::default());
        channel.add_callback(first.clone());
        channel.add_callback(second.clone());

        channel.play_song(&song()).await.unwrap();

        assert_eq!(first.started.load(Ordering::SeqCst), 1);
        assert_eq!(second.started.load(Ordering::SeqCst), 1);
        let session = channel.session();
        assert!(session.is_playing());
        assert_eq!(session.current, Some(song()));
    }

    #[tokio::test]
    async fn test_repeated_transitions_are_delivered_once() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        registry.set_playback_service(Arc::new(idle_service(&slot)));
        channel.refresh_session().await.unwrap();

        let callback = Arc::new(CountingCallback::default());
        channel.add_callback(callback.clone());
        let relay = slot.lock().clone().unwrap();

        relay.on_song_started(&song());
        relay.on_song_scrobble(500);
        relay.on_playback_pause();
        relay.on_playback_pause();
        relay.on_song_scrobble(600);
        relay.on_playback_resume();
        relay.on_playback_resume();

        assert_eq!(callback.started.load(Ordering::SeqCst), 1);
        assert_eq!(callback.paused.load(Ordering::SeqCst), 1);
        assert_eq!(callback.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(callback.scrobbles.load(Ordering::SeqCst), 1);
        assert_eq!(channel.session().position_ms, 500);
    }

    #[tokio::test]
    async fn test_removed_callback_stops_receiving() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        registry.set_playback_service(Arc::new(idle_service(&slot)));
        channel.refresh_session().await.unwrap();

        let kept = Arc::new(CountingCallback::default());
        let removed = Arc::new(CountingCallback::default());
        channel.add_callback(kept.clone());
        let id = channel.add_callback(removed.clone());
        assert!(channel.remove_callback(id));

        slot.lock().clone().unwrap().on_song_started(&song());

        assert_eq!(kept.started.load(Ordering::SeqCst), 1);
        assert_eq!(removed.started.load(Ordering::SeqCst), 0);
        assert_eq!(channel.callback_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_maps_to_unavailable_and_unbinds() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        service
            .expect_play()
            .times(1)
            .returning(|| Err(BridgeError::Disconnected("service died".to_string())));
        registry.set_playback_service(Arc::new(service));

        let err = channel.play().await.unwrap_err();
        assert!(err.is_service_unavailable());
        assert!(registry.playback_service().is_none());
        assert!(channel.pause().await.unwrap_err().is_service_unavailable());
    }

    #[tokio::test]
    async fn test_rejected_command_is_command_failed() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        service
            .expect_next()
            .returning(|| Err(BridgeError::OperationFailed("queue locked".to_string())));
        registry.set_playback_service(Arc::new(service));

        let err = channel.next().await.unwrap_err();
        assert_eq!(
            err,
            PlaybackError::CommandFailed {
                command: "next".to_string(),
                message: "Bridge operation failed: queue locked".to_string(),
            }
        );
        assert!(channel.is_available());
    }

    #[tokio::test]
    async fn test_seek_with_nothing_playing_is_noop() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        service.expect_seek().never();
        registry.set_playback_service(Arc::new(service));

        channel.seek(5_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_strict_seek_with_nothing_playing_fails() {
        let (registry, channel) = setup(ChannelOptions {
            strict_seek: true,
            ..ChannelOptions::default()
        });
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        service.expect_seek().never();
        registry.set_playback_service(Arc::new(service));

        assert_eq!(channel.seek(5_000).await, Err(PlaybackError::NothingPlaying));
    }

    #[tokio::test]
    async fn test_relay_from_previous_binding_is_ignored() {
        let (registry, channel) = setup(ChannelOptions::default());
        let callback = Arc::new(CountingCallback::default());
        channel.add_callback(callback.clone());

        let old_slot: CapturedRelay = Arc::default();
        let mut old_service = idle_service(&old_slot);
        old_service
            .expect_remove_callback()
            .times(1)
            .returning(|_| Ok(()));
        registry.set_playback_service(Arc::new(old_service));
        channel.refresh_session().await.unwrap();

        let new_slot: CapturedRelay = Arc::default();
        registry.set_playback_service(Arc::new(idle_service(&new_slot)));
        channel.refresh_session().await.unwrap();

        old_slot.lock().clone().unwrap().on_song_started(&song());
        assert_eq!(callback.started.load(Ordering::SeqCst), 0);

        new_slot.lock().clone().unwrap().on_song_started(&song());
        assert_eq!(callback.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_relay() {
        let (registry, channel) = setup(ChannelOptions::default());
        let slot: CapturedRelay = Arc::default();
        let mut service = idle_service(&slot);
        service
            .expect_remove_callback()
            .times(1)
            .returning(|_| Ok(()));
        registry.set_playback_service(Arc::new(service));
        channel.refresh_session().await.unwrap();
        channel.add_callback(Arc::new(CountingCallback::default()));

        channel.shutdown().await;

        assert_eq!(channel.callback_count(), 0);
        assert!(channel.play().await.unwrap_err().is_service_unavailable());
    }
}
