//! Position polling for progress displays.
//!
//! [`PositionPoller`] asks the service for the playhead at a fixed interval
//! (about 30 Hz by default) while something is playing. It starts when a
//! song starts or playback resumes and stops on pause, on an error, or once
//! the service reports that playback ended. Nothing is polled while paused.

use bridge_traits::PlaybackCallback;
use core_library::Song;
use core_runtime::ObserverId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::PlaybackControlChannel;

/// Default polling interval, roughly 30 updates per second.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionUpdate {
    pub position_ms: u64,
    pub length_ms: u64,
}

pub struct PositionPoller {
    channel: Weak<PlaybackControlChannel>,
    interval: Duration,
    updates: Arc<watch::Sender<Option<PositionUpdate>>>,
    running: Mutex<Option<CancellationToken>>,
    registration: Mutex<Option<ObserverId>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl PositionPoller {
    /// Register a poller as a callback on `channel`. Polling starts right
    /// away when the channel already reports playback.
    pub fn attach(channel: &Arc<PlaybackControlChannel>, interval: Duration) -> Arc<Self> {
        let (updates, _) = watch::channel(None);
        let poller = Arc::new(Self {
            channel: Arc::downgrade(channel),
            interval,
            updates: Arc::new(updates),
            running: Mutex::new(None),
            registration: Mutex::new(None),
            runtime: tokio::runtime::Handle::try_current().ok(),
        });

        let id = channel.add_callback(poller.clone());
        *poller.registration.lock() = Some(id);
        if channel.session().is_playing() {
            poller.start();
        }
        poller
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PositionUpdate>> {
        self.updates.subscribe()
    }

    pub fn latest(&self) -> Option<PositionUpdate> {
        *self.updates.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Stop polling and unregister from the channel.
    pub fn detach(&self) {
        self.stop();
        let registration = self.registration.lock().take();
        if let (Some(id), Some(channel)) = (registration, self.channel.upgrade()) {
            channel.remove_callback(id);
        }
    }

    fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }
        let Some(runtime) = &self.runtime else {
            warn!("No Tokio runtime; position polling disabled");
            return;
        };

        let token = CancellationToken::new();
        *running = Some(token.clone());
        runtime.spawn(poll_loop(
            self.channel.clone(),
            Arc::clone(&self.updates),
            self.interval,
            token,
        ));
        debug!(interval_ms = self.interval.as_millis() as u64, "Position polling started");
    }

    fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
            debug!("Position polling stopped");
        }
    }
}

impl PlaybackCallback for PositionPoller {
    fn on_song_started(&self, _song: &Song) {
        self.start();
    }

    fn on_song_scrobble(&self, _position_ms: u64) {}

    fn on_playback_pause(&self) {
        self.stop();
    }

    fn on_playback_resume(&self) {
        self.start();
    }
}

impl fmt::Debug for PositionPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionPoller")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .field("latest", &self.latest())
            .finish()
    }
}

async fn poll_loop(
    channel: Weak<PlaybackControlChannel>,
    updates: Arc<watch::Sender<Option<PositionUpdate>>>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(channel) = channel.upgrade() else { break };

        match poll_once(&channel).await {
            Ok(Some(update)) => {
                channel.record_position(update.position_ms);
                updates.send_replace(Some(update));
            }
            Ok(None) => {
                debug!("Playback ended; polling stops");
                break;
            }
            Err(err) => {
                debug!(error = %err, "Position poll failed; polling stops");
                break;
            }
        }
    }
    token.cancel();
}

async fn poll_once(channel: &PlaybackControlChannel) -> crate::Result<Option<PositionUpdate>> {
    if !channel.is_playing().await? {
        return Ok(None);
    }
    let position_ms = channel.current_track_position().await?;
    let length_ms = channel.current_track_length().await?;
    Ok(Some(PositionUpdate {
        position_ms,
        length_ms,
    }))
}
