//! Read-through mirror of the service-owned playback session.

use core_library::Song;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// What the UI process knows about the session.
///
/// Updated from playback events and refreshed from the service when a song
/// starts or the service is (re)bound. Never authoritative: the service may
/// have moved on by the time it is read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackSession {
    pub current: Option<Song>,
    pub state: TransportState,
    /// Last position seen through a scrobble or a poll.
    pub position_ms: u64,
    pub length_ms: Option<u64>,
    /// Queue in play order. Duplicates are permitted.
    pub queue: Vec<Song>,
}

impl PlaybackSession {
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == TransportState::Paused
    }

    pub(crate) fn song_started(&mut self, song: &Song) {
        self.current = Some(song.clone());
        self.state = TransportState::Playing;
        self.position_ms = 0;
        self.length_ms = song.duration_ms;
    }

    /// Returns `false` when already paused, so the event is not a transition.
    pub(crate) fn paused(&mut self) -> bool {
        if self.state == TransportState::Paused {
            return false;
        }
        self.state = TransportState::Paused;
        true
    }

    /// Returns `false` when already playing.
    pub(crate) fn resumed(&mut self) -> bool {
        if self.state == TransportState::Playing {
            return false;
        }
        self.state = TransportState::Playing;
        true
    }

    pub(crate) fn scrobbled(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
    }
}
