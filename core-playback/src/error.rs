//! # Playback Error Types
//!
//! Failures of playback-control commands. None of them is fatal: callers
//! retry, wait for the service, or disable the affected controls.

use core_plugins::RegistryError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// No playback-control service is bound, or it went away mid-call.
    #[error("Playback service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service is bound but rejected the command.
    #[error("Playback command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Seek with nothing playing while strict seeking is enabled.
    #[error("Nothing is playing")]
    NothingPlaying,

    /// The command dispatcher's worker has stopped.
    #[error("Command dispatcher is closed")]
    DispatcherClosed,

    /// The command dispatcher's queue is full.
    #[error("Command queue is full")]
    QueueFull,
}

impl PlaybackError {
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, PlaybackError::ServiceUnavailable(_))
    }
}

impl From<RegistryError> for PlaybackError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ServiceUnavailable(reason) => PlaybackError::ServiceUnavailable(reason),
            RegistryError::ShuttingDown => {
                PlaybackError::ServiceUnavailable("core is shutting down".to_string())
            }
            other => PlaybackError::ServiceUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
