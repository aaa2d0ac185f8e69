//! # Playback Control
//!
//! The UI side of playback: commands to the playback-control service and
//! the events it sends back.
//!
//! ## Overview
//!
//! This module handles:
//! - [`PlaybackControlChannel`]: commands, callback fan-out and the
//!   session mirror
//! - [`CommandDispatcher`]: ordered, off-context command execution with
//!   future or callback results
//! - [`PositionPoller`]: playhead updates while something is playing
//!
//! The service itself lives behind `bridge_traits::PlaybackService` and may
//! run in another process. Audio decoding is the service's concern.

pub mod channel;
pub mod dispatch;
pub mod error;
pub mod poller;
pub mod session;

pub use channel::{ChannelOptions, PlaybackControlChannel, DEFAULT_COMMAND_QUEUE_DEPTH};
pub use dispatch::{CommandDispatcher, CommandOutcome, PendingCommand, PlaybackCommand};
pub use error::{PlaybackError, Result};
pub use poller::{PositionPoller, PositionUpdate, DEFAULT_POLL_INTERVAL};
pub use session::{PlaybackSession, TransportState};
