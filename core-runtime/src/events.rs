//! # Event Bus System
//!
//! Diagnostic event stream for hosts that want a single feed of what the core
//! is doing, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The observer and playback-callback contracts are the authoritative way UI
//! code learns about entity updates and playback transitions. The bus carries
//! a summary of the same activity (provider connection changes, merges,
//! search progress, playback transitions, command failures) for logging,
//! telemetry and debugging tools.
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │  Registry   ├──────────────>│           │     subscribe    ┌────────────┐
//! └─────────────┘               │           ├─────────────────>│ Subscriber │
//! ┌─────────────┐     emit      │ EventBus  │                  └────────────┘
//! │ Aggregator  ├──────────────>│ (broadcast│
//! └─────────────┘               │  channel) │     subscribe    ┌────────────┐
//! ┌─────────────┐     emit      │           ├─────────────────>│ Subscriber │
//! │  Playback   ├──────────────>│           │                  └────────────┘
//! └─────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ProviderEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut events = bus.subscribe();
//!
//! bus.emit(CoreEvent::Provider(ProviderEvent::Connected {
//!     provider_id: "local".to_string(),
//! }))
//! .ok();
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.description(), "Provider connected");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Provider and playback-service connection lifecycle
    Provider(ProviderEvent),
    /// Aggregated catalog activity
    Library(LibraryEvent),
    /// Playback transitions and command outcomes
    Playback(PlaybackEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Provider(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::CommandFailed { .. }) => EventSeverity::Error,
            CoreEvent::Provider(ProviderEvent::ConnectionFailed { .. })
            | CoreEvent::Provider(ProviderEvent::ServiceLost { .. })
            | CoreEvent::Library(LibraryEvent::ReportRejected { .. }) => EventSeverity::Warning,
            CoreEvent::Provider(ProviderEvent::Connected { .. })
            | CoreEvent::Provider(ProviderEvent::ServiceBound) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Provider Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProviderEvent {
    /// A bind attempt started.
    Connecting { provider_id: String, attempt: u32 },
    /// The provider is bound and reachable.
    Connected { provider_id: String },
    /// A bind attempt failed.
    ConnectionFailed {
        provider_id: String,
        message: String,
        /// Delay before the next attempt, if one is scheduled.
        retry_in_ms: Option<u64>,
    },
    /// The provider process went away.
    Disconnected { provider_id: String },
    /// The playback-control service is bound.
    ServiceBound,
    /// The playback-control service connection was lost.
    ServiceLost { reason: String },
}

impl ProviderEvent {
    fn description(&self) -> &str {
        match self {
            ProviderEvent::Connecting { .. } => "Connecting to provider",
            ProviderEvent::Connected { .. } => "Provider connected",
            ProviderEvent::ConnectionFailed { .. } => "Provider connection failed",
            ProviderEvent::Disconnected { .. } => "Provider disconnected",
            ProviderEvent::ServiceBound => "Playback service bound",
            ProviderEvent::ServiceLost { .. } => "Playback service lost",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// A provider report changed the aggregated view.
    EntitiesMerged {
        provider_id: String,
        kind: String,
        changed: usize,
    },
    /// A query was dispatched to connected providers.
    SearchStarted {
        query_id: String,
        query: String,
        providers: usize,
    },
    /// A partial result arrived for a running query.
    SearchUpdated {
        query_id: String,
        hits: usize,
        complete: bool,
    },
    /// A provider report was discarded.
    ReportRejected { provider_id: String, reason: String },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::EntitiesMerged { .. } => "Entities merged",
            LibraryEvent::SearchStarted { .. } => "Search started",
            LibraryEvent::SearchUpdated { .. } => "Search results updated",
            LibraryEvent::ReportRejected { .. } => "Provider report rejected",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    Started { song_ref: String, title: String },
    Paused,
    Resumed,
    /// A command issued through the control channel failed.
    CommandFailed {
        command: String,
        message: String,
        /// `true` when no playback service was bound.
        service_unavailable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused => "Playback paused",
            PlaybackEvent::Resumed => "Playback resumed",
            PlaybackEvent::CommandFailed { .. } => "Playback command failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers reached, or an error when there are
    /// none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates an independent receiver for future events. Past events are not
    /// replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let playback_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Playback(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is
    /// queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(id: &str) -> CoreEvent {
        CoreEvent::Provider(ProviderEvent::Connected {
            provider_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(connected("p1")).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(connected("p1")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), connected("p1"));
        assert_eq!(second.recv().await.unwrap(), connected("p1"));
    }

    #[tokio::test]
    async fn test_stream_filter_skips_other_domains() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));

        bus.emit(connected("p1")).ok();
        bus.emit(CoreEvent::Playback(PlaybackEvent::Paused)).ok();

        assert_eq!(
            stream.recv().await.unwrap(),
            CoreEvent::Playback(PlaybackEvent::Paused)
        );
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(connected(&format!("p{i}"))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_severity_mapping() {
        let failed = CoreEvent::Playback(PlaybackEvent::CommandFailed {
            command: "play".to_string(),
            message: "no service".to_string(),
            service_unavailable: true,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let retrying = CoreEvent::Provider(ProviderEvent::ConnectionFailed {
            provider_id: "p1".to_string(),
            message: "refused".to_string(),
            retry_in_ms: Some(200),
        });
        assert_eq!(retrying.severity(), EventSeverity::Warning);

        assert_eq!(connected("p1").severity(), EventSeverity::Info);
        assert_eq!(
            CoreEvent::Playback(PlaybackEvent::Resumed).severity(),
            EventSeverity::Debug
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Library(LibraryEvent::SearchUpdated {
            query_id: "q-1".to_string(),
            hits: 5,
            complete: false,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Library\""));
        assert!(json.contains("\"event\":\"SearchUpdated\""));

        let decoded: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
