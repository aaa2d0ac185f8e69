//! # Host Bridge Traits
//!
//! Capability interfaces at every seam between the core and the outside
//! world: provider plugins, the playback-control service, artwork sources and
//! host logging.
//!
//! ## Overview
//!
//! This crate defines the contract between the core and the processes or
//! libraries it talks to. Each trait is transport-agnostic: an in-process
//! implementation, a network RPC client or a shared-memory queue can all
//! satisfy it as long as the method contract is preserved.
//!
//! ## Traits
//!
//! ### Provider Plugins
//! - [`ProviderConnector`](provider::ProviderConnector) - Establishes a connection to one provider plugin
//! - [`MusicProvider`](provider::MusicProvider) - Requests entities and searches from a connected provider
//! - [`ProviderReporter`](provider::ProviderReporter) - Push channel providers report entities through
//! - [`ReporterFactory`](provider::ReporterFactory) - Hands each provider a reporter bound to its id
//!
//! ### Playback Control
//! - [`PlaybackService`](playback::PlaybackService) - Command surface of the playback-control service
//! - [`PlaybackCallback`](playback::PlaybackCallback) - Lifecycle events emitted by the service
//! - [`PlaybackServiceBinder`](playback::PlaybackServiceBinder) - Binds to the service process
//!
//! ### Resources & Utilities
//! - [`ArtworkFetcher`](artwork::ArtworkFetcher) - Loads artwork bytes by key
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! use core_runtime::Error;
//!
//! let fetcher = artwork_fetcher.ok_or_else(|| {
//!     Error::capability_missing(
//!         "ArtworkFetcher",
//!         "No artwork fetcher provided. \
//!          Desktop: enable the desktop-shims feature. \
//!          Other hosts: inject a native adapter.",
//!     )
//! })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should report a vanished remote end as `Disconnected` so the core can mark
//! the connection lost and rebind, and use `OperationFailed` for failures that
//! leave the connection usable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! async tasks.

pub mod artwork;
pub mod error;
pub mod playback;
pub mod provider;
pub mod logging;

pub use artwork::ArtworkFetcher;
pub use error::{BridgeError, Result};
pub use playback::{CallbackHandle, PlaybackCallback, PlaybackService, PlaybackServiceBinder};
pub use provider::{MusicProvider, ProviderConnector, ProviderReporter, ReporterFactory};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink, MemoryLogger};
