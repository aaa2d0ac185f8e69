//! # Desktop Bridge Implementations
//!
//! In-process implementations of the bridge traits for desktop hosts.
//!
//! ## Overview
//!
//! - `PlaybackService` using [`LocalPlaybackService`]: queue, transport state
//!   and a scrobble heartbeat driven by a Tokio interval
//! - `PlaybackServiceBinder` using [`LocalServiceBinder`], which can simulate
//!   a service that takes a few attempts to come up
//! - `ArtworkFetcher` using [`FileArtworkFetcher`], backed by `tokio::fs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileArtworkFetcher, LocalPlaybackService, LocalServiceBinder};
//!
//! let service = Arc::new(LocalPlaybackService::new());
//! let binder = LocalServiceBinder::new(service.clone());
//! let fetcher = FileArtworkFetcher::new(artwork_dir);
//! ```

mod artwork;
mod playback;

pub use artwork::FileArtworkFetcher;
pub use playback::{LocalPlaybackService, LocalServiceBinder, DEFAULT_SCROBBLE_INTERVAL};
