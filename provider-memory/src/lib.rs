//! # In-Memory Provider
//!
//! A provider plugin serving a fixed catalog held in memory.
//!
//! ## Overview
//!
//! - [`MemoryCatalog`] holds songs, albums, artists and playlists keyed by
//!   identifier and answers case-insensitive text searches
//! - [`MemoryProvider`] implements `MusicProvider`: every request is answered
//!   through the provider's reporter after an optional simulated latency
//! - [`MemoryConnector`] implements `ProviderConnector` and can fail its
//!   first connection attempts to exercise reconnect backoff
//!
//! ## Usage
//!
//! ```ignore
//! use provider_memory::{MemoryCatalog, MemoryConnector};
//!
//! let catalog = MemoryCatalog::new()
//!     .with_song(Song::new(EntityRef::new("mem", "42"), "Moonlight"));
//! let connector = Arc::new(MemoryConnector::new("mem", catalog));
//! let config = CoreConfig::builder().provider_connector(connector).build()?;
//! ```

pub mod catalog;
pub mod error;
pub mod provider;

pub use catalog::{CatalogHits, MemoryCatalog};
pub use error::{MemoryProviderError, Result};
pub use provider::{MemoryConnector, MemoryProvider};
