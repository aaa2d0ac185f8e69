//! # Provider Aggregator
//!
//! Merges entity reports from every provider plugin into one aggregated
//! view and fans changes out to UI observers.
//!
//! ## Overview
//!
//! - [`ProviderAggregator`]: merge, lookup, relation resolution and search
//! - [`ProviderObserver`]: the callback set observers implement
//! - [`AggregatorReporter`]: the per-provider reporting handle the registry
//!   passes to each provider on connect
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::new(RegistryOptions::default(), events.clone());
//! let aggregator = ProviderAggregator::new(registry.clone(), events, AggregatorOptions::default());
//! aggregator.add_observer(Arc::new(MyView::default()));
//!
//! registry.connect_all().await;
//! let song = aggregator.retrieve_song(&EntityRef::new("local", "42"));
//! if !song.is_loaded() {
//!     // on_song_update delivers it once the provider answers
//! }
//! ```

pub mod aggregator;
pub mod error;
pub mod observer;
pub mod reporter;
mod search;

pub use aggregator::{AggregatorOptions, ProviderAggregator, DEFAULT_MAX_TRACKED_SEARCHES};
pub use error::{AggregatorError, Result};
pub use observer::ProviderObserver;
pub use reporter::AggregatorReporter;
