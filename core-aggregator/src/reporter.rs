//! Per-provider reporting handle.

use bridge_traits::{ProviderReporter, ReporterFactory};
use core_library::{Album, Artist, Playlist, ProviderId, SearchResult, Song};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::aggregator::ProviderAggregator;

/// Reporter bound to one provider id.
///
/// Holds the aggregator weakly so a provider task that outlives the core
/// reports into nothing instead of keeping it alive.
pub struct AggregatorReporter {
    aggregator: Weak<ProviderAggregator>,
    provider: ProviderId,
}

impl AggregatorReporter {
    pub(crate) fn new(aggregator: Weak<ProviderAggregator>, provider: ProviderId) -> Self {
        Self {
            aggregator,
            provider,
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    fn with_aggregator<F>(&self, report: F)
    where
        F: FnOnce(&ProviderAggregator),
    {
        match self.aggregator.upgrade() {
            Some(aggregator) => report(&aggregator),
            None => debug!(provider = %self.provider, "Aggregator dropped; report ignored"),
        }
    }
}

impl ProviderReporter for AggregatorReporter {
    fn report_songs(&self, songs: Vec<Song>) {
        self.with_aggregator(|a| a.merge_entities(&self.provider, songs));
    }

    fn report_albums(&self, albums: Vec<Album>) {
        self.with_aggregator(|a| a.merge_entities(&self.provider, albums));
    }

    fn report_artists(&self, artists: Vec<Artist>) {
        self.with_aggregator(|a| a.merge_entities(&self.provider, artists));
    }

    fn report_playlists(&self, playlists: Vec<Playlist>) {
        self.with_aggregator(|a| a.merge_entities(&self.provider, playlists));
    }

    fn report_search_result(&self, result: SearchResult) {
        self.with_aggregator(|a| a.merge_search_result(&self.provider, result));
    }

    fn report_connected(&self) {
        self.with_aggregator(|a| a.provider_connected(&self.provider));
    }
}

impl ReporterFactory for ProviderAggregator {
    fn reporter_for(&self, provider: &ProviderId) -> Arc<dyn ProviderReporter> {
        Arc::new(AggregatorReporter::new(self.downgrade(), provider.clone()))
    }
}
