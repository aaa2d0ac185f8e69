//! # Core Service
//!
//! Process-wide context that owns every core component.
//!
//! ## Overview
//!
//! [`CoreService::start`] builds the components from a validated
//! [`CoreConfig`] and wires them together:
//! - one [`EventBus`] shared by all components
//! - the [`ProviderRegistry`], with every configured provider registered
//!   and connected
//! - the [`ProviderAggregator`], attached to the registry as the reporter
//!   factory for provider connections
//! - the [`ArtworkCache`] over the configured artwork fetcher
//! - the [`PlaybackControlChannel`], plus a [`PositionPoller`] when position
//!   polling is enabled
//!
//! Components are handed to callers explicitly; there is no global lookup.
//! Several cores may coexist in one process, e.g. in tests.
//!
//! Provider or playback-service connections that fail during start keep
//! retrying in the background, so `start` only fails on configuration
//! errors.
//!
//! ## Usage
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .artwork_dir("/var/cache/omnimusic/art")
//!     .service_binder(Arc::new(LocalServiceBinder::new(service)))
//!     .provider_connector(Arc::new(my_connector))
//!     .build()?;
//!
//! let core = CoreService::start(config).await?;
//! core.aggregator().add_observer(Arc::new(LibraryView::default()));
//! core.wait_for_playback().await?;
//! core.playback().play().await?;
//!
//! core.shutdown().await;
//! ```

pub mod error;

pub use error::{CoreError, Result};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{FileArtworkFetcher, LocalPlaybackService, LocalServiceBinder};

use core_aggregator::{AggregatorOptions, ProviderAggregator};
use core_metadata::ArtworkCache;
use core_playback::{ChannelOptions, PlaybackControlChannel, PositionPoller};
use core_plugins::{ProviderRegistry, RegistryOptions};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Running core. Cheap to clone; clones share the same components.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<Components>,
}

struct Components {
    events: EventBus,
    registry: Arc<ProviderRegistry>,
    aggregator: Arc<ProviderAggregator>,
    artwork: Arc<ArtworkCache>,
    playback: Arc<PlaybackControlChannel>,
    poller: Option<Arc<PositionPoller>>,
    service_wait_timeout: Duration,
}

impl CoreService {
    /// Validate `config` and start the core.
    ///
    /// Must be called inside a Tokio runtime: connection retries, request
    /// delivery and position polling run on spawned tasks.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Runtime`] if the configuration is invalid
    /// - [`CoreError::Registry`] if two connectors share a provider id
    #[instrument(skip(config))]
    pub async fn start(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CoreError::InitializationFailed(
                "CoreService::start requires a Tokio runtime".to_string(),
            ));
        }

        let events = EventBus::new(config.event_buffer_size);
        let registry = ProviderRegistry::new(RegistryOptions::from_config(&config), events.clone());
        let aggregator = ProviderAggregator::new(
            Arc::clone(&registry),
            events.clone(),
            AggregatorOptions::from_config(&config),
        );
        let artwork = Arc::new(ArtworkCache::new(
            Arc::clone(&config.artwork_fetcher),
            config.artwork_cache_capacity,
        ));
        let playback = PlaybackControlChannel::new(
            Arc::clone(&registry),
            events.clone(),
            ChannelOptions::from_config(&config),
        );
        let poller = config
            .features
            .enable_position_polling
            .then(|| PositionPoller::attach(&playback, config.position_poll_interval));

        for connector in &config.provider_connectors {
            registry.register_provider(Arc::clone(connector))?;
        }
        for (provider_id, outcome) in registry.connect_all().await {
            if let Err(err) = outcome {
                warn!(provider = %provider_id, error = %err, "Provider not connected at start");
            }
        }

        if let Some(binder) = &config.service_binder {
            registry.set_service_binder(Arc::clone(binder));
            if let Err(err) = registry.bind_playback_service().await {
                warn!(error = %err, "Playback service not bound at start");
            }
        }

        info!(
            providers = config.provider_connectors.len(),
            playback_bound = playback.is_available(),
            "Core service started"
        );

        Ok(Self {
            inner: Arc::new(Components {
                events,
                registry,
                aggregator,
                artwork,
                playback,
                poller,
                service_wait_timeout: config.service_wait_timeout,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    pub fn aggregator(&self) -> &Arc<ProviderAggregator> {
        &self.inner.aggregator
    }

    pub fn artwork(&self) -> &Arc<ArtworkCache> {
        &self.inner.artwork
    }

    pub fn playback(&self) -> &Arc<PlaybackControlChannel> {
        &self.inner.playback
    }

    /// The position poller, present when position polling is enabled.
    pub fn position_poller(&self) -> Option<&Arc<PositionPoller>> {
        self.inner.poller.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Wait up to the configured `service_wait_timeout` for the playback
    /// service.
    pub async fn wait_for_playback(&self) -> Result<()> {
        self.inner
            .playback
            .wait_until_available(self.inner.service_wait_timeout)
            .await?;
        Ok(())
    }

    /// Stop polling, detach from the playback service and disconnect every
    /// provider. Components stay readable; commands report the service as
    /// unavailable afterwards.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if let Some(poller) = &self.inner.poller {
            poller.detach();
        }
        self.inner.playback.shutdown().await;
        self.inner.registry.shutdown().await;
        info!("Core service stopped");
    }
}

impl fmt::Debug for CoreService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreService")
            .field("aggregator", &self.inner.aggregator)
            .field("playback", &self.inner.playback)
            .field("polling", &self.inner.poller.is_some())
            .finish()
    }
}
