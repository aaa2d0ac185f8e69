//! # Core Configuration Module
//!
//! Builder-based configuration for the player core.
//!
//! ## Overview
//!
//! `CoreConfig` holds every tunable of the core (cache bound, poll cadence,
//! retry policies, feature flags) plus the bridge implementations it talks
//! to. The builder validates everything up front and fails with actionable
//! messages.
//!
//! ## Required Dependencies
//!
//! - `ArtworkFetcher` - loads artwork for the keyed cache
//!
//! ## Optional Dependencies
//!
//! - `PlaybackServiceBinder` - without one, every playback command reports
//!   the service as unavailable until a binder is attached at runtime
//! - `ProviderConnector`s - zero or more provider plugins
//!
//! When the `desktop-shims` feature is enabled a file-based
//! `ArtworkFetcher` rooted at [`artwork_dir`](CoreConfigBuilder::artwork_dir)
//! is injected if none was provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .artwork_fetcher(Arc::new(MyArtworkFetcher))
//!     .service_binder(Arc::new(MyServiceBinder))
//!     .provider_connector(Arc::new(MyProviderConnector))
//!     .artwork_cache_capacity(Some(512))
//!     .strict_seek(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use bridge_traits::{ArtworkFetcher, PlaybackServiceBinder, ProviderConnector};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on resolved artwork entries.
pub const DEFAULT_ARTWORK_CACHE_CAPACITY: usize = 256;

/// 30 Hz position polling.
pub const DEFAULT_POSITION_POLL_INTERVAL: Duration = Duration::from_micros(1_000_000 / 30);

/// Core configuration. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Per-subscriber buffer of the diagnostic event bus
    pub event_buffer_size: usize,

    /// Backoff for provider bind attempts
    pub provider_retry: RetryPolicy,

    /// Backoff for playback-service bind attempts
    pub service_retry: RetryPolicy,

    /// Maximum resolved artwork entries; `None` keeps every entry
    pub artwork_cache_capacity: Option<usize>,

    /// Cadence of the position poller while playing
    pub position_poll_interval: Duration,

    /// Default timeout for waiting on the playback service
    pub service_wait_timeout: Duration,

    /// Number of search sessions the aggregator keeps results for
    pub max_tracked_searches: usize,

    /// Capacity of the off-context command dispatcher queue
    pub command_queue_depth: usize,

    pub features: FeatureFlags,

    /// Artwork source (required)
    pub artwork_fetcher: Arc<dyn ArtworkFetcher>,

    /// Playback-control service binder (optional)
    pub service_binder: Option<Arc<dyn PlaybackServiceBinder>>,

    /// Provider plugins to connect at start-up
    pub provider_connectors: Vec<Arc<dyn ProviderConnector>>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<String> = self
            .provider_connectors
            .iter()
            .map(|connector| connector.provider_id().to_string())
            .collect();

        f.debug_struct("CoreConfig")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("provider_retry", &self.provider_retry)
            .field("service_retry", &self.service_retry)
            .field("artwork_cache_capacity", &self.artwork_cache_capacity)
            .field("position_poll_interval", &self.position_poll_interval)
            .field("service_wait_timeout", &self.service_wait_timeout)
            .field("max_tracked_searches", &self.max_tracked_searches)
            .field("command_queue_depth", &self.command_queue_depth)
            .field("features", &self.features)
            .field("artwork_fetcher", &"ArtworkFetcher { ... }")
            .field(
                "service_binder",
                &self
                    .service_binder
                    .as_ref()
                    .map(|_| "PlaybackServiceBinder { ... }"),
            )
            .field("provider_connectors", &providers)
            .finish()
    }
}

/// Feature flags control optional behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Rebind providers automatically after their process dies
    pub enable_auto_reconnect: bool,

    /// Run the 30 Hz position poller while playing
    pub enable_position_polling: bool,

    /// Make `seek` fail with `NothingPlaying` instead of succeeding as a no-op
    pub strict_seek: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_auto_reconnect: true,
            enable_position_polling: true,
            strict_seek: false,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Buffer and queue sizes are non-zero
    /// - The artwork cache bound, when set, is non-zero
    /// - The poll interval lies within 1 ms..=1 s
    /// - Retry policies have `base_delay <= max_delay` and at least one attempt
    /// - Provider ids are unique
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.command_queue_depth == 0 {
            return Err(Error::Config(
                "Command queue depth must be greater than 0".to_string(),
            ));
        }

        if self.max_tracked_searches == 0 {
            return Err(Error::Config(
                "At least one search session must be tracked".to_string(),
            ));
        }

        if self.artwork_cache_capacity == Some(0) {
            return Err(Error::Config(
                "Artwork cache capacity must be greater than 0. \
                 Use None for an unbounded cache."
                    .to_string(),
            ));
        }

        if self.position_poll_interval < Duration::from_millis(1)
            || self.position_poll_interval > Duration::from_secs(1)
        {
            return Err(Error::Config(format!(
                "Position poll interval must be between 1ms and 1s, got {:?}",
                self.position_poll_interval
            )));
        }

        validate_retry("provider_retry", &self.provider_retry)?;
        validate_retry("service_retry", &self.service_retry)?;

        let mut seen = HashSet::new();
        for connector in &self.provider_connectors {
            let id = connector.provider_id();
            if !seen.insert(id.clone()) {
                return Err(Error::Config(format!(
                    "Provider '{}' is registered twice. Each connector needs a unique provider id.",
                    id
                )));
            }
        }

        Ok(())
    }
}

fn validate_retry(name: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.base_delay > policy.max_delay {
        return Err(Error::Config(format!(
            "{name}: base delay {:?} exceeds max delay {:?}",
            policy.base_delay, policy.max_delay
        )));
    }
    if policy.max_attempts == Some(0) {
        return Err(Error::Config(format!(
            "{name}: max attempts must be at least 1 (use None to retry forever)"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_artwork_fetcher(_artwork_dir: Option<PathBuf>) -> Result<Arc<dyn ArtworkFetcher>> {
    Err(Error::capability_missing(
        "ArtworkFetcher",
        "ArtworkFetcher implementation is required for the artwork cache. \
         Desktop: enable the 'desktop-shims' feature and set artwork_dir() to use the default FileArtworkFetcher. \
         Other hosts: inject a platform-native fetcher.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_artwork_fetcher(artwork_dir: Option<PathBuf>) -> Result<Arc<dyn ArtworkFetcher>> {
    use bridge_desktop::FileArtworkFetcher;

    let dir = artwork_dir.ok_or_else(|| {
        Error::Config(
            "Artwork directory is required for the default FileArtworkFetcher. \
             Use .artwork_dir() to set it or inject an ArtworkFetcher."
                .to_string(),
        )
    })?;

    let fetcher: Arc<dyn ArtworkFetcher> = Arc::new(FileArtworkFetcher::new(dir));
    Ok(fetcher)
}

/// Builder for [`CoreConfig`].
pub struct CoreConfigBuilder {
    event_buffer_size: usize,
    provider_retry: RetryPolicy,
    service_retry: RetryPolicy,
    artwork_cache_capacity: Option<usize>,
    position_poll_interval: Duration,
    service_wait_timeout: Duration,
    max_tracked_searches: usize,
    command_queue_depth: usize,
    features: FeatureFlags,
    artwork_dir: Option<PathBuf>,
    artwork_fetcher: Option<Arc<dyn ArtworkFetcher>>,
    service_binder: Option<Arc<dyn PlaybackServiceBinder>>,
    provider_connectors: Vec<Arc<dyn ProviderConnector>>,
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self {
            event_buffer_size: crate::events::DEFAULT_EVENT_BUFFER_SIZE,
            provider_retry: RetryPolicy::default(),
            service_retry: RetryPolicy::unbounded(
                Duration::from_millis(100),
                Duration::from_secs(5),
            ),
            artwork_cache_capacity: Some(DEFAULT_ARTWORK_CACHE_CAPACITY),
            position_poll_interval: DEFAULT_POSITION_POLL_INTERVAL,
            service_wait_timeout: Duration::from_secs(10),
            max_tracked_searches: 16,
            command_queue_depth: 32,
            features: FeatureFlags::default(),
            artwork_dir: None,
            artwork_fetcher: None,
            service_binder: None,
            provider_connectors: Vec::new(),
        }
    }
}

impl CoreConfigBuilder {
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Default: retry forever, 200 ms doubling up to 30 s.
    pub fn provider_retry(mut self, policy: RetryPolicy) -> Self {
        self.provider_retry = policy;
        self
    }

    /// Default: retry forever, 100 ms doubling up to 5 s.
    pub fn service_retry(mut self, policy: RetryPolicy) -> Self {
        self.service_retry = policy;
        self
    }

    /// Default: `Some(256)`. `None` disables eviction.
    pub fn artwork_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.artwork_cache_capacity = capacity;
        self
    }

    /// Default: 1/30 s.
    pub fn position_poll_interval(mut self, interval: Duration) -> Self {
        self.position_poll_interval = interval;
        self
    }

    /// Default: 10 s.
    pub fn service_wait_timeout(mut self, timeout: Duration) -> Self {
        self.service_wait_timeout = timeout;
        self
    }

    /// Default: 16.
    pub fn max_tracked_searches(mut self, count: usize) -> Self {
        self.max_tracked_searches = count;
        self
    }

    /// Default: 32.
    pub fn command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }

    pub fn enable_auto_reconnect(mut self, enabled: bool) -> Self {
        self.features.enable_auto_reconnect = enabled;
        self
    }

    pub fn enable_position_polling(mut self, enabled: bool) -> Self {
        self.features.enable_position_polling = enabled;
        self
    }

    pub fn strict_seek(mut self, enabled: bool) -> Self {
        self.features.strict_seek = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Directory read by the default desktop artwork fetcher.
    pub fn artwork_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.artwork_dir = Some(path.into());
        self
    }

    pub fn artwork_fetcher(mut self, fetcher: Arc<dyn ArtworkFetcher>) -> Self {
        self.artwork_fetcher = Some(fetcher);
        self
    }

    pub fn service_binder(mut self, binder: Arc<dyn PlaybackServiceBinder>) -> Self {
        self.service_binder = Some(binder);
        self
    }

    /// Adds a provider plugin. May be called repeatedly.
    pub fn provider_connector(mut self, connector: Arc<dyn ProviderConnector>) -> Self {
        self.provider_connectors.push(connector);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// Returns an error if the artwork fetcher is missing and no desktop
    /// default can be provided, or if any value fails
    /// [`CoreConfig::validate`].
    pub fn build(self) -> Result<CoreConfig> {
        let artwork_fetcher = match self.artwork_fetcher {
            Some(fetcher) => fetcher,
            None => provide_default_artwork_fetcher(self.artwork_dir)?,
        };

        let config = CoreConfig {
            event_buffer_size: self.event_buffer_size,
            provider_retry: self.provider_retry,
            service_retry: self.service_retry,
            artwork_cache_capacity: self.artwork_cache_capacity,
            position_poll_interval: self.position_poll_interval,
            service_wait_timeout: self.service_wait_timeout,
            max_tracked_searches: self.max_tracked_searches,
            command_queue_depth: self.command_queue_depth,
            features: self.features,
            artwork_fetcher,
            service_binder: self.service_binder,
            provider_connectors: self.provider_connectors,
        };

        config.validate()?;

        Ok(config)
    }
}
