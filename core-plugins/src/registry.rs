//! # Provider Registry
//!
//! Owns the known provider plugins and the single playback-control service
//! connection, and hands out their live handles.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --died--> Disconnected
//!                               |
//!                               +--error--> Failed --backoff--> Connecting
//! ```
//!
//! A provider failing to connect never affects the others; its state moves to
//! `Failed` and a retry is scheduled according to the provider
//! [`RetryPolicy`]. The playback service follows the same lifecycle with its
//! own policy.
//!
//! ## Awaiting the playback service
//!
//! Instead of polling [`ProviderRegistry::playback_service`] until it returns
//! a handle, callers can await
//! [`wait_for_playback_service`](ProviderRegistry::wait_for_playback_service)
//! with a timeout, watch [`subscribe_playback_service`](ProviderRegistry::subscribe_playback_service),
//! or register a one-shot [`on_service_available`](ProviderRegistry::on_service_available)
//! callback.

use bridge_traits::{
    MusicProvider, PlaybackService, PlaybackServiceBinder, ProviderConnector, ProviderReporter,
    ReporterFactory,
};
use core_library::{Album, Artist, Playlist, ProviderId, SearchResult, Song};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, ProviderEvent};
use core_runtime::RetryPolicy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{RegistryError, Result};

// =============================================================================
// Public types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last bind attempt failed; a retry may be scheduled.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of one provider's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConnection {
    pub provider_id: ProviderId,
    pub state: ConnectionState,
    /// Attempts made since the last explicit connect.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Registry behaviour, usually derived from [`CoreConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub provider_retry: RetryPolicy,
    pub service_retry: RetryPolicy,
    pub auto_reconnect: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            provider_retry: RetryPolicy::default(),
            service_retry: RetryPolicy::unbounded(
                Duration::from_millis(100),
                Duration::from_secs(5),
            ),
            auto_reconnect: true,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            provider_retry: config.provider_retry,
            service_retry: config.service_retry,
            auto_reconnect: config.features.enable_auto_reconnect,
        }
    }
}

type ServiceHandle = Option<Arc<dyn PlaybackService>>;

// =============================================================================
// Internal state
// =============================================================================

struct ProviderSlot {
    connector: Arc<dyn ProviderConnector>,
    state: ConnectionState,
    provider: Option<Arc<dyn MusicProvider>>,
    attempts: u32,
    last_error: Option<String>,
    /// Bumped by every explicit connect or disconnect. Retry tasks carrying
    /// an older generation stop.
    generation: u64,
}

struct ServiceSlot {
    state: ConnectionState,
    binder: Option<Arc<dyn PlaybackServiceBinder>>,
    generation: u64,
}

enum Attempt<T> {
    Succeeded(T),
    Failed {
        error: RegistryError,
        retry_in: Option<Duration>,
    },
    /// Superseded by a newer connect, an unregister or shutdown.
    Stale,
}

/// Reporter used while no aggregator is attached.
struct DiscardingReporter {
    provider: ProviderId,
}

impl DiscardingReporter {
    fn discard(&self, what: &str, count: usize) {
        debug!(provider = %self.provider, what, count, "No aggregator attached; report discarded");
    }
}

impl ProviderReporter for DiscardingReporter {
    fn report_songs(&self, songs: Vec<Song>) {
        self.discard("songs", songs.len());
    }

    fn report_albums(&self, albums: Vec<Album>) {
        self.discard("albums", albums.len());
    }

    fn report_artists(&self, artists: Vec<Artist>) {
        self.discard("artists", artists.len());
    }

    fn report_playlists(&self, playlists: Vec<Playlist>) {
        self.discard("playlists", playlists.len());
    }

    fn report_search_result(&self, result: SearchResult) {
        self.discard("search hits", result.hit_count());
    }

    fn report_connected(&self) {
        self.discard("connected", 1);
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Process-wide lookup of provider plugins and the playback service.
///
/// Always used behind an `Arc`; connection attempts and retries run on the
/// ambient Tokio runtime.
pub struct ProviderRegistry {
    options: RegistryOptions,
    events: EventBus,
    providers: RwLock<HashMap<ProviderId, ProviderSlot>>,
    reporters: RwLock<Option<Weak<dyn ReporterFactory>>>,
    service: RwLock<ServiceSlot>,
    service_tx: watch::Sender<ServiceHandle>,
    generations: AtomicU64,
    shutdown: CancellationToken,
}

impl ProviderRegistry {
    pub fn new(options: RegistryOptions, events: EventBus) -> Arc<Self> {
        let (service_tx, _) = watch::channel(None);
        Arc::new(Self {
            options,
            events,
            providers: RwLock::new(HashMap::new()),
            reporters: RwLock::new(None),
            service: RwLock::new(ServiceSlot {
                state: ConnectionState::Disconnected,
                binder: None,
                generation: 0,
            }),
            service_tx,
            generations: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: ProviderEvent) {
        self.events.emit(CoreEvent::Provider(event)).ok();
    }

    /// Route reports from connected providers to `factory`.
    ///
    /// Held weakly: the aggregator owns the registry, not the other way round.
    pub fn attach_reporter_factory(&self, factory: Weak<dyn ReporterFactory>) {
        *self.reporters.write() = Some(factory);
    }

    fn reporter_for(&self, provider: &ProviderId) -> Arc<dyn ProviderReporter> {
        let factory = self.reporters.read().as_ref().and_then(Weak::upgrade);
        match factory {
            Some(factory) => factory.reporter_for(provider),
            None => Arc::new(DiscardingReporter {
                provider: provider.clone(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Providers
    // -------------------------------------------------------------------------

    /// Add a provider plugin in the `Disconnected` state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateProvider`] if a connector with the
    /// same provider id is already registered.
    pub fn register_provider(&self, connector: Arc<dyn ProviderConnector>) -> Result<ProviderId> {
        let provider_id = connector.provider_id();
        let mut providers = self.providers.write();
        if providers.contains_key(&provider_id) {
            return Err(RegistryError::DuplicateProvider(provider_id));
        }
        providers.insert(
            provider_id.clone(),
            ProviderSlot {
                connector,
                state: ConnectionState::Disconnected,
                provider: None,
                attempts: 0,
                last_error: None,
                generation: 0,
            },
        );
        info!(provider = %provider_id, "Registered provider");
        Ok(provider_id)
    }

    /// Remove a provider, closing its connection if it has one.
    pub async fn unregister_provider(&self, provider_id: &ProviderId) -> Result<()> {
        let slot = self
            .providers
            .write()
            .remove(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;

        if slot.state == ConnectionState::Connected {
            if let Err(err) = slot.connector.disconnect().await {
                warn!(provider = %provider_id, error = %err, "Provider disconnect failed");
            }
            self.emit(ProviderEvent::Disconnected {
                provider_id: provider_id.to_string(),
            });
        }
        info!(provider = %provider_id, "Unregistered provider");
        Ok(())
    }

    /// Connect one provider.
    ///
    /// Returns once the first attempt finished. When it fails and the retry
    /// policy allows it, further attempts continue in the background with
    /// exponential backoff until one succeeds.
    ///
    /// Connecting a provider that is already connected or connecting is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownProvider`] if the id was never registered
    /// - [`RegistryError::ConnectionFailed`] if the first attempt failed
    /// - [`RegistryError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    #[instrument(skip(self), fields(provider = %provider_id))]
    pub async fn connect(self: &Arc<Self>, provider_id: &ProviderId) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let (connector, generation) = {
            let mut providers = self.providers.write();
            let slot = providers
                .get_mut(provider_id)
                .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
            if matches!(
                slot.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                debug!(state = %slot.state, "Connect ignored");
                return Ok(());
            }
            slot.generation = self.next_generation();
            slot.attempts = 0;
            (Arc::clone(&slot.connector), slot.generation)
        };

        match self.provider_attempt(provider_id, &connector, generation, 1).await {
            Attempt::Succeeded(()) | Attempt::Stale => Ok(()),
            Attempt::Failed { error, retry_in } => {
                if let Some(delay) = retry_in {
                    self.spawn_provider_retry(provider_id.clone(), connector, generation, 2, delay);
                }
                Err(error)
            }
        }
    }

    /// Connect every registered provider concurrently. Failures are logged
    /// and retried per provider; they never affect the other providers.
    pub async fn connect_all(self: &Arc<Self>) -> Vec<(ProviderId, Result<()>)> {
        let ids: Vec<ProviderId> = self.providers.read().keys().cloned().collect();
        let attempts = ids.into_iter().map(|id| {
            let registry = Arc::clone(self);
            async move {
                let result = registry.connect(&id).await;
                (id, result)
            }
        });

        let mut outcomes = Vec::new();
        let mut set = tokio::task::JoinSet::new();
        for attempt in attempts {
            set.spawn(attempt);
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "Provider connect task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        outcomes
    }

    async fn provider_attempt(
        &self,
        provider_id: &ProviderId,
        connector: &Arc<dyn ProviderConnector>,
        generation: u64,
        attempt: u32,
    ) -> Attempt<()> {
        if self.shutdown.is_cancelled() {
            return Attempt::Stale;
        }
        let current = self.update_provider(provider_id, generation, |slot| {
            slot.state = ConnectionState::Connecting;
            slot.attempts = attempt;
        });
        if !current {
            return Attempt::Stale;
        }
        self.emit(ProviderEvent::Connecting {
            provider_id: provider_id.to_string(),
            attempt,
        });

        let reporter = self.reporter_for(provider_id);
        match connector.connect(Arc::clone(&reporter)).await {
            Ok(provider) => {
                let current = self.update_provider(provider_id, generation, |slot| {
                    slot.state = ConnectionState::Connected;
                    slot.provider = Some(provider);
                    slot.last_error = None;
                });
                if !current {
                    debug!(provider = %provider_id, "Discarding superseded connection");
                    connector.disconnect().await.ok();
                    return Attempt::Stale;
                }
                info!(provider = %provider_id, attempt, "Provider connected");
                self.emit(ProviderEvent::Connected {
                    provider_id: provider_id.to_string(),
                });
                reporter.report_connected();
                Attempt::Succeeded(())
            }
            Err(err) => {
                let message = err.to_string();
                let retry_in = (!self.shutdown.is_cancelled()
                    && self.options.provider_retry.allows_retry(attempt))
                .then(|| self.options.provider_retry.delay_for(attempt));

                let current = self.update_provider(provider_id, generation, |slot| {
                    slot.state = ConnectionState::Failed;
                    slot.provider = None;
                    slot.last_error = Some(message.clone());
                });
                if !current {
                    return Attempt::Stale;
                }
                warn!(
                    provider = %provider_id,
                    attempt,
                    error = %message,
                    retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                    "Provider connection failed"
                );
                self.emit(ProviderEvent::ConnectionFailed {
                    provider_id: provider_id.to_string(),
                    message: message.clone(),
                    retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
                });
                Attempt::Failed {
                    error: RegistryError::ConnectionFailed {
                        provider: provider_id.clone(),
                        message,
                    },
                    retry_in,
                }
            }
        }
    }

    fn spawn_provider_retry(
        self: &Arc<Self>,
        provider_id: ProviderId,
        connector: Arc<dyn ProviderConnector>,
        generation: u64,
        first_attempt: u32,
        first_delay: Duration,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(provider = %provider_id, "No Tokio runtime; provider retry not scheduled");
            return;
        };
        let registry = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        runtime.spawn(async move {
            let mut attempt = first_attempt;
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let Some(registry) = registry.upgrade() else { return };
                match registry
                    .provider_attempt(&provider_id, &connector, generation, attempt)
                    .await
                {
                    Attempt::Succeeded(()) | Attempt::Stale => return,
                    Attempt::Failed { retry_in: None, .. } => return,
                    Attempt::Failed {
                        retry_in: Some(next),
                        ..
                    } => {
                        attempt += 1;
                        delay = next;
                    }
                }
            }
        });
    }

    /// Apply `change` if the slot still exists and belongs to `generation`.
    fn update_provider<F>(&self, provider_id: &ProviderId, generation: u64, change: F) -> bool
    where
        F: FnOnce(&mut ProviderSlot),
    {
        let mut providers = self.providers.write();
        match providers.get_mut(provider_id) {
            Some(slot) if slot.generation == generation => {
                change(slot);
                true
            }
            _ => false,
        }
    }

    /// Record that a provider's process died.
    ///
    /// The provider moves to `Disconnected`; with auto-reconnect enabled a
    /// new connection is attempted right away.
    pub fn notify_disconnected(self: &Arc<Self>, provider_id: &ProviderId, reason: &str) {
        let was_connected = {
            let mut providers = self.providers.write();
            match providers.get_mut(provider_id) {
                Some(slot) if slot.state == ConnectionState::Connected => {
                    slot.state = ConnectionState::Disconnected;
                    slot.provider = None;
                    slot.last_error = Some(reason.to_string());
                    slot.generation = self.next_generation();
                    true
                }
                _ => false,
            }
        };
        if !was_connected {
            return;
        }

        warn!(provider = %provider_id, reason, "Provider disconnected");
        self.emit(ProviderEvent::Disconnected {
            provider_id: provider_id.to_string(),
        });

        if self.options.auto_reconnect && !self.shutdown.is_cancelled() {
            let registry = Arc::clone(self);
            let provider_id = provider_id.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(err) = registry.connect(&provider_id).await {
                        debug!(provider = %provider_id, error = %err, "Reconnect attempt failed");
                    }
                });
            }
        }
    }

    /// Snapshot of every registered provider, ordered by id.
    pub fn providers(&self) -> Vec<ProviderConnection> {
        let mut connections: Vec<ProviderConnection> = self
            .providers
            .read()
            .iter()
            .map(|(id, slot)| ProviderConnection {
                provider_id: id.clone(),
                state: slot.state,
                attempts: slot.attempts,
                last_error: slot.last_error.clone(),
            })
            .collect();
        connections.sort_by(|a, b| a.provider_id.as_str().cmp(b.provider_id.as_str()));
        connections
    }

    /// Handles of every connected provider.
    pub fn connected_providers(&self) -> Vec<Arc<dyn MusicProvider>> {
        self.providers
            .read()
            .values()
            .filter_map(|slot| slot.provider.clone())
            .collect()
    }

    /// Handle of one provider.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ProviderUnavailable`] if the provider is registered
    /// but not connected; [`RegistryError::UnknownProvider`] otherwise.
    pub fn provider(&self, provider_id: &ProviderId) -> Result<Arc<dyn MusicProvider>> {
        let providers = self.providers.read();
        let slot = providers
            .get(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
        slot.provider
            .clone()
            .ok_or_else(|| RegistryError::ProviderUnavailable(provider_id.clone()))
    }

    pub fn state(&self, provider_id: &ProviderId) -> Option<ConnectionState> {
        self.providers.read().get(provider_id).map(|slot| slot.state)
    }

    // -------------------------------------------------------------------------
    // Playback service
    // -------------------------------------------------------------------------

    pub fn set_service_binder(&self, binder: Arc<dyn PlaybackServiceBinder>) {
        self.service.write().binder = Some(binder);
    }

    /// Bind the playback-control service through the configured binder.
    ///
    /// Returns once the first attempt finished; on failure binding continues
    /// in the background according to the service retry policy, and waiters
    /// are woken when it succeeds.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ServiceUnavailable`] if no binder is configured or
    /// the first attempt failed.
    #[instrument(skip(self))]
    pub async fn bind_playback_service(self: &Arc<Self>) -> Result<Arc<dyn PlaybackService>> {
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }
        if let Some(service) = self.playback_service() {
            return Ok(service);
        }

        let (binder, generation) = {
            let mut slot = self.service.write();
            let binder = slot.binder.clone().ok_or_else(|| {
                RegistryError::ServiceUnavailable("no playback service binder configured".into())
            })?;
            if slot.state == ConnectionState::Connecting {
                return Err(RegistryError::ServiceUnavailable(
                    "playback service bind in progress".into(),
                ));
            }
            slot.generation = self.next_generation();
            (binder, slot.generation)
        };

        match self.service_attempt(&binder, generation, 1).await {
            Attempt::Succeeded(service) => Ok(service),
            Attempt::Stale => Err(RegistryError::ServiceUnavailable(
                "bind superseded".into(),
            )),
            Attempt::Failed { error, retry_in } => {
                if let Some(delay) = retry_in {
                    self.spawn_service_retry(binder, generation, 2, delay);
                }
                Err(error)
            }
        }
    }

    async fn service_attempt(
        &self,
        binder: &Arc<dyn PlaybackServiceBinder>,
        generation: u64,
        attempt: u32,
    ) -> Attempt<Arc<dyn PlaybackService>> {
        if self.shutdown.is_cancelled() {
            return Attempt::Stale;
        }
        if !self.update_service(generation, |slot| {
            slot.state = ConnectionState::Connecting;
        }) {
            return Attempt::Stale;
        }

        match binder.bind().await {
            Ok(service) => {
                if !self.update_service(generation, |slot| {
                    slot.state = ConnectionState::Connected;
                }) {
                    return Attempt::Stale;
                }
                self.service_tx.send_replace(Some(Arc::clone(&service)));
                info!(attempt, "Playback service bound");
                self.emit(ProviderEvent::ServiceBound);
                Attempt::Succeeded(service)
            }
            Err(err) => {
                let retry_in = (!self.shutdown.is_cancelled()
                    && self.options.service_retry.allows_retry(attempt))
                .then(|| self.options.service_retry.delay_for(attempt));
                if !self.update_service(generation, |slot| {
                    slot.state = ConnectionState::Failed;
                }) {
                    return Attempt::Stale;
                }
                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                    "Playback service bind failed"
                );
                Attempt::Failed {
                    error: RegistryError::ServiceUnavailable(err.to_string()),
                    retry_in,
                }
            }
        }
    }

    fn spawn_service_retry(
        self: &Arc<Self>,
        binder: Arc<dyn PlaybackServiceBinder>,
        generation: u64,
        first_attempt: u32,
        first_delay: Duration,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime; playback service retry not scheduled");
            return;
        };
        let registry = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        runtime.spawn(async move {
            let mut attempt = first_attempt;
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let Some(registry) = registry.upgrade() else { return };
                match registry.service_attempt(&binder, generation, attempt).await {
                    Attempt::Succeeded(_) | Attempt::Stale => return,
                    Attempt::Failed { retry_in: None, .. } => return,
                    Attempt::Failed {
                        retry_in: Some(next),
                        ..
                    } => {
                        attempt += 1;
                        delay = next;
                    }
                }
            }
        });
    }

    fn update_service<F>(&self, generation: u64, change: F) -> bool
    where
        F: FnOnce(&mut ServiceSlot),
    {
        let mut slot = self.service.write();
        if slot.generation != generation {
            return false;
        }
        change(&mut slot);
        true
    }

    /// Install an already bound service, bypassing the binder.
    pub fn set_playback_service(&self, service: Arc<dyn PlaybackService>) {
        {
            let mut slot = self.service.write();
            slot.generation = self.next_generation();
            slot.state = ConnectionState::Connected;
        }
        self.service_tx.send_replace(Some(service));
        info!("Playback service installed");
        self.emit(ProviderEvent::ServiceBound);
    }

    /// Current service handle, or `None` while unbound.
    pub fn playback_service(&self) -> Option<Arc<dyn PlaybackService>> {
        self.service_tx.borrow().clone()
    }

    pub fn service_state(&self) -> ConnectionState {
        self.service.read().state
    }

    /// Receiver that observes every bind and loss of the playback service.
    pub fn subscribe_playback_service(&self) -> watch::Receiver<ServiceHandle> {
        self.service_tx.subscribe()
    }

    /// Wait until the playback service is bound.
    ///
    /// Returns immediately when it already is.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::ServiceUnavailable`] when `timeout` elapses first
    /// - [`RegistryError::ShuttingDown`] when the registry shuts down while
    ///   waiting
    pub async fn wait_for_playback_service(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn PlaybackService>> {
        let mut receiver = self.service_tx.subscribe();
        let shutdown = self.shutdown.clone();

        let wait = async {
            tokio::select! {
                _ = shutdown.cancelled() => Err(RegistryError::ShuttingDown),
                bound = receiver.wait_for(Option::is_some) => match bound {
                    Ok(handle) => (*handle)
                        .clone()
                        .ok_or_else(|| RegistryError::ServiceUnavailable("service lost".into())),
                    Err(_) => Err(RegistryError::ShuttingDown),
                },
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::ServiceUnavailable(format!(
                "not bound within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Run `callback` once the playback service is bound, on a spawned task.
    /// Runs on the next bind when the service is currently unbound.
    pub fn on_service_available<F>(&self, callback: F)
    where
        F: FnOnce(Arc<dyn PlaybackService>) + Send + 'static,
    {
        let mut receiver = self.service_tx.subscribe();
        let shutdown = self.shutdown.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime; service availability callback dropped");
            return;
        };

        runtime.spawn(async move {
            let service = tokio::select! {
                _ = shutdown.cancelled() => None,
                bound = receiver.wait_for(Option::is_some) => {
                    bound.ok().and_then(|handle| (*handle).clone())
                }
            };
            if let Some(service) = service {
                callback(service);
            }
        });
    }

    /// Record that the playback service connection was lost.
    ///
    /// Subsequent commands see the service as unavailable. With
    /// auto-reconnect and a binder configured, rebinding starts right away.
    pub fn notify_service_disconnected(self: &Arc<Self>, reason: &str) {
        let rebind = {
            let mut slot = self.service.write();
            if slot.state != ConnectionState::Connected {
                return;
            }
            slot.state = ConnectionState::Disconnected;
            slot.generation = self.next_generation();
            slot.binder.is_some()
        };
        self.service_tx.send_replace(None);
        warn!(reason, "Playback service lost");
        self.emit(ProviderEvent::ServiceLost {
            reason: reason.to_string(),
        });

        if rebind && self.options.auto_reconnect && !self.shutdown.is_cancelled() {
            let registry = Arc::clone(self);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(err) = registry.bind_playback_service().await {
                        debug!(error = %err, "Rebind attempt failed");
                    }
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop all retries, wake service waiters and disconnect every provider.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let connected: Vec<(ProviderId, Arc<dyn ProviderConnector>)> = {
            let mut providers = self.providers.write();
            providers
                .iter_mut()
                .filter_map(|(id, slot)| {
                    let was_connected = slot.state == ConnectionState::Connected;
                    slot.state = ConnectionState::Disconnected;
                    slot.provider = None;
                    slot.generation = 0;
                    was_connected.then(|| (id.clone(), Arc::clone(&slot.connector)))
                })
                .collect()
        };

        for (id, connector) in connected {
            if let Err(err) = connector.disconnect().await {
                warn!(provider = %id, error = %err, "Provider disconnect failed");
            }
        }

        {
            let mut slot = self.service.write();
            slot.state = ConnectionState::Disconnected;
            slot.generation = 0;
        }
        self.service_tx.send_replace(None);
        info!("Provider registry shut down");
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .field("service_state", &self.service_state())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
