//! Now-playing demonstration
//!
//! Starts a core with an in-memory provider and the in-process playback
//! service, searches the catalog, plays the first hit and prints position
//! updates until the song is paused.
//!
//! Run with:
//! ```bash
//! cargo run -p core-service --example now_playing_demo
//!
//! # JSON logs
//! cargo run -p core-service --example now_playing_demo -- json
//! ```

use anyhow::Context;
use bridge_traits::{ArtworkFetcher, PlaybackCallback};
use core_aggregator::ProviderObserver;
use core_library::{EntityRef, SearchResult, Song};
use core_runtime::config::CoreConfig;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::{CoreService, LocalPlaybackService, LocalServiceBinder};
use provider_memory::{MemoryCatalog, MemoryConnector};
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

struct NoArtwork;

#[async_trait::async_trait]
impl ArtworkFetcher for NoArtwork {
    async fn fetch(&self, key: &str, _url: Option<&str>) -> bridge_traits::Result<bytes::Bytes> {
        Err(bridge_traits::BridgeError::NotFound(key.to_string()))
    }
}

#[derive(Default)]
struct SearchView {
    latest: Mutex<Option<SearchResult>>,
    complete: Notify,
}

impl ProviderObserver for SearchView {
    fn on_search_result(&self, result: &SearchResult) {
        println!(
            "search '{}': {} hits, {} providers pending",
            result.query,
            result.hit_count(),
            result.pending_providers.len()
        );
        let complete = result.is_complete();
        *self.latest.lock().unwrap() = Some(result.clone());
        if complete {
            self.complete.notify_one();
        }
    }
}

struct PlayingBar;

impl PlaybackCallback for PlayingBar {
    fn on_song_started(&self, song: &Song) {
        println!("now playing: {}", song.title);
    }

    fn on_song_scrobble(&self, position_ms: u64) {
        println!("  scrobble at {position_ms} ms");
    }

    fn on_playback_pause(&self) {
        println!("paused");
    }

    fn on_playback_resume(&self) {
        println!("resumed");
    }
}

fn catalog() -> MemoryCatalog {
    MemoryCatalog::new()
        .with_song(Song::new(EntityRef::new("memory", "1"), "Moon River").with_duration_ms(160_000))
        .with_song(Song::new(EntityRef::new("memory", "2"), "Blue Moon").with_duration_ms(150_000))
        .with_song(Song::new(EntityRef::new("memory", "3"), "Daylight").with_duration_ms(210_000))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = match env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    };
    init_logging(LoggingConfig::default().with_format(format))?;

    let service = Arc::new(LocalPlaybackService::new());
    let config = CoreConfig::builder()
        .artwork_fetcher(Arc::new(NoArtwork))
        .service_binder(Arc::new(LocalServiceBinder::new(service)))
        .provider_connector(Arc::new(
            MemoryConnector::new("memory", catalog()).with_latency(Duration::from_millis(30)),
        ))
        .build()?;
    let core = CoreService::start(config).await?;

    let view = Arc::new(SearchView::default());
    core.aggregator().add_observer(view.clone());
    core.playback().add_callback(Arc::new(PlayingBar));

    core.aggregator().search("moon").await?;
    tokio::time::timeout(Duration::from_secs(2), view.complete.notified())
        .await
        .context("search did not complete")?;

    let first = view
        .latest
        .lock()
        .unwrap()
        .as_ref()
        .and_then(|result| result.songs.first().cloned())
        .context("no song matched")?;
    let song = core.aggregator().lookup_song(&first)?;

    core.wait_for_playback().await?;
    core.playback().play_song(&song).await?;

    if let Some(poller) = core.position_poller() {
        let mut updates = poller.subscribe();
        for _ in 0..5 {
            updates.changed().await?;
            if let Some(update) = *updates.borrow() {
                println!("  position {} / {} ms", update.position_ms, update.length_ms);
            }
        }
    }

    core.playback().pause().await?;
    info!(session = ?core.playback().session().state, "Demo finished");
    core.shutdown().await;
    Ok(())
}
