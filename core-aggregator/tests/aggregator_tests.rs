use core_aggregator::{AggregatorOptions, ProviderAggregator, ProviderObserver};
use core_library::{Album, EntityRef, ProviderId, SearchResult, Song};
use core_plugins::{ProviderRegistry, RegistryOptions};
use core_runtime::events::EventBus;
use provider_memory::{MemoryCatalog, MemoryConnector};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ViewObserver {
    songs: Mutex<Vec<Vec<Arc<Song>>>>,
    searches: Mutex<Vec<SearchResult>>,
}

impl ProviderObserver for ViewObserver {
    fn on_song_update(&self, songs: &[Arc<Song>]) {
        self.songs.lock().unwrap().push(songs.to_vec());
    }

    fn on_search_result(&self, result: &SearchResult) {
        self.searches.lock().unwrap().push(result.clone());
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn core() -> (Arc<ProviderRegistry>, Arc<ProviderAggregator>) {
    let events = EventBus::default();
    let registry = ProviderRegistry::new(RegistryOptions::default(), events.clone());
    let aggregator =
        ProviderAggregator::new(Arc::clone(&registry), events, AggregatorOptions::default());
    (registry, aggregator)
}

#[tokio::test]
async fn test_retrieved_song_arrives_through_observer() {
    let (registry, aggregator) = core();
    let catalog = MemoryCatalog::new().with_song(Song::new(EntityRef::new("p1", "42"), "A"));
    let connector = Arc::new(MemoryConnector::new("p1", catalog));
    let id = registry.register_provider(connector.clone()).unwrap();
    registry.connect(&id).await.unwrap();

    let observer = Arc::new(ViewObserver::default());
    aggregator.add_observer(observer.clone());

    let song_ref = EntityRef::new("p1", "42");
    assert!(!aggregator.retrieve_song(&song_ref).loaded);

    eventually(|| !observer.songs.lock().unwrap().is_empty()).await;
    {
        let batches = observer.songs.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].title, "A");
    }

    // The provider's data changes and it pushes the new value.
    let provider = connector.provider().unwrap();
    provider.publish_song(Song::new(song_ref.clone(), "B"));
    assert_eq!(observer.songs.lock().unwrap().len(), 2);
    assert_eq!(aggregator.retrieve_song(&song_ref).title, "B");

    // Same value again: view unchanged, nothing re-broadcast.
    provider.publish_song(Song::new(song_ref.clone(), "B"));
    assert_eq!(observer.songs.lock().unwrap().len(), 2);
    assert_eq!(aggregator.entity_count(), 1);
}

#[tokio::test]
async fn test_search_partials_share_query_id() {
    let (registry, aggregator) = core();

    let fast = MemoryCatalog::new()
        .with_song(Song::new(EntityRef::new("a", "1"), "Moon River"))
        .with_song(Song::new(EntityRef::new("a", "2"), "Blue Moon"))
        .with_song(Song::new(EntityRef::new("a", "3"), "Moondance"));
    let slow = MemoryCatalog::new()
        .with_album(Album::new(EntityRef::new("b", "10"), "Harvest Moon"))
        .with_album(Album::new(EntityRef::new("b", "11"), "Moon Safari"));

    registry
        .register_provider(Arc::new(MemoryConnector::new("a", fast)))
        .unwrap();
    registry
        .register_provider(Arc::new(
            MemoryConnector::new("b", slow).with_latency(Duration::from_millis(80)),
        ))
        .unwrap();
    for (_, outcome) in registry.connect_all().await {
        outcome.unwrap();
    }

    let observer = Arc::new(ViewObserver::default());
    aggregator.add_observer(observer.clone());

    let query_id = aggregator.search("moon").await.unwrap();
    eventually(|| observer.searches.lock().unwrap().len() == 2).await;

    let results = observer.searches.lock().unwrap().clone();
    assert!(results.iter().all(|r| r.query_id == query_id));

    assert_eq!(results[0].songs.len(), 3);
    assert!(results[0].albums.is_empty());
    assert_eq!(results[0].pending_providers, vec![ProviderId::new("b")]);

    assert_eq!(results[1].songs.len(), 3);
    assert_eq!(results[1].albums.len(), 2);
    assert!(results[1].is_complete());

    assert_eq!(aggregator.search_result(&query_id), Some(results[1].clone()));
    let hit = aggregator.lookup_album(&EntityRef::new("b", "11")).unwrap();
    assert_eq!(hit.name, "Moon Safari");
}

#[tokio::test]
async fn test_fresh_observer_sees_latest_value() {
    let (registry, aggregator) = core();
    let connector = Arc::new(MemoryConnector::new("p1", MemoryCatalog::new()));
    let id = registry.register_provider(connector.clone()).unwrap();
    registry.connect(&id).await.unwrap();

    let provider = connector.provider().unwrap();
    let song_ref = EntityRef::new("p1", "7");
    for title in ["one", "two", "three"] {
        provider.publish_song(Song::new(song_ref.clone(), title));
    }

    let late = Arc::new(ViewObserver::default());
    aggregator.add_observer(late.clone());
    assert!(late.songs.lock().unwrap().is_empty());
    assert_eq!(aggregator.lookup_song(&song_ref).unwrap().title, "three");
}
