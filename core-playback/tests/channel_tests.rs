use bridge_desktop::{LocalPlaybackService, LocalServiceBinder};
use bridge_traits::PlaybackCallback;
use core_library::{EntityRef, Song};
use core_playback::{
    ChannelOptions, CommandOutcome, PlaybackCommand, PlaybackControlChannel, PlaybackError,
    PositionPoller,
};
use core_plugins::{ProviderRegistry, RegistryOptions};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Transitions {
    log: Mutex<Vec<String>>,
}

impl Transitions {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl PlaybackCallback for Transitions {
    fn on_song_started(&self, song: &Song) {
        self.log.lock().unwrap().push(format!("started:{}", song.title));
    }

    fn on_song_scrobble(&self, _position_ms: u64) {}

    fn on_playback_pause(&self) {
        self.log.lock().unwrap().push("paused".to_string());
    }

    fn on_playback_resume(&self) {
        self.log.lock().unwrap().push("resumed".to_string());
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

fn song(id: &str, title: &str) -> Song {
    Song::new(EntityRef::new("local", id), title).with_duration_ms(240_000)
}

fn bound_channel(
    service: &Arc<LocalPlaybackService>,
) -> (Arc<ProviderRegistry>, Arc<PlaybackControlChannel>, EventBus) {
    let events = EventBus::default();
    let registry = ProviderRegistry::new(
        RegistryOptions {
            service_retry: RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(50)),
            ..RegistryOptions::default()
        },
        events.clone(),
    );
    registry.set_playback_service(service.clone());
    let channel =
        PlaybackControlChannel::new(Arc::clone(&registry), events.clone(), ChannelOptions::default());
    (registry, channel, events)
}

#[tokio::test]
async fn test_unbound_channel_reports_unavailable_event() {
    let events = EventBus::default();
    let mut receiver = events.subscribe();
    let registry = ProviderRegistry::new(RegistryOptions::default(), events.clone());
    let channel = PlaybackControlChannel::new(registry, events, ChannelOptions::default());

    let err = channel.play().await.unwrap_err();
    assert!(matches!(err, PlaybackError::ServiceUnavailable(_)));

    match receiver.recv().await.unwrap() {
        CoreEvent::Playback(PlaybackEvent::CommandFailed {
            command,
            service_unavailable,
            ..
        }) => {
            assert_eq!(command, "play");
            assert!(service_unavailable);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_play_song_starts_once_per_callback() {
    let service = Arc::new(LocalPlaybackService::new());
    let (_registry, channel, _events) = bound_channel(&service);

    let first = Arc::new(Transitions::default());
    let second = Arc::new(Transitions::default());
    channel.add_callback(first.clone());
    channel.add_callback(second.clone());

    channel.play_song(&song("1", "Intro")).await.unwrap();

    assert_eq!(first.log(), vec!["started:Intro"]);
    assert_eq!(second.log(), vec!["started:Intro"]);
    assert_eq!(service.callback_count(), 1);
    assert_eq!(channel.current_track().await.unwrap().unwrap().title, "Intro");
}

#[tokio::test]
async fn test_transport_round_trip_delivers_each_transition() {
    let service = Arc::new(LocalPlaybackService::new());
    let (_registry, channel, _events) = bound_channel(&service);
    let callback = Arc::new(Transitions::default());
    channel.add_callback(callback.clone());

    channel.play_song(&song("1", "Intro")).await.unwrap();
    channel.pause().await.unwrap();
    channel.pause().await.unwrap();
    assert!(channel.is_paused().await.unwrap());
    channel.play().await.unwrap();
    channel.play().await.unwrap();

    assert_eq!(callback.log(), vec!["started:Intro", "paused", "resumed"]);
    assert!(channel.session().is_playing());
}

#[tokio::test]
async fn test_seek_moves_playhead_of_current_song() {
    let service = Arc::new(LocalPlaybackService::new());
    let (_registry, channel, _events) = bound_channel(&service);

    channel.seek(1_000).await.unwrap();
    assert!(channel.current_track().await.unwrap().is_none());

    channel.play_song(&song("1", "Intro")).await.unwrap();
    channel.pause().await.unwrap();
    channel.seek(90_000).await.unwrap();
    assert_eq!(channel.current_track_position().await.unwrap(), 90_000);
    assert_eq!(channel.current_track_length().await.unwrap(), 240_000);
}

#[tokio::test]
async fn test_dispatcher_runs_commands_in_order() {
    let service = Arc::new(LocalPlaybackService::new());
    let (_registry, channel, _events) = bound_channel(&service);
    let dispatcher = channel.dispatcher();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for command in [
        PlaybackCommand::PlaySong(song("1", "Intro")),
        PlaybackCommand::Pause,
        PlaybackCommand::IsPaused,
    ] {
        let done = done_tx.clone();
        let name = command.name();
        dispatcher
            .submit_with(command, move |outcome| {
                done.send((name, outcome)).ok();
            })
            .unwrap();
    }

    let mut completed = Vec::new();
    for _ in 0..3 {
        completed.push(done_rx.recv().await.unwrap());
    }
    assert_eq!(
        completed,
        vec![
            ("play_song", Ok(CommandOutcome::Done)),
            ("pause", Ok(CommandOutcome::Done)),
            ("is_paused", Ok(CommandOutcome::Flag(true))),
        ]
    );

    let queue = dispatcher.submit(PlaybackCommand::CurrentQueue).unwrap().await;
    assert_eq!(queue, Ok(CommandOutcome::Queue(vec![song("1", "Intro")])));

    dispatcher.close();
    eventually(|| dispatcher.is_closed()).await;
}

#[tokio::test]
async fn test_poller_runs_only_while_playing() {
    let service = Arc::new(LocalPlaybackService::new());
    let (_registry, channel, _events) = bound_channel(&service);
    let poller = PositionPoller::attach(&channel, Duration::from_millis(10));
    assert!(!poller.is_running());

    channel.play_song(&song("1", "Intro")).await.unwrap();
    eventually(|| poller.latest().is_some()).await;
    assert!(poller.is_running());
    assert_eq!(poller.latest().unwrap().length_ms, 240_000);

    channel.pause().await.unwrap();
    assert!(!poller.is_running());

    channel.play().await.unwrap();
    assert!(poller.is_running());

    poller.detach();
    assert!(!poller.is_running());
    assert_eq!(channel.callback_count(), 0);
}

#[tokio::test]
async fn test_service_death_and_rebind() {
    let service = Arc::new(LocalPlaybackService::new());
    let (registry, channel, _events) = bound_channel(&service);
    registry.set_service_binder(Arc::new(LocalServiceBinder::new(service.clone())));
    let callback = Arc::new(Transitions::default());
    channel.add_callback(callback.clone());

    channel.play_song(&song("1", "Intro")).await.unwrap();
    service.kill();

    let err = channel.next().await.unwrap_err();
    assert!(err.is_service_unavailable());
    assert!(!channel.is_available());

    service.restart();
    channel
        .wait_until_available(Duration::from_secs(2))
        .await
        .unwrap();

    channel.play_song(&song("2", "Outro")).await.unwrap();
    assert_eq!(callback.log(), vec!["started:Intro", "started:Outro"]);
}

#[tokio::test]
async fn test_rebinding_same_service_keeps_one_relay() {
    let service = Arc::new(LocalPlaybackService::new());
    let (registry, channel, _events) = bound_channel(&service);
    registry.set_service_binder(Arc::new(LocalServiceBinder::new(service.clone())));
    channel
        .wait_until_available(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(service.callback_count(), 1);

    for _ in 0..4 {
        service.kill();
        assert!(channel.next().await.unwrap_err().is_service_unavailable());
        service.restart();
        channel
            .wait_until_available(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(service.callback_count(), 1);
    }

    let callback = Arc::new(Transitions::default());
    channel.add_callback(callback.clone());
    channel.play_song(&song("1", "Intro")).await.unwrap();
    assert_eq!(callback.log(), vec!["started:Intro"]);
}
