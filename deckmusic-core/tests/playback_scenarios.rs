use async_trait::async_trait;
use deckmusic_core::{
    AssetCache, AudioEvent, AudioEvents, AudioOutput, AudioSink, Config, CoreError,
    FrontendSettings, LyricRequest, LyricResponse, MusicBackend, PersistenceGateway, PlayMode,
    PlaybackController, PlaybackError, PlayerEvent, ProviderInfo, SettingsStore,
    StoredQueueState, StreamUrlRequest, StreamUrlResponse, Track,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn track(mid: &str) -> Track {
    Track {
        mid: mid.to_string(),
        name: format!("Song {mid}"),
        artist: "Artist".into(),
        duration: 180,
        ..Track::default()
    }
}

fn tracks(mids: &[&str]) -> Vec<Track> {
    mids.iter().map(|m| track(m)).collect()
}

fn url_for(mid: &str) -> String {
    format!("http://stream.test/{mid}.mp3")
}

#[derive(Default)]
struct FakeBackend {
    unavailable: Mutex<HashMap<String, String>>,
    broken: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    lyrics: Mutex<HashMap<String, String>>,
    url_calls: Mutex<Vec<String>>,
    switched: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn url_calls_for(&self, mid: &str) -> usize {
        self.url_calls.lock().iter().filter(|m| *m == mid).count()
    }
}

#[async_trait]
impl MusicBackend for FakeBackend {
    async fn resolve_stream_url(
        &self,
        request: &StreamUrlRequest,
    ) -> Result<StreamUrlResponse, CoreError> {
        self.url_calls.lock().push(request.mid.clone());
        let delay = self.delays.lock().get(&request.mid).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.lock().contains(&request.mid) {
            return Err(CoreError::Backend {
                operation: "get_song_url",
                reason: "connection reset".into(),
            });
        }
        let unavailable = self.unavailable.lock().get(&request.mid).cloned();
        if let Some(reason) = unavailable {
            return Ok(StreamUrlResponse {
                success: false,
                error: Some(reason),
                ..StreamUrlResponse::default()
            });
        }
        Ok(StreamUrlResponse {
            success: true,
            url: Some(url_for(&request.mid)),
            ..StreamUrlResponse::default()
        })
    }

    async fn resolve_lyric(&self, request: &LyricRequest) -> Result<LyricResponse, CoreError> {
        let lyric = self.lyrics.lock().get(&request.mid).cloned();
        Ok(LyricResponse {
            success: lyric.is_some(),
            lyric,
            ..LyricResponse::default()
        })
    }

    async fn current_provider(&self) -> Result<Option<ProviderInfo>, CoreError> {
        Ok(Some(ProviderInfo {
            id: "qq".into(),
            name: "QQ Music".into(),
        }))
    }

    async fn last_provider_id(&self) -> Result<Option<String>, CoreError> {
        Ok(Some("qq".into()))
    }

    async fn switch_provider(&self, provider_id: &str) -> Result<(), CoreError> {
        self.switched.lock().push(provider_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedSink {
    sources: Mutex<Vec<String>>,
    current: Mutex<Option<String>>,
    plays: AtomicUsize,
    volume_calls: AtomicUsize,
    rejected: Mutex<HashSet<String>>,
    play_delays: Mutex<HashMap<String, Duration>>,
}

#[async_trait]
impl AudioSink for ScriptedSink {
    fn set_source(&self, url: &str) {
        self.sources.lock().push(url.to_string());
        *self.current.lock() = Some(url.to_string());
    }

    fn clear_source(&self) {
        *self.current.lock() = None;
    }

    async fn play(&self) -> Result<(), String> {
        let url = self.current.lock().clone().unwrap_or_default();
        let delay = self.play_delays.lock().get(&url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.lock().contains(&url) {
            return Err("NotAllowedError: autoplay blocked".into());
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) {}

    fn seek(&self, _position: Duration) {}

    fn set_volume(&self, _volume: f32) {
        self.volume_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn current_time(&self) -> Duration {
        Duration::ZERO
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(180))
    }
}

#[derive(Default)]
struct RecordingStore {
    initial: Mutex<Option<FrontendSettings>>,
    saved: Mutex<Vec<FrontendSettings>>,
}

#[async_trait]
impl SettingsStore for RecordingStore {
    async fn load_settings(&self) -> deckmusic_core::Result<Option<FrontendSettings>> {
        Ok(self.initial.lock().clone())
    }

    async fn save_settings(&self, settings: &FrontendSettings) -> deckmusic_core::Result<()> {
        self.saved.lock().push(settings.clone());
        Ok(())
    }
}

struct Harness {
    controller: Arc<PlaybackController>,
    backend: Arc<FakeBackend>,
    sink: Arc<ScriptedSink>,
    events: Arc<Mutex<Option<AudioEvents>>>,
    store: Arc<RecordingStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(RecordingStore::default())
    }

    fn with_store(store: RecordingStore) -> Self {
        let config = Config::default();
        let backend = Arc::new(FakeBackend::default());
        let sink = Arc::new(ScriptedSink::default());
        let events = Arc::new(Mutex::new(None));

        let (s, e) = (Arc::clone(&sink), Arc::clone(&events));
        let output = AudioOutput::new(
            Box::new(move |handle| {
                *e.lock() = Some(handle);
                Arc::clone(&s) as Arc<dyn AudioSink>
            }),
            config.playback.initial_volume,
        );
        let cache = AssetCache::new(
            Arc::clone(&backend) as Arc<dyn MusicBackend>,
            &config.cache,
        );
        let store = Arc::new(store);
        let gateway = PersistenceGateway::new(
            Arc::clone(&store) as Arc<dyn SettingsStore>,
            config.persistence.debounce(),
        );
        let controller = PlaybackController::new(
            output,
            cache,
            Arc::clone(&backend) as Arc<dyn MusicBackend>,
            gateway,
            &config.playback,
        );

        Self {
            controller,
            backend,
            sink,
            events,
            store,
        }
    }

    fn emit(&self, event: AudioEvent) {
        let events = self.events.lock().clone().unwrap();
        events.emit(event);
    }

    fn cursor(&self) -> Option<usize> {
        self.controller.snapshot().cursor
    }

    fn current_mid(&self) -> Option<String> {
        self.controller.snapshot().current_track.map(|t| t.mid)
    }
}

/// Let spawned tasks (auto-skip, lyric fetch, prefetch) run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_order_mode_next_stops_at_end_of_timeline() {
    let h = Harness::new();
    assert!(h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await);
    assert_eq!(h.cursor(), Some(0));

    h.controller.next().await;
    assert_eq!(h.cursor(), Some(1));
    assert_eq!(h.current_mid().as_deref(), Some("t2"));
    assert!(h.controller.snapshot().is_playing);

    h.controller.next().await;
    assert_eq!(h.cursor(), Some(2));
    assert_eq!(h.current_mid().as_deref(), Some("t3"));

    h.controller.next().await;
    assert_eq!(h.cursor(), Some(2));
    assert_eq!(h.current_mid().as_deref(), Some("t3"));
}

#[tokio::test(start_paused = true)]
async fn test_single_mode_next_restarts_current_track() {
    let h = Harness::new();
    h.controller.set_mode(PlayMode::Single);
    h.controller
        .play_timeline(&tracks(&["t1", "t2", "t3"]), 1)
        .await;
    let plays = h.sink.plays.load(Ordering::SeqCst);

    h.controller.next().await;
    assert_eq!(h.cursor(), Some(1));
    assert_eq!(h.sink.plays.load(Ordering::SeqCst), plays + 1);
    assert_eq!(h.sink.sources.lock().last().cloned(), Some(url_for("t2")));

    h.controller.prev().await;
    assert_eq!(h.cursor(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_missing_source_auto_skips_after_delay() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("t2".into(), "no_source".into());

    assert!(h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await);
    h.controller.next().await;
    let snapshot = h.controller.snapshot();
    assert_eq!(
        snapshot.error,
        Some(PlaybackError::NoSource {
            reason: "no_source".into()
        })
    );
    assert!(!snapshot.loading);
    assert!(h.controller.has_pending_auto_skip());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.cursor(), Some(1));

    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(h.cursor(), Some(2));
    assert!(h.controller.snapshot().is_playing);
    assert_eq!(h.controller.snapshot().error, None);
}

#[tokio::test(start_paused = true)]
async fn test_manual_action_cancels_pending_auto_skip() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("t2".into(), "no_source".into());

    h.controller
        .play_timeline(&tracks(&["t1", "t2", "t3", "t4"]), 0)
        .await;
    h.controller.next().await;
    assert!(h.controller.has_pending_auto_skip());

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.controller.play_at(3).await;
    assert!(!h.controller.has_pending_auto_skip());

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(h.cursor(), Some(3));
    assert_eq!(h.backend.url_calls_for("t3"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_auto_skip() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("t2".into(), "gone".into());
    h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await;
    h.controller.next().await;
    assert!(h.controller.has_pending_auto_skip());

    h.controller.stop();
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;

    assert_eq!(h.backend.url_calls_for("t3"), 0);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.current_track, None);
    // stop resets the session but keeps the queue
    assert_eq!(snapshot.tracks.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_need_more_callback() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    h.controller
        .register_need_more_tracks(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, CoreError>(tracks(&["t3"])) }.boxed()
        })));

    h.controller.play_timeline(&tracks(&["t1", "t2"]), 1).await;
    h.controller.stop();
    h.controller.next().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.snapshot().tracks.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_track_failure_does_not_auto_skip() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("t1".into(), "gone".into());
    h.controller.play_track(track("t1")).await;
    h.controller.play_at(0).await;
    assert!(h.controller.snapshot().error.is_some());
    assert!(!h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_direct_selection_failure_does_not_auto_skip() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("t1".into(), "gone".into());

    assert!(!h.controller.play_timeline(&tracks(&["t1", "t2"]), 0).await);
    assert!(h.controller.snapshot().error.is_some());
    assert!(!h.controller.has_pending_auto_skip());

    h.backend
        .unavailable
        .lock()
        .insert("t3".into(), "gone".into());
    assert!(!h.controller.play_track(track("t3")).await);
    assert_eq!(h.current_mid().as_deref(), Some("t3"));
    assert!(!h.controller.has_pending_auto_skip());

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(h.current_mid().as_deref(), Some("t3"));
    assert_eq!(h.backend.url_calls_for("t2"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_enqueue_failure_does_not_auto_skip() {
    let h = Harness::new();
    h.backend
        .unavailable
        .lock()
        .insert("a".into(), "gone".into());

    assert_eq!(h.controller.enqueue(&tracks(&["a", "b"])).await, 2);
    assert!(h.controller.snapshot().error.is_some());
    assert!(!h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_playback_invalidates_url_and_auto_skips() {
    let h = Harness::new();
    h.sink.rejected.lock().insert(url_for("t2"));

    h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await;
    h.controller.next().await;
    assert!(matches!(
        h.controller.snapshot().error,
        Some(PlaybackError::Rejected { .. })
    ));
    assert!(h.controller.has_pending_auto_skip());

    // retrying refetches the URL instead of reusing the rejected one
    h.sink.rejected.lock().clear();
    assert!(h.controller.play_at(1).await);
    assert_eq!(h.backend.url_calls_for("t2"), 2);
    assert!(!h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_output_failure_follows_the_attempts_auto_skip() {
    let mut settings = FrontendSettings::default();
    settings.provider_queues.insert(
        "qq".into(),
        StoredQueueState {
            playlist: tracks(&["a", "b", "c"]),
            current_index: 0,
            current_mid: Some("a".into()),
        },
    );
    let store = RecordingStore::default();
    *store.initial.lock() = Some(settings);
    let h = Harness::with_store(store);
    h.controller.restore().await;

    // resuming the stored queue never skips on its own
    h.controller.toggle_play().await;
    assert!(h.controller.snapshot().is_playing);
    h.emit(AudioEvent::Failed("decode error".into()));
    settle().await;
    assert!(matches!(
        h.controller.snapshot().error,
        Some(PlaybackError::Rejected { .. })
    ));
    assert!(!h.controller.has_pending_auto_skip());

    assert!(h.controller.play_at(1).await);
    h.emit(AudioEvent::Failed("decode error".into()));
    settle().await;
    assert!(h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout_is_not_auto_skipped() {
    let h = Harness::new();
    h.sink
        .play_delays
        .lock()
        .insert(url_for("t2"), Duration::from_secs(60));

    assert!(h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await);
    h.controller.next().await;
    let snapshot = h.controller.snapshot();
    assert!(matches!(
        snapshot.error,
        Some(PlaybackError::LoadTimeout { .. })
    ));
    assert!(!snapshot.loading);
    assert!(!h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_unexpected_and_not_auto_skipped() {
    let h = Harness::new();
    h.backend.broken.lock().insert("t2".into());

    h.controller.play_timeline(&tracks(&["t1", "t2", "t3"]), 0).await;
    h.controller.next().await;
    assert!(matches!(
        h.controller.snapshot().error,
        Some(PlaybackError::Unexpected { .. })
    ));
    assert!(!h.controller.has_pending_auto_skip());
}

#[tokio::test(start_paused = true)]
async fn test_stale_url_fetch_does_not_override_newer_selection() {
    let h = Harness::new();
    h.controller
        .play_timeline(&tracks(&["t1", "t2", "t3"]), 2)
        .await;
    h.backend
        .delays
        .lock()
        .insert("t1".into(), Duration::from_millis(500));
    h.backend
        .delays
        .lock()
        .insert("t2".into(), Duration::from_millis(10));

    let slow = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.play_at(0).await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.backend.url_calls_for("t1"), 1);

    assert!(h.controller.play_at(1).await);
    assert!(!slow.await.unwrap());

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.cursor, Some(1));
    assert_eq!(snapshot.current_track.map(|t| t.mid).as_deref(), Some("t2"));
    assert!(snapshot.is_playing);
    assert!(!h.sink.sources.lock().contains(&url_for("t1")));
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_and_playback_share_one_url_fetch() {
    let h = Harness::new();
    h.backend
        .delays
        .lock()
        .insert("t2".into(), Duration::from_millis(100));

    h.controller.play_timeline(&tracks(&["t1", "t2"]), 0).await;
    tokio::task::yield_now().await;
    h.controller.next().await;

    assert_eq!(h.current_mid().as_deref(), Some("t2"));
    assert_eq!(h.backend.url_calls_for("t2"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_volume_change_is_idempotent_and_committed_once() {
    let h = Harness::new();
    h.controller.play_track(track("t1")).await;
    let baseline = h.sink.volume_calls.load(Ordering::SeqCst);

    h.controller.set_volume(0.5, false);
    h.controller.set_volume(0.5, false);
    assert_eq!(h.sink.volume_calls.load(Ordering::SeqCst), baseline + 1);

    h.controller.set_volume(0.5, true);
    assert_eq!(h.sink.volume_calls.load(Ordering::SeqCst), baseline + 1);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let saved = h.store.saved.lock();
    assert_eq!(saved.last().and_then(|s| s.volume), Some(0.5));
    assert!((h.controller.snapshot().volume - 0.5).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_shuffle_visits_every_track_before_repeating() {
    let h = Harness::new();
    h.controller.set_mode(PlayMode::Shuffle);
    h.controller
        .play_timeline(&tracks(&["a", "b", "c", "d", "e"]), 0)
        .await;

    let mut visited = vec![h.cursor().unwrap()];
    for _ in 0..4 {
        h.controller.next().await;
        visited.push(h.cursor().unwrap());
    }
    let distinct: HashSet<_> = visited.iter().collect();
    assert_eq!(distinct.len(), 5);

    h.controller.prev().await;
    assert_eq!(h.cursor(), Some(visited[3]));

    // redo walks forward through what was already heard
    h.controller.next().await;
    assert_eq!(h.cursor(), Some(visited[4]));
}

#[tokio::test(start_paused = true)]
async fn test_jump_discards_shuffle_redo_history() {
    let h = Harness::new();
    h.controller.set_mode(PlayMode::Shuffle);
    h.controller
        .play_timeline(&tracks(&["a", "b", "c", "d"]), 0)
        .await;
    h.controller.next().await;
    h.controller.next().await;
    h.controller.prev().await;
    let history = h.controller.shuffle_history();
    assert_eq!(history.len(), 3);

    // jumping to a track already heard rewinds the history to it
    h.controller.play_at(history[0]).await;
    assert_eq!(h.controller.shuffle_history(), vec![history[0]]);
}

#[tokio::test(start_paused = true)]
async fn test_remove_queued_only_touches_future_and_shifts_shuffle() {
    let h = Harness::new();
    h.controller
        .play_timeline(&tracks(&["a", "b", "c", "d", "e"]), 1)
        .await;
    assert!(!h.controller.remove_queued(0));
    assert!(!h.controller.remove_queued(1));
    assert!(!h.controller.remove_queued(9));
    assert!(h.controller.remove_queued(4));
    assert_eq!(h.controller.snapshot().tracks.len(), 4);

    h.controller.set_mode(PlayMode::Shuffle);
    assert_eq!(h.controller.shuffle_history(), vec![1]);
    h.controller.play_at(0).await;
    h.controller.play_at(3).await;
    h.controller.prev().await;
    assert_eq!(h.cursor(), Some(0));
    assert_eq!(h.controller.shuffle_history(), vec![1, 0, 3]);
    assert_eq!(h.controller.shuffle_pool(), vec![2]);

    // removal realigns shuffle state to the current track
    assert!(h.controller.remove_queued(2));
    assert_eq!(h.controller.shuffle_history(), vec![1, 0]);
    assert_eq!(h.controller.shuffle_pool(), vec![2]);
    assert_eq!(h.controller.snapshot().tracks.len(), 3);

    h.controller.prev().await;
    assert_eq!(h.cursor(), Some(1));
    assert_eq!(h.current_mid().as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_ended_advances_only_when_there_is_somewhere_to_go() {
    let h = Harness::new();
    h.controller.play_track(track("solo")).await;
    h.emit(AudioEvent::Ended);
    settle().await;
    let snapshot = h.controller.snapshot();
    assert!(!snapshot.is_playing);
    assert_eq!(h.sink.plays.load(Ordering::SeqCst), 1);

    h.controller.set_mode(PlayMode::Single);
    h.controller.play_at(0).await;
    h.emit(AudioEvent::Ended);
    settle().await;
    assert_eq!(h.sink.plays.load(Ordering::SeqCst), 3);
    assert!(h.controller.snapshot().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_ended_moves_to_next_track_in_order_mode() {
    let h = Harness::new();
    h.controller.play_timeline(&tracks(&["t1", "t2"]), 0).await;
    h.emit(AudioEvent::Ended);
    settle().await;
    assert_eq!(h.cursor(), Some(1));
    assert!(h.controller.snapshot().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_need_more_tracks_refills_exhausted_queue_once() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    h.controller
        .register_need_more_tracks(Some(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok::<_, CoreError>(tracks(&["t1", "t3"]))
                } else {
                    Ok(Vec::new())
                }
            }
            .boxed()
        })));

    h.controller.play_timeline(&tracks(&["t1", "t2"]), 1).await;
    h.controller.next().await;
    assert_eq!(h.current_mid().as_deref(), Some("t3"));
    assert_eq!(h.controller.snapshot().tracks.len(), 3);

    h.controller.next().await;
    assert_eq!(h.current_mid().as_deref(), Some("t3"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_play_track_moves_pending_duplicate_next_to_cursor() {
    let h = Harness::new();
    h.controller
        .play_timeline(&tracks(&["a", "b", "c"]), 0)
        .await;
    h.controller.play_track(track("c")).await;

    let snapshot = h.controller.snapshot();
    let mids: Vec<_> = snapshot.tracks.iter().map(|t| t.mid.as_str()).collect();
    assert_eq!(mids, vec!["a", "c", "b"]);
    assert_eq!(snapshot.cursor, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_starts_when_idle_and_never_interrupts() {
    let h = Harness::new();
    assert_eq!(h.controller.enqueue(&tracks(&["a", "b"])).await, 2);
    assert_eq!(h.current_mid().as_deref(), Some("a"));
    let plays = h.sink.plays.load(Ordering::SeqCst);

    assert_eq!(h.controller.enqueue(&tracks(&["b", "c"])).await, 1);
    assert_eq!(h.current_mid().as_deref(), Some("a"));
    assert_eq!(h.sink.plays.load(Ordering::SeqCst), plays);
    assert_eq!(h.controller.snapshot().tracks.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lyric_is_fetched_after_start() {
    let h = Harness::new();
    h.backend
        .lyrics
        .lock()
        .insert("t1".into(), "[00:01.00]first line".into());
    let mut events = h.controller.events();

    h.controller.play_track(track("t1")).await;
    settle().await;

    let lyric = h.controller.snapshot().lyric.unwrap();
    assert_eq!(lyric.lines[0].text, "first line");

    let mut loaded = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PlayerEvent::LyricLoaded { ref mid, .. } if mid == "t1") {
            loaded = true;
        }
    }
    assert!(loaded);
}

#[tokio::test(start_paused = true)]
async fn test_restore_resumes_stored_queue_mode_and_volume() {
    let mut settings = FrontendSettings {
        play_mode: Some(PlayMode::Shuffle),
        volume: Some(0.3),
        ..FrontendSettings::default()
    };
    settings.provider_queues.insert(
        "qq".into(),
        StoredQueueState {
            playlist: tracks(&["a", "b", "c"]),
            current_index: 0,
            current_mid: Some("b".into()),
        },
    );
    let store = RecordingStore::default();
    *store.initial.lock() = Some(settings);
    let h = Harness::with_store(store);

    h.controller.restore().await;
    let snapshot = h.controller.snapshot();
    assert!(snapshot.settings_restored);
    assert_eq!(snapshot.provider_id.as_deref(), Some("qq"));
    assert_eq!(snapshot.cursor, Some(1));
    assert_eq!(snapshot.mode, PlayMode::Shuffle);
    assert!((snapshot.volume - 0.3).abs() < f32::EPSILON);
    assert!(!snapshot.is_playing);

    // no source yet: toggling loads the resume point
    h.controller.toggle_play().await;
    assert_eq!(h.sink.sources.lock().last().cloned(), Some(url_for("b")));
    assert!(h.controller.snapshot().is_playing);

    h.controller.toggle_play().await;
    assert!(!h.controller.snapshot().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_queue_is_persisted_per_provider() {
    let h = Harness::new();
    h.controller.restore().await;
    h.controller
        .play_timeline(&tracks(&["a", "b", "c"]), 1)
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let saved = h.store.saved.lock().last().cloned().unwrap();
    let queue = &saved.provider_queues["qq"];
    assert_eq!(queue.current_index, 1);
    assert_eq!(queue.current_mid.as_deref(), Some("b"));
    assert_eq!(queue.playlist.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_switch_provider_loads_its_own_queue() {
    let mut settings = FrontendSettings::default();
    settings.provider_queues.insert(
        "netease".into(),
        StoredQueueState {
            playlist: tracks(&["x", "y"]),
            current_index: 1,
            current_mid: None,
        },
    );
    let store = RecordingStore::default();
    *store.initial.lock() = Some(settings);
    let h = Harness::with_store(store);
    h.controller.restore().await;
    h.controller.play_timeline(&tracks(&["a"]), 0).await;

    h.controller.switch_provider("netease").await.unwrap();
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.provider_id.as_deref(), Some("netease"));
    assert_eq!(snapshot.cursor, Some(1));
    assert!(!snapshot.is_playing);
    assert_eq!(h.backend.switched.lock().as_slice(), &["netease".to_string()]);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let saved = h.store.saved.lock().last().cloned().unwrap();
    assert_eq!(saved.last_provider_id.as_deref(), Some("netease"));
    assert_eq!(saved.provider_queues["qq"].playlist.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_stores_empty_snapshot() {
    let h = Harness::new();
    h.controller.restore().await;
    h.controller.play_timeline(&tracks(&["a", "b"]), 0).await;
    h.controller.clear_queue();

    let snapshot = h.controller.snapshot();
    assert!(snapshot.tracks.is_empty());
    assert_eq!(snapshot.cursor, None);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let saved = h.store.saved.lock().last().cloned().unwrap();
    assert_eq!(saved.provider_queues["qq"], StoredQueueState::empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_all_disables_saving_and_restores_defaults() {
    let h = Harness::new();
    h.controller.restore().await;
    h.controller.set_mode(PlayMode::Single);
    h.controller.set_volume(0.2, true);
    h.controller.reset_all().await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, PlayMode::Order);
    assert!((snapshot.volume - 1.0).abs() < f32::EPSILON);
    assert!(!snapshot.settings_restored);
    assert!(snapshot.tracks.is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.store.saved.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_listeners_observe_changes_until_unsubscribed() {
    let h = Harness::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let controller = Arc::downgrade(&h.controller);
    let subscription = h.controller.subscribe(Arc::new(move || {
        // listeners may read the snapshot from inside the notification
        if let Some(controller) = controller.upgrade() {
            let _ = controller.snapshot();
        }
        c.fetch_add(1, Ordering::SeqCst);
    }));

    h.controller.set_mode(PlayMode::Shuffle);
    h.controller.play_track(track("a")).await;
    let seen = count.load(Ordering::SeqCst);
    assert!(seen >= 3);

    subscription.unsubscribe();
    h.controller.cycle_mode();
    assert_eq!(count.load(Ordering::SeqCst), seen);
}
