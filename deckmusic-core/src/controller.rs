//! The single owner of the playback session.
//!
//! `PlaybackController` holds the timeline, shuffle state and session behind
//! one lock and is the only code that drives the [`AudioOutput`] for track
//! changes. Every play attempt takes a fresh token; an async step that resumes
//! after its token was superseded drops its result without touching state.
//!
//! The state lock is never held while calling into the audio output or the
//! listeners, since either may call straight back into the controller.

use crate::audio::{AudioEvent, AudioOutput};
use crate::backend::MusicBackend;
use crate::broadcast::{Listener, PlayerEvent, StateBroadcaster, Subscription};
use crate::cache::{AssetCache, StreamUrlLookup};
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};
use crate::lyric::ParsedLyric;
use crate::model::{PlayMode, PlayerSnapshot, PreferredQuality, Track};
use crate::persistence::PersistenceGateway;
use crate::settings::FrontendSettings;
use crate::shuffle::ShuffleEngine;
use crate::timeline::Timeline;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Supplies more tracks when order-mode playback runs off the end of the timeline
pub type NeedMoreTracks = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<Track>>> + Send + Sync>;

#[derive(Debug, Default)]
struct Session {
    current_track: Option<Track>,
    is_playing: bool,
    loading: bool,
    error: Option<PlaybackError>,
    lyric: Option<Arc<ParsedLyric>>,
    /// Song the displayed lyric belongs to
    lyric_mid: Option<String>,
}

struct ControllerState {
    timeline: Timeline,
    shuffle: ShuffleEngine,
    session: Session,
    mode: PlayMode,
    volume: f32,
    quality: PreferredQuality,
    provider_id: Option<String>,
    settings_restored: bool,
    attempt: u64,
    /// Whether a failure of the current attempt may skip ahead
    attempt_auto_skip: bool,
    auto_skip: Option<CancellationToken>,
    need_more: Option<NeedMoreTracks>,
}

impl ControllerState {
    fn cancel_auto_skip(&mut self) {
        if let Some(token) = self.auto_skip.take() {
            debug!("Cancelling pending auto-skip");
            token.cancel();
        }
    }

    /// Start a new play attempt, invalidating whatever was in flight.
    fn begin_attempt(&mut self) -> u64 {
        self.cancel_auto_skip();
        self.attempt += 1;
        self.attempt
    }

    fn move_to(&mut self, index: usize) -> Option<Track> {
        if self.timeline.set_cursor(index) {
            self.timeline.current().cloned()
        } else {
            None
        }
    }

    fn resync_shuffle(&mut self) {
        if self.mode == PlayMode::Shuffle {
            self.shuffle
                .resync(self.timeline.cursor(), self.timeline.len());
        }
    }

    fn queue_event(&self) -> PlayerEvent {
        PlayerEvent::QueueChanged {
            len: self.timeline.len(),
            cursor: self.timeline.cursor(),
        }
    }
}

/// How a load attempt ended
enum LoadOutcome {
    Started { fallback_provider: Option<String> },
    Failed(PlaybackError),
    Superseded,
}

pub struct PlaybackController {
    output: Arc<AudioOutput>,
    cache: Arc<AssetCache>,
    backend: Arc<dyn MusicBackend>,
    persistence: Arc<PersistenceGateway>,
    broadcaster: StateBroadcaster,
    auto_skip_delay: Duration,
    load_timeout: Duration,
    default_quality: PreferredQuality,
    prefetch_next: bool,
    state: Mutex<ControllerState>,
    restore_lock: tokio::sync::Mutex<()>,
}

impl PlaybackController {
    /// Build the controller and install it as the output's event handler.
    #[must_use]
    pub fn new(
        output: Arc<AudioOutput>,
        cache: Arc<AssetCache>,
        backend: Arc<dyn MusicBackend>,
        persistence: Arc<PersistenceGateway>,
        config: &PlaybackConfig,
    ) -> Arc<Self> {
        let volume = output.volume();
        let controller = Arc::new(Self {
            output,
            cache,
            backend,
            persistence,
            broadcaster: StateBroadcaster::new(),
            auto_skip_delay: config.auto_skip_delay(),
            load_timeout: config.load_timeout(),
            default_quality: config.default_quality,
            prefetch_next: config.prefetch_next,
            state: Mutex::new(ControllerState {
                timeline: Timeline::new(),
                shuffle: ShuffleEngine::new(),
                session: Session::default(),
                mode: PlayMode::default(),
                volume,
                quality: config.default_quality,
                provider_id: None,
                settings_restored: false,
                attempt: 0,
                attempt_auto_skip: false,
                auto_skip: None,
                need_more: None,
            }),
            restore_lock: tokio::sync::Mutex::new(()),
        });

        let weak = Arc::downgrade(&controller);
        controller.output.set_event_handler(Arc::new(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.on_audio_event(event);
            }
        }));
        controller
    }

    /// Register a listener called after every state change.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        self.broadcaster.subscribe(listener)
    }

    /// Typed event stream (toasts, track changes, errors)
    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.broadcaster.events()
    }

    #[must_use]
    pub fn snapshot(&self) -> PlayerSnapshot {
        let has_source = self.output.has_source();
        let (current_time, duration) = if has_source {
            (self.output.current_time(), self.output.duration())
        } else {
            (Duration::ZERO, None)
        };

        let st = self.state.lock();
        PlayerSnapshot {
            current_track: st.session.current_track.clone(),
            is_playing: st.session.is_playing,
            current_time,
            duration,
            loading: st.session.loading,
            error: st.session.error.clone(),
            lyric: st.session.lyric.clone(),
            tracks: st.timeline.tracks().to_vec(),
            cursor: st.timeline.cursor(),
            mode: st.mode,
            volume: st.volume,
            settings_restored: st.settings_restored,
            provider_id: st.provider_id.clone(),
        }
    }

    /// Shuffle history as visited timeline indices
    #[must_use]
    pub fn shuffle_history(&self) -> Vec<usize> {
        self.state.lock().shuffle.history().to_vec()
    }

    /// Indices still eligible for a shuffle pick
    #[must_use]
    pub fn shuffle_pool(&self) -> Vec<usize> {
        self.state.lock().shuffle.pool().to_vec()
    }

    #[must_use]
    pub fn has_pending_auto_skip(&self) -> bool {
        self.state.lock().auto_skip.is_some()
    }

    /// Play `track` right after the current one, keeping history intact.
    pub async fn play_track(self: &Arc<Self>, track: Track) -> bool {
        let index = {
            let mut st = self.state.lock();
            let index = st.timeline.insert_at_cursor(track.clone());
            st.resync_shuffle();
            index
        };
        self.play_internal(track, index, false).await
    }

    /// Splice `tracks` in after the current track and play `tracks[start]`.
    pub async fn play_timeline(self: &Arc<Self>, tracks: &[Track], start: usize) -> bool {
        let target = {
            let mut st = self.state.lock();
            let Some(index) = st.timeline.merge_at_cursor(tracks, start) else {
                return false;
            };
            st.resync_shuffle();
            st.timeline.current().cloned().map(|track| (track, index))
        };
        match target {
            Some((track, index)) => self.play_internal(track, index, false).await,
            None => false,
        }
    }

    /// Append tracks not already queued. Starts the first of them when idle.
    pub async fn enqueue(self: &Arc<Self>, tracks: &[Track]) -> usize {
        let (added, start) = {
            let mut st = self.state.lock();
            let idle = st.session.current_track.is_none();
            let added = st.timeline.append_unique(tracks);
            if added.is_empty() {
                return 0;
            }
            if st.mode == PlayMode::Shuffle {
                let current = st.timeline.cursor();
                st.shuffle.on_add(&added, current);
            }
            let start = if idle {
                let first = added[0];
                let track = st.move_to(first);
                st.resync_shuffle();
                track.map(|track| (track, first))
            } else {
                None
            };
            (added.len(), start)
        };
        debug!("Enqueued {} tracks", added);

        if let Some((track, index)) = start {
            self.play_internal(track, index, false).await;
        } else {
            self.persist_queue();
            let event = self.state.lock().queue_event();
            self.publish(event);
        }
        added
    }

    /// Remove a future entry. History and the current track cannot be removed.
    pub fn remove_queued(&self, index: usize) -> bool {
        let event = {
            let mut st = self.state.lock();
            if st.timeline.remove_future(index).is_none() {
                return false;
            }
            if st.mode == PlayMode::Shuffle {
                st.shuffle.on_remove(index);
                st.resync_shuffle();
            }
            st.queue_event()
        };
        self.persist_queue();
        self.publish(event);
        true
    }

    /// Jump to `index` and play it.
    pub async fn play_at(self: &Arc<Self>, index: usize) -> bool {
        let track = {
            let mut st = self.state.lock();
            let len = st.timeline.len();
            if index >= len {
                return false;
            }
            if st.mode == PlayMode::Shuffle {
                st.shuffle.jump_to(index, len);
            }
            st.move_to(index)
        };
        match track {
            Some(track) => self.play_internal(track, index, true).await,
            None => false,
        }
    }

    /// Stop playback, empty the timeline and store the empty queue.
    pub fn clear_queue(&self) {
        self.stop();
        let (provider, event) = {
            let mut st = self.state.lock();
            st.timeline.clear();
            st.shuffle.clear();
            (st.provider_id.clone(), st.queue_event())
        };
        if let Some(provider) = provider {
            self.persistence.clear_queue_state(&provider);
        }
        info!("Queue cleared");
        self.publish(event);
    }

    /// Flip between playing and paused.
    ///
    /// With no source loaded the current track is loaded again; a failure on
    /// that path never schedules an auto-skip.
    pub async fn toggle_play(self: &Arc<Self>) {
        if !self.output.has_source() {
            let resume = {
                let mut st = self.state.lock();
                if st.session.loading {
                    return;
                }
                let track = st
                    .session
                    .current_track
                    .clone()
                    .or_else(|| st.timeline.current().cloned());
                track.map(|track| {
                    let index = st
                        .timeline
                        .position_of(&track.mid)
                        .or(st.timeline.cursor())
                        .unwrap_or(0);
                    st.move_to(index);
                    (track, index)
                })
            };
            if let Some((track, index)) = resume {
                self.play_internal(track, index, false).await;
            }
            return;
        }

        let playing = self.state.lock().session.is_playing;
        if playing {
            self.output.pause().await;
            self.state.lock().session.is_playing = false;
            self.publish(PlayerEvent::PlaybackPaused {
                position: self.output.current_time(),
            });
        } else {
            match self.output.play().await {
                Ok(()) => {
                    {
                        let mut st = self.state.lock();
                        st.session.is_playing = true;
                        st.session.error = None;
                    }
                    self.publish(PlayerEvent::PlaybackResumed {
                        position: self.output.current_time(),
                    });
                }
                Err(reason) => {
                    warn!("Resume refused: {}", reason);
                    self.broadcaster.toast("Playback failed", reason);
                }
            }
        }
    }

    /// Seek within the current track. `None` while its duration is unknown.
    pub fn seek(&self, position: Duration) -> Option<Duration> {
        let applied = self.output.seek(position)?;
        self.broadcaster.notify();
        Some(applied)
    }

    /// Reset the session and drop the need-more callback. The timeline is kept.
    pub fn stop(&self) {
        {
            let mut st = self.state.lock();
            st.begin_attempt();
            st.session = Session::default();
            st.need_more = None;
        }
        self.output.clear_source();
        debug!("Playback stopped");
        self.publish(PlayerEvent::PlaybackStopped);
    }

    /// Advance according to the play mode.
    pub async fn next(self: &Arc<Self>) {
        let Some((track, index)) = self.resolve_next().await else {
            debug!("No next track");
            return;
        };
        self.play_internal(track, index, true).await;
    }

    /// Go back according to the play mode.
    pub async fn prev(self: &Arc<Self>) {
        let target = {
            let mut st = self.state.lock();
            let current = st.timeline.cursor();
            let index = match st.mode {
                PlayMode::Single => current,
                PlayMode::Shuffle => st.shuffle.prev(current),
                PlayMode::Order => st.timeline.prev_index(),
            };
            index.and_then(|i| st.move_to(i).map(|track| (track, i)))
        };
        let Some((track, index)) = target else {
            debug!("No previous track");
            return;
        };
        self.play_internal(track, index, true).await;
    }

    async fn resolve_next(&self) -> Option<(Track, usize)> {
        let need_more = {
            let mut st = self.state.lock();
            if st.timeline.is_empty() {
                return None;
            }
            let current = st.timeline.cursor();
            let len = st.timeline.len();
            let index = match st.mode {
                PlayMode::Single => current,
                PlayMode::Shuffle => st.shuffle.next(current, len),
                PlayMode::Order => st.timeline.next_index(),
            };
            if let Some(index) = index {
                return st.move_to(index).map(|track| (track, index));
            }
            if st.mode != PlayMode::Order {
                return None;
            }
            st.need_more.clone()?
        };

        info!("Reached the end of the queue, asking for more tracks");
        let more = match need_more().await {
            Ok(more) => more,
            Err(e) => {
                warn!("Failed to fetch more tracks: {}", e);
                return None;
            }
        };

        let (target, event) = {
            let mut st = self.state.lock();
            let added = st.timeline.append_unique(&more);
            if added.is_empty() {
                debug!("No new tracks were supplied");
                return None;
            }
            // Resolved once more; an empty refill does not loop
            let target = st
                .timeline
                .next_index()
                .and_then(|i| st.move_to(i).map(|track| (track, i)));
            (target, st.queue_event())
        };
        self.broadcaster.emit(event);
        target
    }

    pub fn set_mode(&self, mode: PlayMode) {
        {
            let mut st = self.state.lock();
            st.mode = mode;
            st.resync_shuffle();
        }
        self.persistence.set_play_mode(mode);
        info!("Play mode set to {}", mode.as_str());
        self.publish(PlayerEvent::ModeChanged { mode });
    }

    /// Move to the next mode in `order -> single -> shuffle` and return it.
    pub fn cycle_mode(&self) -> PlayMode {
        let mode = self.state.lock().mode.cycle();
        self.set_mode(mode);
        mode
    }

    /// Set the volume. Only a committed change is persisted and broadcast.
    pub fn set_volume(&self, volume: f32, commit: bool) {
        self.output.set_volume(volume);
        let applied = self.output.volume();
        self.state.lock().volume = applied;
        self.persistence.set_volume(applied, commit);
        if commit {
            self.broadcaster.notify();
        }
    }

    pub fn set_preferred_quality(&self, quality: PreferredQuality) {
        self.state.lock().quality = quality;
        self.persistence.set_preferred_quality(quality);
        self.broadcaster.notify();
    }

    #[must_use]
    pub fn preferred_quality(&self) -> PreferredQuality {
        self.state.lock().quality
    }

    /// Install (or clear) the callback that refills an exhausted queue.
    pub fn register_need_more_tracks(&self, callback: Option<NeedMoreTracks>) {
        self.state.lock().need_more = callback;
    }

    /// Turn settings writes on or off.
    pub fn enable_settings_persistence(&self, enabled: bool) {
        self.persistence.enable_save(enabled);
    }

    /// Restore provider, queue, mode, volume and quality from storage, once.
    ///
    /// The active provider is the backend's current one, else the one it
    /// remembers, else the one stored in settings.
    pub async fn restore(self: &Arc<Self>) {
        let _guard = self.restore_lock.lock().await;
        if self.state.lock().settings_restored {
            return;
        }

        let settings = self.persistence.load().await;
        let provider_id = self.resolve_provider(&settings).await;

        let volume = settings.volume_or_default();
        self.output.set_volume(volume);

        let lyric_target = {
            let mut st = self.state.lock();
            st.provider_id.clone_from(&provider_id);
            if st.timeline.is_empty() {
                if let Some(stored) = provider_id
                    .as_deref()
                    .and_then(|p| self.persistence.load_queue_state(p))
                {
                    st.timeline = Timeline::from_stored(&stored);
                    st.session.current_track = st.timeline.current().cloned();
                }
            }
            st.mode = settings.play_mode_or_default();
            st.volume = self.output.volume();
            st.quality = settings.preferred_quality_or(self.default_quality);
            if st.mode == PlayMode::Shuffle {
                let (cursor, len) = (st.timeline.cursor(), st.timeline.len());
                st.shuffle.reset_to(cursor, len);
            }
            st.settings_restored = true;
            info!(
                "Restored {} tracks for provider {:?} ({} mode)",
                st.timeline.len(),
                st.provider_id,
                st.mode.as_str()
            );
            st.session
                .current_track
                .clone()
                .filter(|_| st.session.lyric.is_none())
        };

        let event = self.state.lock().queue_event();
        self.publish(event);
        if let Some(track) = lyric_target {
            self.spawn_lyric_fetch(track);
        }
    }

    /// Make `provider_id` active and load its saved queue.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the provider could not be switched; the
    /// session is left untouched in that case.
    pub async fn switch_provider(&self, provider_id: &str) -> Result<()> {
        self.backend.switch_provider(provider_id).await?;
        self.stop();

        let event = {
            let mut st = self.state.lock();
            st.timeline = self
                .persistence
                .load_queue_state(provider_id)
                .map_or_else(Timeline::new, |stored| Timeline::from_stored(&stored));
            let (cursor, len) = (st.timeline.cursor(), st.timeline.len());
            st.shuffle.reset_to(cursor, len);
            st.session.current_track = st.timeline.current().cloned();
            st.provider_id = Some(provider_id.to_string());
            st.queue_event()
        };
        self.persistence.set_last_provider_id(provider_id);
        info!("Switched to provider {}", provider_id);
        self.publish(event);
        Ok(())
    }

    /// Return to a blank slate: no queue, default mode and volume, settings
    /// forgotten and writes disabled until re-enabled.
    pub async fn reset_all(&self) {
        self.persistence.enable_save(false);
        self.stop();
        self.output.set_volume(1.0);
        {
            let mut st = self.state.lock();
            st.timeline.clear();
            st.shuffle.clear();
            st.mode = PlayMode::Order;
            st.volume = 1.0;
            st.quality = self.default_quality;
            st.settings_restored = false;
        }
        self.persistence.reset().await;
        info!("Player state reset");
        self.broadcaster.notify();
    }

    async fn resolve_provider(&self, settings: &FrontendSettings) -> Option<String> {
        match self.backend.current_provider().await {
            Ok(Some(provider)) => return Some(provider.id),
            Ok(None) => debug!("Backend reports no current provider"),
            Err(e) => warn!("Failed to get current provider: {}", e),
        }
        match self.backend.last_provider_id().await {
            Ok(Some(id)) if !id.is_empty() => return Some(id),
            Ok(_) => {}
            Err(e) => warn!("Failed to get last provider: {}", e),
        }
        settings.last_provider_id.clone().filter(|id| !id.is_empty())
    }

    /// The only path that changes the output's track.
    async fn play_internal(self: &Arc<Self>, track: Track, index: usize, auto_skip: bool) -> bool {
        let (token, quality) = {
            let mut st = self.state.lock();
            let token = st.begin_attempt();
            st.attempt_auto_skip = auto_skip;
            let session = &mut st.session;
            let same_lyric = session.lyric_mid.as_deref() == Some(track.mid.as_str());
            if !same_lyric {
                session.lyric = self.cache.cached_lyric(&track.mid);
                session.lyric_mid = session.lyric.as_ref().map(|_| track.mid.clone());
            }
            session.current_track = Some(track.clone());
            session.loading = true;
            session.is_playing = false;
            session.error = None;
            (token, st.quality)
        };
        self.output.clear_source();
        self.persist_queue();
        info!("Loading {} ({})", track, track.mid);
        self.publish(PlayerEvent::TrackChanged {
            track: track.clone(),
            index,
        });

        let outcome = match tokio::time::timeout(
            self.load_timeout,
            self.load_and_start(&track, quality, token),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) if self.is_current(token) => {
                self.output.clear_source();
                LoadOutcome::Failed(PlaybackError::LoadTimeout {
                    after: self.load_timeout,
                })
            }
            Err(_) => LoadOutcome::Superseded,
        };

        match outcome {
            LoadOutcome::Started { fallback_provider } => {
                self.on_started(&track, token, quality, fallback_provider);
                true
            }
            LoadOutcome::Failed(error) => {
                self.fail_attempt(token, &track, error, auto_skip);
                false
            }
            LoadOutcome::Superseded => {
                debug!("Discarding stale play attempt for {}", track.mid);
                false
            }
        }
    }

    async fn load_and_start(&self, track: &Track, quality: PreferredQuality, token: u64) -> LoadOutcome {
        let lookup = self.cache.stream_url(track, quality).await;
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }
        let (url, fallback_provider) = match lookup {
            Ok(StreamUrlLookup::Resolved {
                url,
                fallback_provider,
            }) => (url, fallback_provider),
            Ok(StreamUrlLookup::Unavailable { reason, .. }) => {
                return LoadOutcome::Failed(PlaybackError::no_source(reason));
            }
            Err(e) => {
                return LoadOutcome::Failed(PlaybackError::Unexpected {
                    reason: e.to_string(),
                });
            }
        };

        self.output.set_source(&url);
        let started = self.output.play().await;
        if !self.is_current(token) {
            return LoadOutcome::Superseded;
        }
        match started {
            Ok(()) => LoadOutcome::Started { fallback_provider },
            Err(reason) => {
                self.cache.invalidate_stream_url(&track.mid);
                self.output.clear_source();
                LoadOutcome::Failed(PlaybackError::Rejected { reason })
            }
        }
    }

    fn on_started(
        self: &Arc<Self>,
        track: &Track,
        token: u64,
        quality: PreferredQuality,
        fallback_provider: Option<String>,
    ) {
        let (fetch_lyric, upcoming) = {
            let mut st = self.state.lock();
            if st.attempt != token {
                return;
            }
            st.session.is_playing = true;
            st.session.loading = false;
            let upcoming = st
                .timeline
                .next_index()
                .and_then(|i| st.timeline.get(i).cloned());
            (st.session.lyric.is_none(), upcoming)
        };

        info!("Playing {}", track);
        if let Some(provider) = fallback_provider {
            self.broadcaster
                .toast("Fallback source", format!("Served by {provider}"));
        }
        self.publish(PlayerEvent::PlaybackStarted {
            track: track.clone(),
        });

        if fetch_lyric {
            self.spawn_lyric_fetch(track.clone());
        }
        if self.prefetch_next {
            if let Some(upcoming) = upcoming {
                self.cache.prefetch(&upcoming, quality);
            }
        }
    }

    fn fail_attempt(self: &Arc<Self>, token: u64, track: &Track, error: PlaybackError, auto_skip: bool) {
        let skip = {
            let mut st = self.state.lock();
            if st.attempt != token {
                return;
            }
            st.session.loading = false;
            st.session.is_playing = false;
            st.session.error = Some(error.clone());
            if auto_skip && error.auto_skip_eligible() && st.timeline.len() > 1 {
                let cancel = CancellationToken::new();
                st.auto_skip = Some(cancel.clone());
                Some(cancel)
            } else {
                None
            }
        };

        warn!("Could not play {} ({}): {}", track, track.mid, error);
        self.broadcaster.toast(track.name.clone(), error.to_string());
        self.broadcaster.emit(PlayerEvent::Error { error });
        self.broadcaster.notify();

        if let Some(cancel) = skip {
            self.arm_auto_skip(cancel);
        }
    }

    fn arm_auto_skip(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let delay = self.auto_skip_delay;
        debug!("Auto-skip in {:?}", delay);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    {
                        let mut st = this.state.lock();
                        if cancel.is_cancelled() {
                            return;
                        }
                        st.auto_skip = None;
                    }
                    info!("Skipping unplayable track");
                    this.next().await;
                }
            }
        });
    }

    fn spawn_next(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.next().await;
        });
    }

    fn spawn_lyric_fetch(self: &Arc<Self>, track: Track) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.cache.lyric(&track).await {
                Ok(Some(lookup)) => {
                    {
                        let mut st = this.state.lock();
                        if !is_showing(&st.session, &track) {
                            return;
                        }
                        st.session.lyric = Some(Arc::clone(&lookup.lyric));
                        st.session.lyric_mid = Some(track.mid.clone());
                    }
                    if let Some(provider) = lookup.fallback_provider {
                        this.broadcaster
                            .toast("Fallback lyric", format!("Lyric from {provider}"));
                    }
                    this.publish(PlayerEvent::LyricLoaded {
                        mid: track.mid,
                        lyric: lookup.lyric,
                    });
                }
                Ok(None) => {
                    if is_showing(&this.state.lock().session, &track) {
                        debug!("No lyric for {}", track.mid);
                        this.broadcaster
                            .emit(PlayerEvent::LyricNotFound { mid: track.mid });
                    }
                }
                Err(e) => warn!("Failed to fetch lyric for {}: {}", track.mid, e),
            }
        });
    }

    fn on_audio_event(self: &Arc<Self>, event: AudioEvent) {
        match event {
            AudioEvent::Ended => {
                let advance = {
                    let mut st = self.state.lock();
                    st.session.is_playing = false;
                    st.mode != PlayMode::Order || st.timeline.len() > 1
                };
                if advance {
                    self.spawn_next();
                } else {
                    self.broadcaster.notify();
                }
            }
            AudioEvent::DurationChanged(_) => self.broadcaster.notify(),
            AudioEvent::Failed(reason) => {
                let (token, auto_skip, track) = {
                    let st = self.state.lock();
                    (st.attempt, st.attempt_auto_skip, st.session.current_track.clone())
                };
                if let Some(track) = track {
                    self.cache.invalidate_stream_url(&track.mid);
                    self.fail_attempt(token, &track, PlaybackError::Rejected { reason }, auto_skip);
                }
            }
        }
    }

    fn is_current(&self, token: u64) -> bool {
        self.state.lock().attempt == token
    }

    fn persist_queue(&self) {
        let snapshot = {
            let st = self.state.lock();
            st.provider_id
                .clone()
                .map(|provider| (provider, st.timeline.to_stored()))
        };
        if let Some((provider, stored)) = snapshot {
            self.persistence.save_queue_state(&provider, stored);
        }
    }

    fn publish(&self, event: PlayerEvent) {
        self.broadcaster.emit(event);
        self.broadcaster.notify();
    }
}

fn is_showing(session: &Session, track: &Track) -> bool {
    session
        .current_track
        .as_ref()
        .is_some_and(|t| t.same_song(track))
}
