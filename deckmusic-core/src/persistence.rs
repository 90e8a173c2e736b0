//! Debounced mirror of the settings document.
//!
//! Reads are served from memory. Writes go through per-scope slots (one for
//! global settings, one per provider queue), each cycling through
//! `Idle -> Scheduled -> Flushing -> Idle`. A change that lands while its slot
//! is flushing marks the slot pending and is written right after the in-flight
//! write resolves. Writes are serialized and always carry the latest document.

use crate::error::Result;
use crate::model::{PlayMode, PreferredQuality};
use crate::settings::{FrontendSettings, StoredQueueState};
use crate::store::SettingsStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Debounce slot a change is scheduled under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SaveScope {
    /// Play mode, volume, quality, last provider
    Global,
    /// One provider's saved queue
    Provider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Scheduled { generation: u64 },
    Flushing { pending: bool },
}

pub struct PersistenceGateway {
    store: Arc<dyn SettingsStore>,
    debounce: Duration,
    doc: Mutex<FrontendSettings>,
    /// Held for the whole first load so concurrent callers share it
    loaded: tokio::sync::Mutex<bool>,
    save_enabled: AtomicBool,
    slots: Mutex<HashMap<SaveScope, SlotState>>,
    next_generation: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            debounce,
            doc: Mutex::new(FrontendSettings::default()),
            loaded: tokio::sync::Mutex::new(false),
            save_enabled: AtomicBool::new(true),
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Load the document once; later calls return the in-memory copy.
    ///
    /// A failed load is logged and leaves the defaults in place.
    pub async fn load(&self) -> FrontendSettings {
        let mut loaded = self.loaded.lock().await;
        if !*loaded {
            match self.store.load_settings().await {
                Ok(Some(settings)) => {
                    info!("Loaded settings");
                    *self.doc.lock() = settings;
                }
                Ok(None) => debug!("No stored settings, using defaults"),
                Err(e) => warn!("Failed to load settings, using defaults: {}", e),
            }
            *loaded = true;
        }
        drop(loaded);
        self.settings()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.try_lock().is_ok_and(|loaded| *loaded)
    }

    /// Snapshot of the in-memory document
    #[must_use]
    pub fn settings(&self) -> FrontendSettings {
        self.doc.lock().clone()
    }

    /// Apply `change` to the in-memory document and, with `commit`, schedule a
    /// debounced write for `scope`.
    pub fn update(
        self: &Arc<Self>,
        scope: SaveScope,
        commit: bool,
        change: impl FnOnce(&mut FrontendSettings),
    ) {
        change(&mut self.doc.lock());
        if commit {
            self.schedule(scope);
        }
    }

    pub fn set_play_mode(self: &Arc<Self>, mode: PlayMode) {
        self.update(SaveScope::Global, true, |s| s.play_mode = Some(mode));
    }

    pub fn set_volume(self: &Arc<Self>, volume: f32, commit: bool) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.update(SaveScope::Global, commit, |s| s.volume = Some(volume));
    }

    pub fn set_preferred_quality(self: &Arc<Self>, quality: PreferredQuality) {
        self.update(SaveScope::Global, true, |s| {
            s.preferred_quality = Some(quality);
        });
    }

    pub fn set_last_provider_id(self: &Arc<Self>, provider_id: &str) {
        let provider_id = provider_id.to_string();
        self.update(SaveScope::Global, true, |s| {
            s.last_provider_id = Some(provider_id);
        });
    }

    /// Saved queue for a provider, normalized to its resume point.
    /// `None` when nothing was ever saved for it.
    #[must_use]
    pub fn load_queue_state(&self, provider_id: &str) -> Option<StoredQueueState> {
        self.doc
            .lock()
            .provider_queues
            .get(provider_id)
            .map(StoredQueueState::normalized)
    }

    /// Store a provider's queue. Returns `false` when the snapshot matches the
    /// stored one and nothing was scheduled.
    pub fn save_queue_state(self: &Arc<Self>, provider_id: &str, state: StoredQueueState) -> bool {
        if provider_id.is_empty() {
            return false;
        }
        let unchanged = self
            .doc
            .lock()
            .provider_queues
            .get(provider_id)
            .is_some_and(|stored| stored.fingerprint() == state.fingerprint());
        if unchanged {
            return false;
        }
        let key = provider_id.to_string();
        self.update(SaveScope::Provider(key.clone()), true, |s| {
            s.provider_queues.insert(key, state);
        });
        true
    }

    /// Store the explicit empty snapshot for a provider.
    pub fn clear_queue_state(self: &Arc<Self>, provider_id: &str) -> bool {
        self.save_queue_state(provider_id, StoredQueueState::empty())
    }

    /// Turn writes on or off. The in-memory document is kept either way.
    pub fn enable_save(&self, enabled: bool) {
        self.save_enabled.store(enabled, Ordering::SeqCst);
        debug!("Settings persistence {}", if enabled { "enabled" } else { "disabled" });
    }

    #[must_use]
    pub fn is_save_enabled(&self) -> bool {
        self.save_enabled.load(Ordering::SeqCst)
    }

    /// Number of scopes with a scheduled or running write
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.slots.lock().len()
    }

    /// Write any scheduled change now instead of waiting for its timer.
    ///
    /// If the write fails the drained scopes are scheduled again, so the
    /// change is retried on the regular debounce cycle.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the write fails.
    pub async fn flush(self: &Arc<Self>) -> Result<()> {
        let dirty: Vec<SaveScope> = {
            let mut slots = self.slots.lock();
            let dirty = slots
                .iter()
                .filter(|(_, s)| {
                    matches!(
                        s,
                        SlotState::Scheduled { .. } | SlotState::Flushing { pending: true }
                    )
                })
                .map(|(scope, _)| scope.clone())
                .collect();
            // Scheduled timers see their slot gone and stand down
            slots.retain(|_, s| matches!(s, SlotState::Flushing { .. }));
            for state in slots.values_mut() {
                *state = SlotState::Flushing { pending: false };
            }
            dirty
        };

        if dirty.is_empty() {
            // Let a write that is already running finish
            let _guard = self.write_lock.lock().await;
            return Ok(());
        }

        let result = self.write().await;
        if let Err(e) = &result {
            warn!("Failed to flush settings, retrying {} scopes: {}", dirty.len(), e);
            self.reschedule(dirty);
        }
        result
    }

    /// Forget everything in memory so the next `load` reads storage again.
    pub async fn reset(&self) {
        let mut loaded = self.loaded.lock().await;
        *loaded = false;
        *self.doc.lock() = FrontendSettings::default();
        self.slots.lock().clear();
    }

    fn schedule(self: &Arc<Self>, scope: SaveScope) {
        if !self.is_save_enabled() {
            return;
        }
        let mut slots = self.slots.lock();
        if let Some(SlotState::Flushing { pending }) = slots.get_mut(&scope) {
            *pending = true;
            return;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        slots.insert(scope.clone(), SlotState::Scheduled { generation });
        drop(slots);
        self.spawn_timer(scope, generation);
    }

    /// Put scopes whose write was lost back on the debounce cycle.
    fn reschedule(self: &Arc<Self>, scopes: Vec<SaveScope>) {
        let mut timers = Vec::new();
        {
            let mut slots = self.slots.lock();
            for scope in scopes {
                match slots.get_mut(&scope) {
                    Some(SlotState::Flushing { pending }) => *pending = true,
                    Some(SlotState::Scheduled { .. }) => {}
                    None => {
                        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                        slots.insert(scope.clone(), SlotState::Scheduled { generation });
                        timers.push((scope, generation));
                    }
                }
            }
        }
        for (scope, generation) in timers {
            self.spawn_timer(scope, generation);
        }
    }

    fn spawn_timer(self: &Arc<Self>, scope: SaveScope, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            this.run_flush(scope, generation).await;
        });
    }

    async fn run_flush(self: Arc<Self>, scope: SaveScope, generation: u64) {
        {
            let mut slots = self.slots.lock();
            match slots.get(&scope) {
                Some(SlotState::Scheduled { generation: g }) if *g == generation => {}
                _ => return,
            }
            slots.insert(scope.clone(), SlotState::Flushing { pending: false });
        }

        loop {
            let result = self.write().await;
            let mut slots = self.slots.lock();
            match result {
                Ok(()) => {
                    if let Some(SlotState::Flushing { pending }) = slots.get_mut(&scope) {
                        if *pending {
                            *pending = false;
                            continue;
                        }
                        slots.remove(&scope);
                    }
                    return;
                }
                Err(e) => {
                    warn!("Failed to save settings ({:?}), retrying: {}", scope, e);
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    slots.insert(scope.clone(), SlotState::Scheduled { generation });
                    drop(slots);
                    self.spawn_timer(scope, generation);
                    return;
                }
            }
        }
    }

    async fn write(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.is_save_enabled() {
            debug!("Settings write skipped while persistence is disabled");
            return Ok(());
        }
        let snapshot = self.doc.lock().clone();
        self.store.save_settings(&snapshot).await?;
        debug!("Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::Track;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<FrontendSettings>>,
        initial: Mutex<Option<FrontendSettings>>,
        loads: AtomicUsize,
        failures_left: AtomicUsize,
        fail_load: bool,
        save_delay: Duration,
    }

    #[async_trait]
    impl SettingsStore for RecordingStore {
        async fn load_settings(&self) -> Result<Option<FrontendSettings>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_load {
                return Err(CoreError::SettingsStore {
                    reason: "offline".into(),
                });
            }
            Ok(self.initial.lock().clone())
        }

        async fn save_settings(&self, settings: &FrontendSettings) -> Result<()> {
            if !self.save_delay.is_zero() {
                tokio::time::sleep(self.save_delay).await;
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(CoreError::SettingsStore {
                    reason: "disk full".into(),
                });
            }
            self.saved.lock().push(settings.clone());
            Ok(())
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(400);

    fn gateway(store: &Arc<RecordingStore>) -> Arc<PersistenceGateway> {
        PersistenceGateway::new(Arc::clone(store) as Arc<dyn SettingsStore>, DEBOUNCE)
    }

    fn queue(mids: &[&str], cursor: usize) -> StoredQueueState {
        let tracks: Vec<Track> = mids
            .iter()
            .map(|m| Track {
                mid: (*m).to_string(),
                ..Track::default()
            })
            .collect();
        StoredQueueState::capture(&tracks, Some(cursor))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_updates_writes_once_with_last_value() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        for i in 1..=5u8 {
            gateway.set_volume(f32::from(i) / 10.0, true);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(DEBOUNCE * 2).await;

        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert!((saved[0].volume.unwrap() - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_is_visible_before_flush() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);
        gateway.set_play_mode(PlayMode::Shuffle);
        assert_eq!(gateway.settings().play_mode, Some(PlayMode::Shuffle));
        assert!(store.saved.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncommitted_update_does_not_schedule() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);
        gateway.set_volume(0.3, false);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(store.saved.lock().is_empty());
        assert_eq!(gateway.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_share_one_read() {
        let store = Arc::new(RecordingStore::default());
        *store.initial.lock() = Some(FrontendSettings {
            volume: Some(0.7),
            ..FrontendSettings::default()
        });
        let gateway = gateway(&store);

        let (a, b) = tokio::join!(gateway.load(), gateway.load());
        assert_eq!(a, b);
        gateway.load().await;
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert!(gateway.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_falls_back_to_defaults() {
        let store = Arc::new(RecordingStore {
            fail_load: true,
            ..RecordingStore::default()
        });
        let gateway = gateway(&store);
        let settings = gateway.load().await;
        assert_eq!(settings, FrontendSettings::default());
        assert!(gateway.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_during_flush_is_written_after_it() {
        let store = Arc::new(RecordingStore {
            save_delay: Duration::from_millis(200),
            ..RecordingStore::default()
        });
        let gateway = gateway(&store);

        gateway.set_volume(0.1, true);
        // timer fires at 400ms, write runs until 600ms
        tokio::time::sleep(Duration::from_millis(450)).await;
        gateway.set_volume(0.9, true);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let saved = store.saved.lock();
        assert_eq!(saved.len(), 2);
        assert!((saved[0].volume.unwrap() - 0.1).abs() < f32::EPSILON);
        assert!((saved[1].volume.unwrap() - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_retried_next_cycle() {
        let store = Arc::new(RecordingStore::default());
        store.failures_left.store(1, Ordering::SeqCst);
        let gateway = gateway(&store);

        gateway.set_play_mode(PlayMode::Single);
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
        assert!(store.saved.lock().is_empty());

        tokio::time::sleep(DEBOUNCE).await;
        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].play_mode, Some(PlayMode::Single));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_slots_are_independent() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        gateway.save_queue_state("a", queue(&["x"], 0));
        tokio::time::sleep(Duration::from_millis(300)).await;
        // activity on "b" must not push back the write for "a"
        gateway.save_queue_state("b", queue(&["y"], 0));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.saved.lock().len(), 1);
        assert!(store.saved.lock()[0].provider_queues.contains_key("a"));

        tokio::time::sleep(DEBOUNCE).await;
        let saved = store.saved.lock();
        assert_eq!(saved.len(), 2);
        assert!(saved[1].provider_queues.contains_key("a"));
        assert!(saved[1].provider_queues.contains_key("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_queue_snapshot_is_skipped() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        assert!(gateway.save_queue_state("qq", queue(&["a", "b"], 1)));
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(!gateway.save_queue_state("qq", queue(&["a", "b"], 1)));
        assert!(gateway.save_queue_state("qq", queue(&["a", "b"], 0)));
        assert!(!gateway.save_queue_state("", queue(&["a"], 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_queue_stores_explicit_empty_snapshot() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        assert_eq!(gateway.load_queue_state("qq"), None);
        gateway.save_queue_state("qq", queue(&["a"], 0));
        gateway.clear_queue_state("qq");
        assert_eq!(
            gateway.load_queue_state("qq"),
            Some(StoredQueueState::empty())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_save_suppresses_writes_but_keeps_memory() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        gateway.enable_save(false);
        gateway.set_volume(0.2, true);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(store.saved.lock().is_empty());
        assert_eq!(gateway.settings().volume, Some(0.2));

        gateway.enable_save(true);
        gateway.set_play_mode(PlayMode::Order);
        tokio::time::sleep(DEBOUNCE * 2).await;
        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].volume, Some(0.2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately_and_cancels_timer() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);

        gateway.set_volume(0.4, true);
        gateway.flush().await.unwrap();
        assert_eq!(store.saved.lock().len(), 1);

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.saved.lock().len(), 1);

        // nothing scheduled: flush is a no-op
        gateway.flush().await.unwrap();
        assert_eq!(store.saved.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_change_scheduled() {
        let store = Arc::new(RecordingStore::default());
        store.failures_left.store(1, Ordering::SeqCst);
        let gateway = gateway(&store);

        gateway.set_volume(0.4, true);
        assert!(gateway.flush().await.is_err());
        assert!(store.saved.lock().is_empty());
        assert_eq!(gateway.pending_writes(), 1);

        tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
        let saved = store.saved.lock().clone();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].volume, Some(0.4));
        assert_eq!(gateway.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_allows_reload() {
        let store = Arc::new(RecordingStore::default());
        let gateway = gateway(&store);
        gateway.load().await;
        gateway.set_volume(0.5, false);
        gateway.reset().await;

        assert_eq!(gateway.settings(), FrontendSettings::default());
        assert!(!gateway.is_loaded());
        gateway.load().await;
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }
}
