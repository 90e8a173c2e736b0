use crate::error::PlaybackError;
use crate::lyric::ParsedLyric;
use crate::model::{PlayMode, Track};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

/// Events emitted alongside state notifications, for hosts that react to
/// specific transitions (toasts, logging) rather than re-render from snapshots
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The session moved to a different track
    TrackChanged { track: Track, index: usize },
    /// Playback of the current track actually started
    PlaybackStarted { track: Track },
    PlaybackPaused { position: Duration },
    PlaybackResumed { position: Duration },
    /// Session reset, nothing loaded
    PlaybackStopped,
    LyricLoaded {
        mid: String,
        lyric: Arc<ParsedLyric>,
    },
    LyricNotFound { mid: String },
    ModeChanged { mode: PlayMode },
    QueueChanged { len: usize, cursor: Option<usize> },
    /// User-facing notification
    Toast { title: String, body: String },
    /// A play attempt failed
    Error { error: PlaybackError },
}

pub type Listener = Arc<dyn Fn() + Send + Sync>;

type ListenerMap = Mutex<BTreeMap<u64, Listener>>;

/// Fan-out from the controller to every mounted observer.
pub struct StateBroadcaster {
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<PlayerEvent>,
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    listeners: Weak<ListenerMap>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Register a zero-argument listener called after every state change.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, listener);
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Call every listener. A panicking listener is logged and skipped.
    pub fn notify(&self) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!("State listener panicked; continuing with the remaining listeners");
            }
        }
    }

    /// Subscribe to typed player events
    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn toast(&self, title: impl Into<String>, body: impl Into<String>) {
        self.emit(PlayerEvent::Toast {
            title: title.into(),
            body: body.into(),
        });
    }
}
