//! The single process-wide audio output.
//!
//! [`AudioOutput`] wraps whatever platform sink actually produces sound. The sink
//! is created lazily on first use, volume writes are skipped when nothing
//! changes, and the sink's inbound events are funnelled to one handler.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::debug;

/// Platform audio element.
///
/// `play` resolves once playback has actually started, or fails with a reason
/// when the platform refuses (autoplay policy, undecodable stream).
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Load a stream without starting it
    fn set_source(&self, url: &str);

    /// Drop the current stream
    fn clear_source(&self);

    /// Start or resume playback.
    ///
    /// # Errors
    ///
    /// Returns the platform's reason when playback cannot start.
    async fn play(&self) -> std::result::Result<(), String>;

    async fn pause(&self);

    fn seek(&self, position: Duration);

    fn set_volume(&self, volume: f32);

    fn current_time(&self) -> Duration;

    /// Known duration of the loaded stream, `None` while unknown
    fn duration(&self) -> Option<Duration>;
}

/// Events a sink reports back about the loaded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// The stream played to its end
    Ended,
    /// The stream exposed (or changed) its duration
    DurationChanged(Duration),
    /// The stream failed after it had started
    Failed(String),
}

pub type AudioEventHandler = Arc<dyn Fn(AudioEvent) + Send + Sync>;

/// Builds the platform sink; receives the handle the sink reports events through.
pub type SinkFactory = Box<dyn Fn(AudioEvents) -> Arc<dyn AudioSink> + Send + Sync>;

/// Handle given to a sink for reporting [`AudioEvent`]s.
#[derive(Clone)]
pub struct AudioEvents {
    output: Weak<AudioOutput>,
}

impl AudioEvents {
    pub fn emit(&self, event: AudioEvent) {
        if let Some(output) = self.output.upgrade() {
            output.dispatch(event);
        }
    }
}

#[derive(Debug)]
struct OutputState {
    volume: f32,
    source: Option<String>,
    /// Bumped on every source change so `Ended` is reported once per stream
    generation: u64,
    ended_for: Option<u64>,
    duration: Option<Duration>,
}

pub struct AudioOutput {
    factory: SinkFactory,
    sink: OnceLock<Arc<dyn AudioSink>>,
    state: Mutex<OutputState>,
    handler: Mutex<Option<AudioEventHandler>>,
    me: Weak<AudioOutput>,
}

impl AudioOutput {
    #[must_use]
    pub fn new(factory: SinkFactory, initial_volume: f32) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            factory,
            sink: OnceLock::new(),
            state: Mutex::new(OutputState {
                volume: clamp_volume(initial_volume),
                source: None,
                generation: 0,
                ended_for: None,
                duration: None,
            }),
            handler: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn sink(&self) -> &Arc<dyn AudioSink> {
        self.sink.get_or_init(|| {
            debug!("Creating audio sink");
            let sink = (self.factory)(AudioEvents {
                output: self.me.clone(),
            });
            sink.set_volume(self.state.lock().volume);
            sink
        })
    }

    /// Install the event handler, replacing any previous one.
    pub fn set_event_handler(&self, handler: AudioEventHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Load a stream without starting it.
    pub fn set_source(&self, url: &str) {
        {
            let mut state = self.state.lock();
            state.source = Some(url.to_string());
            state.generation += 1;
            state.ended_for = None;
            state.duration = None;
        }
        self.sink().set_source(url);
    }

    pub fn clear_source(&self) {
        let had_source = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.duration = None;
            state.source.take().is_some()
        };
        if had_source {
            self.sink().clear_source();
        }
    }

    #[must_use]
    pub fn has_source(&self) -> bool {
        self.state.lock().source.is_some()
    }

    #[must_use]
    pub fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    /// Start playback of the loaded stream.
    ///
    /// # Errors
    ///
    /// Returns the sink's reason when playback is refused.
    pub async fn play(&self) -> std::result::Result<(), String> {
        let sink = Arc::clone(self.sink());
        sink.play().await
    }

    pub async fn pause(&self) {
        let sink = Arc::clone(self.sink());
        sink.pause().await;
    }

    /// Seek within the loaded stream, clamped to its duration.
    ///
    /// Returns the applied position, or `None` when the duration is still unknown.
    pub fn seek(&self, position: Duration) -> Option<Duration> {
        let duration = self.duration().filter(|d| !d.is_zero())?;
        let clamped = position.min(duration);
        self.sink().seek(clamped);
        Some(clamped)
    }

    /// Set the output volume, clamped to `[0, 1]`.
    ///
    /// Returns `false` without touching the sink when the value is unchanged.
    pub fn set_volume(&self, volume: f32) -> bool {
        let volume = clamp_volume(volume);
        {
            let mut state = self.state.lock();
            if (state.volume - volume).abs() < f32::EPSILON {
                return false;
            }
            state.volume = volume;
        }
        if let Some(sink) = self.sink.get() {
            sink.set_volume(volume);
        }
        true
    }

    #[must_use]
    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.sink
            .get()
            .map_or(Duration::ZERO, |sink| sink.current_time())
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        let reported = self.state.lock().duration;
        reported.or_else(|| self.sink.get().and_then(|sink| sink.duration()))
    }

    /// Route an inbound sink event to the registered handler.
    pub fn dispatch(&self, event: AudioEvent) {
        {
            let mut state = self.state.lock();
            match &event {
                AudioEvent::Ended => {
                    if state.source.is_none() || state.ended_for == Some(state.generation) {
                        return;
                    }
                    state.ended_for = Some(state.generation);
                }
                AudioEvent::DurationChanged(d) => state.duration = Some(*d),
                AudioEvent::Failed(_) => {
                    if state.source.is_none() {
                        return;
                    }
                }
            }
        }

        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        1.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        volume_calls: AtomicUsize,
        seeks: parking_lot::Mutex<Vec<Duration>>,
        duration: parking_lot::Mutex<Option<Duration>>,
    }

    #[async_trait]
    impl AudioSink for CountingSink {
        fn set_source(&self, _url: &str) {}
        fn clear_source(&self) {}
        async fn play(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn pause(&self) {}
        fn seek(&self, position: Duration) {
            self.seeks.lock().push(position);
        }
        fn set_volume(&self, _volume: f32) {
            self.volume_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn current_time(&self) -> Duration {
            Duration::ZERO
        }
        fn duration(&self) -> Option<Duration> {
            *self.duration.lock()
        }
    }

    fn output_with(sink: Arc<CountingSink>) -> (Arc<AudioOutput>, Arc<Mutex<Option<AudioEvents>>>) {
        let events = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&events);
        let output = AudioOutput::new(
            Box::new(move |ev| {
                *captured.lock() = Some(ev);
                Arc::clone(&sink) as Arc<dyn AudioSink>
            }),
            1.0,
        );
        (output, events)
    }

    #[test]
    fn test_sink_created_lazily_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let output = AudioOutput::new(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(CountingSink::default()) as Arc<dyn AudioSink>
            }),
            1.0,
        );
        assert_eq!(created.load(Ordering::SeqCst), 0);
        output.set_source("a");
        output.set_source("b");
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_volume_is_idempotent_and_clamped() {
        let sink = Arc::new(CountingSink::default());
        let (output, _) = output_with(Arc::clone(&sink));
        output.set_source("a");
        let baseline = sink.volume_calls.load(Ordering::SeqCst);

        assert!(output.set_volume(0.5));
        assert!(!output.set_volume(0.5));
        assert_eq!(sink.volume_calls.load(Ordering::SeqCst), baseline + 1);

        output.set_volume(7.0);
        assert!((output.volume() - 1.0).abs() < f32::EPSILON);
        output.set_volume(-1.0);
        assert!(output.volume().abs() < f32::EPSILON);
    }

    #[test]
    fn test_seek_requires_known_duration() {
        let sink = Arc::new(CountingSink::default());
        let (output, _) = output_with(Arc::clone(&sink));
        output.set_source("a");
        assert_eq!(output.seek(Duration::from_secs(5)), None);

        *sink.duration.lock() = Some(Duration::from_secs(100));
        assert_eq!(
            output.seek(Duration::from_secs(500)),
            Some(Duration::from_secs(100))
        );
        assert_eq!(sink.seeks.lock().as_slice(), &[Duration::from_secs(100)]);
    }

    #[test]
    fn test_duration_event_makes_seek_possible() {
        let sink = Arc::new(CountingSink::default());
        let (output, events) = output_with(sink);
        output.set_source("a");
        let events = events.lock().clone().unwrap();
        events.emit(AudioEvent::DurationChanged(Duration::from_secs(30)));
        assert_eq!(output.seek(Duration::from_secs(10)), Some(Duration::from_secs(10)));

        output.set_source("b");
        assert_eq!(output.duration(), None);
    }

    #[test]
    fn test_ended_reported_once_per_source_to_last_handler() {
        let sink = Arc::new(CountingSink::default());
        let (output, events) = output_with(sink);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        output.set_event_handler(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        output.set_event_handler(Arc::new(move |e| {
            if e == AudioEvent::Ended {
                s.fetch_add(1, Ordering::SeqCst);
            }
        }));

        output.set_source("a");
        let events = events.lock().clone().unwrap();
        events.emit(AudioEvent::Ended);
        events.emit(AudioEvent::Ended);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        output.set_source("b");
        events.emit(AudioEvent::Ended);
        assert_eq!(second.load(Ordering::SeqCst), 2);

        output.clear_source();
        events.emit(AudioEvent::Ended);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }
}
