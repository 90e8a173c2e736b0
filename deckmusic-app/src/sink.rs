//! Audio sink without a sound device.
//!
//! Keeps a simulated playback clock per loaded stream and reports `Ended` when
//! the clock runs out, so the queue behaves as it would on real hardware.

use async_trait::async_trait;
use deckmusic_core::{AudioEvent, AudioEvents, AudioSink};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Length every simulated stream reports
pub const SIMULATED_STREAM_LENGTH: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Clock {
    source: Option<String>,
    /// Position reached before the current run started
    offset: Duration,
    /// Set while the clock is running
    started_at: Option<Instant>,
    end_timer: Option<CancellationToken>,
}

impl Clock {
    fn position(&self, length: Duration) -> Duration {
        let running = self.started_at.map_or(Duration::ZERO, |t| t.elapsed());
        (self.offset + running).min(length)
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.cancel();
        }
    }
}

pub struct HeadlessSink {
    events: AudioEvents,
    length: Duration,
    clock: Mutex<Clock>,
}

impl HeadlessSink {
    #[must_use]
    pub fn new(events: AudioEvents, length: Duration) -> Self {
        Self {
            events,
            length,
            clock: Mutex::new(Clock::default()),
        }
    }

    /// Arm the end-of-stream timer for the remaining part of the stream.
    fn arm_end_timer(&self, clock: &mut Clock) {
        clock.stop_timer();
        let remaining = self.length.saturating_sub(clock.offset);
        let token = CancellationToken::new();
        clock.end_timer = Some(token.clone());

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(remaining) => {
                    debug!("Simulated stream reached its end");
                    events.emit(AudioEvent::Ended);
                }
            }
        });
    }
}

#[async_trait]
impl AudioSink for HeadlessSink {
    fn set_source(&self, url: &str) {
        {
            let mut clock = self.clock.lock();
            clock.stop_timer();
            *clock = Clock {
                source: Some(url.to_string()),
                ..Clock::default()
            };
        }
        debug!("Loaded {}", url);
        self.events.emit(AudioEvent::DurationChanged(self.length));
    }

    fn clear_source(&self) {
        let mut clock = self.clock.lock();
        clock.stop_timer();
        *clock = Clock::default();
    }

    async fn play(&self) -> Result<(), String> {
        let mut clock = self.clock.lock();
        if clock.source.is_none() {
            return Err("no stream loaded".to_string());
        }
        if clock.started_at.is_none() {
            clock.started_at = Some(Instant::now());
            self.arm_end_timer(&mut clock);
        }
        Ok(())
    }

    async fn pause(&self) {
        let mut clock = self.clock.lock();
        clock.offset = clock.position(self.length);
        clock.started_at = None;
        clock.stop_timer();
    }

    fn seek(&self, position: Duration) {
        let mut clock = self.clock.lock();
        clock.offset = position.min(self.length);
        if clock.started_at.is_some() {
            clock.started_at = Some(Instant::now());
            self.arm_end_timer(&mut clock);
        }
    }

    fn set_volume(&self, volume: f32) {
        debug!("Volume set to {:.2}", volume);
    }

    fn current_time(&self) -> Duration {
        self.clock.lock().position(self.length)
    }

    fn duration(&self) -> Option<Duration> {
        self.clock.lock().source.as_ref().map(|_| self.length)
    }
}
