//! Duration formatting for progress display.

use std::time::Duration;

/// Extension trait for showing durations to the listener.
pub trait DurationExt {
    /// Format as `m:ss`, the way a player progress bar shows it.
    fn to_clock(&self) -> String;
}

impl DurationExt for Duration {
    fn to_clock(&self) -> String {
        let secs = self.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
