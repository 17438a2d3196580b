use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Collapses repeated missed-call signals for the same caller on the same line.
///
/// A signal is accepted when no signal for `(line_id, origin)` was accepted
/// within the window. Acceptance records the time before returning, so a
/// flood of duplicates yields exactly one event.
#[derive(Debug)]
pub struct MissedCallDebouncer {
    window: Duration,
    accepted: Mutex<HashMap<(i64, String), Instant>>,
}

impl MissedCallDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-record using the current time.
    pub fn accept(&self, line_id: i64, origin: &str) -> bool {
        self.accept_at(line_id, origin, Instant::now())
    }

    /// Check-and-record at an explicit instant.
    pub fn accept_at(&self, line_id: i64, origin: &str, now: Instant) -> bool {
        let mut accepted = self
            .accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let key = (line_id, origin.to_string());
        if let Some(last) = accepted.get(&key) {
            if now.saturating_duration_since(*last) <= self.window {
                debug!(line_id, origin = %origin, "Duplicate missed call suppressed");
                return false;
            }
        }

        // Entries older than the window can never suppress anything again.
        let window = self.window;
        accepted.retain(|_, last| now.saturating_duration_since(*last) <= window);
        accepted.insert(key, now);
        true
    }

    /// Number of callers currently inside their window.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
