//! Per-line call session tracking.
//!
//! Each line moves `Idle -> Ringing -> {Answered, MissedCandidate}` on
//! discrete call-state signals. A ringing line that returns to idle without
//! being picked up is a missed call.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use callrelay_core::types::CallSignal;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinePhase {
    #[default]
    Idle,
    Ringing,
    /// Picked up after ringing. Ends without a notification.
    Answered,
    /// Rang and went idle unanswered.
    MissedCandidate,
}

/// Call progress on one line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineSession {
    phase: LinePhase,
    number: Option<String>,
}

impl LineSession {
    pub fn phase(&self) -> LinePhase {
        self.phase
    }

    /// Caller number seen during the current ring, if any.
    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    /// Apply one signal. Returns the caller number when it completes a missed call.
    pub fn apply(&mut self, signal: &CallSignal) -> Option<String> {
        match signal {
            CallSignal::Ringing { number } => {
                if self.phase != LinePhase::Ringing {
                    self.number = None;
                }
                self.phase = LinePhase::Ringing;
                // The number may only arrive on a later ringing signal.
                if let Some(n) = number.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                    self.number = Some(n.to_string());
                }
                None
            }
            CallSignal::OffHook => {
                if self.phase == LinePhase::Ringing {
                    self.phase = LinePhase::Answered;
                }
                None
            }
            CallSignal::Idle => match self.phase {
                LinePhase::Ringing => match self.number.take() {
                    Some(number) => {
                        self.phase = LinePhase::MissedCandidate;
                        Some(number)
                    }
                    None => {
                        debug!("Unanswered call without a caller number ignored");
                        self.phase = LinePhase::Idle;
                        None
                    }
                },
                _ => {
                    self.phase = LinePhase::Idle;
                    self.number = None;
                    None
                }
            },
        }
    }
}

/// Line sessions keyed by the line id reported with each signal.
#[derive(Debug, Default)]
pub struct CallTracker {
    sessions: Mutex<HashMap<i64, LineSession>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a signal for `line_id`; returns the caller number of a completed missed call.
    pub fn observe(&self, line_id: i64, signal: &CallSignal) -> Option<String> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let missed = sessions.entry(line_id).or_default().apply(signal);
        if let Some(number) = &missed {
            debug!(line_id, number = %number, "Missed call detected");
        }
        missed
    }

    /// Current phase of a line. Lines never seen are idle.
    pub fn phase(&self, line_id: i64) -> LinePhase {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&line_id)
            .map(LineSession::phase)
            .unwrap_or_default()
    }
}
