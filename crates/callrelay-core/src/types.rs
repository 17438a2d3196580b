use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// The kind of locally observed occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An incoming short message.
    Message,
    /// A call that rang and was never answered.
    MissedCall,
}

impl EventKind {
    /// Stable identifier used in the `pending_events.kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MissedCall => "missed_call",
        }
    }

    /// Parse the stored column value back into a kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(EventKind::Message),
            "missed_call" => Some(EventKind::MissedCall),
            _ => None,
        }
    }

    /// Human label shown in delivered notifications.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Message => "message received",
            EventKind::MissedCall => "missed call",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a queued event.
///
/// Delivered events are deleted from the queue, so `Pending` is the only
/// state that is ever persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Pending,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
        }
    }
}

/// Outcome of a single immediate delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// The transport accepted the notification.
    Delivered,
    /// The radio could not be enabled or connectivity never validated.
    FailedNetwork,
    /// Formatting failed or the transport rejected or faulted.
    FailedOther,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::Delivered => write!(f, "delivered"),
            SendStatus::FailedNetwork => write!(f, "failed_network"),
            SendStatus::FailedOther => write!(f, "failed_other"),
        }
    }
}

/// Observable power state of the network radio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    #[default]
    Off,
    /// Power-up was requested but connectivity has not been observed yet.
    Enabling,
    On,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioState::Off => write!(f, "off"),
            RadioState::Enabling => write!(f, "enabling"),
            RadioState::On => write!(f, "on"),
        }
    }
}

// =============================================================================
// Event record
// =============================================================================

/// One notification-worthy occurrence and its delivery bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the durable queue on insertion; `None` before that.
    pub id: Option<i64>,
    pub kind: EventKind,
    /// Sender or caller identifier.
    pub origin: String,
    /// Message text. Always `None` for missed calls.
    pub body: Option<String>,
    /// When the event happened (not when it was queued).
    pub occurred_at: DateTime<Utc>,
    /// Human description of the line (SIM) that observed the event.
    pub line_label: String,
    /// Numeric line / subscription identifier.
    pub line_id: i64,
    pub status: EventStatus,
    /// Most recent failed consolidated attempt that included this event.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Number of failed consolidated attempts. Only ever increases.
    pub retry_count: u32,
}

impl Event {
    /// A freshly captured short message.
    pub fn message(
        origin: impl Into<String>,
        body: impl Into<String>,
        occurred_at: DateTime<Utc>,
        line_label: impl Into<String>,
        line_id: i64,
    ) -> Self {
        Self {
            id: None,
            kind: EventKind::Message,
            origin: origin.into(),
            body: Some(body.into()),
            occurred_at,
            line_label: line_label.into(),
            line_id,
            status: EventStatus::Pending,
            last_attempt_at: None,
            retry_count: 0,
        }
    }

    /// A freshly detected missed call.
    pub fn missed_call(
        origin: impl Into<String>,
        occurred_at: DateTime<Utc>,
        line_label: impl Into<String>,
        line_id: i64,
    ) -> Self {
        Self {
            id: None,
            kind: EventKind::MissedCall,
            origin: origin.into(),
            body: None,
            occurred_at,
            line_label: line_label.into(),
            line_id,
            status: EventStatus::Pending,
            last_attempt_at: None,
            retry_count: 0,
        }
    }
}

// =============================================================================
// Raw ingestion input
// =============================================================================

/// Low-level call-state change reported for one line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallSignal {
    /// The line started ringing. The number may be withheld on some signals.
    Ringing {
        #[serde(default)]
        number: Option<String>,
    },
    /// The call was picked up (or an outgoing call started).
    OffHook,
    /// The line returned to idle.
    Idle,
}

/// An event as handed over by the platform event source.
///
/// Serialized as one JSON object per line with a `type` tag, e.g.
/// `{"type":"message","origin":"+15550100","body":"hi","line_id":1}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// A fully reassembled short message.
    Message {
        origin: String,
        body: String,
        line_id: i64,
        #[serde(default)]
        line_label: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },
    /// A missed call already classified by the source.
    MissedCall {
        origin: String,
        line_id: i64,
        #[serde(default)]
        line_label: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },
    /// A call-state transition to be fed through line-session tracking.
    CallState {
        line_id: i64,
        #[serde(default)]
        line_label: String,
        signal: CallSignal,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },
}

impl RawEvent {
    pub fn line_id(&self) -> i64 {
        match self {
            RawEvent::Message { line_id, .. }
            | RawEvent::MissedCall { line_id, .. }
            | RawEvent::CallState { line_id, .. } => *line_id,
        }
    }
}

// =============================================================================
// Time helpers
// =============================================================================

/// Convert a stored millisecond epoch value into a UTC timestamp.
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn datetime_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Nanosecond epoch value of a timestamp, the queue's storage format.
///
/// Returns `None` outside the years 1677 to 2262, which an `i64` cannot hold.
pub fn datetime_to_nanos(at: &DateTime<Utc>) -> Option<i64> {
    at.timestamp_nanos_opt()
}

/// Inverse of [`datetime_to_nanos`].
pub fn datetime_from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}
