//! Scriptable in-process implementations of the platform capabilities.
//!
//! Used by tests, and by the binary as its "none" radio backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{RadioError, TransportError};
use crate::radio::RadioControl;
use crate::transport::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Radio
// =============================================================================

/// In-memory radio with a switchable connectivity flag.
#[derive(Debug)]
pub struct MockRadio {
    enabled: AtomicBool,
    connected: AtomicBool,
    control_permitted: AtomicBool,
    connect_on_enable: AtomicBool,
    enable_requests: AtomicUsize,
    disable_requests: AtomicUsize,
    probes: AtomicUsize,
}

impl MockRadio {
    fn with_state(enabled: bool, connected: bool, permitted: bool, connect_on_enable: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            connected: AtomicBool::new(connected),
            control_permitted: AtomicBool::new(permitted),
            connect_on_enable: AtomicBool::new(connect_on_enable),
            enable_requests: AtomicUsize::new(0),
            disable_requests: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Radio on and connected; switching it is allowed.
    pub fn online() -> Self {
        Self::with_state(true, true, true, true)
    }

    /// Radio off; enabling it succeeds and brings connectivity with it.
    pub fn connects_on_enable() -> Self {
        Self::with_state(false, false, true, true)
    }

    /// Radio off; enabling it succeeds but connectivity never validates.
    pub fn offline() -> Self {
        Self::with_state(false, false, true, false)
    }

    /// Connected host without a controllable radio (wired, or managed elsewhere).
    pub fn always_online() -> Self {
        Self::with_state(true, true, false, true)
    }

    pub fn with_control_permitted(self, permitted: bool) -> Self {
        self.control_permitted.store(permitted, Ordering::SeqCst);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of successful power-up requests.
    pub fn enable_requests(&self) -> usize {
        self.enable_requests.load(Ordering::SeqCst)
    }

    /// Number of successful power-down requests.
    pub fn disable_requests(&self) -> usize {
        self.disable_requests.load(Ordering::SeqCst)
    }

    /// Number of connectivity probes answered.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioControl for MockRadio {
    async fn is_radio_enabled(&self) -> Result<bool, RadioError> {
        Ok(self.is_enabled())
    }

    async fn set_radio_enabled(&self, enabled: bool) -> Result<bool, RadioError> {
        if !self.control_permitted.load(Ordering::SeqCst) {
            return Err(RadioError::NotPermitted);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.enable_requests.fetch_add(1, Ordering::SeqCst);
            if self.connect_on_enable.load(Ordering::SeqCst) {
                self.connected.store(true, Ordering::SeqCst);
            }
        } else {
            self.disable_requests.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }
        Ok(true)
    }

    async fn has_validated_connectivity(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Scripted result of one mock delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    Reject,
    Fail(String),
}

impl MockOutcome {
    fn into_result(self) -> Result<bool, TransportError> {
        match self {
            MockOutcome::Accept => Ok(true),
            MockOutcome::Reject => Ok(false),
            MockOutcome::Fail(msg) => Err(TransportError::Failed(msg)),
        }
    }
}

/// A primary-channel delivery recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub subject: String,
    pub body: String,
}

/// Transport that records every attempt and answers with a scripted outcome.
#[derive(Debug)]
pub struct MockTransport {
    primary: Mutex<MockOutcome>,
    plain_text: Mutex<MockOutcome>,
    messages: Mutex<Vec<SentMessage>>,
    plain_texts: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(primary: MockOutcome) -> Self {
        Self {
            primary: Mutex::new(primary),
            plain_text: Mutex::new(MockOutcome::Accept),
            messages: Mutex::new(Vec::new()),
            plain_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(MockOutcome::Accept)
    }

    pub fn rejecting() -> Self {
        Self::new(MockOutcome::Reject)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockOutcome::Fail(message.into()))
    }

    pub fn set_outcome(&self, outcome: MockOutcome) {
        *lock(&self.primary) = outcome;
    }

    pub fn set_plain_text_outcome(&self, outcome: MockOutcome) {
        *lock(&self.plain_text) = outcome;
    }

    /// Every primary-channel attempt, accepted or not.
    pub fn messages(&self) -> Vec<SentMessage> {
        lock(&self.messages).clone()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.messages).len()
    }

    /// Every secondary-channel attempt, accepted or not.
    pub fn plain_texts(&self) -> Vec<String> {
        lock(&self.plain_texts).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver_message(&self, subject: &str, body: &str) -> Result<bool, TransportError> {
        lock(&self.messages).push(SentMessage {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        lock(&self.primary).clone().into_result()
    }

    async fn deliver_plain_text(&self, body: &str) -> Result<bool, TransportError> {
        lock(&self.plain_texts).push(body.to_string());
        lock(&self.plain_text).clone().into_result()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
