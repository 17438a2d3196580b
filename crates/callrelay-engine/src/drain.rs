//! Consolidated retry of everything in the durable queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use callrelay_storage::EventQueue;

use crate::error::DispatchError;
use crate::format::Render;
use crate::network::NetworkController;
use crate::transport::{self, Transport};

/// Result of one consolidated drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was empty; nothing was sent.
    Empty,
    /// All `count` snapshotted events were delivered and removed.
    Delivered { count: usize },
    /// The cycle failed; `count` events stay queued.
    Failed { count: usize, reason: String },
    /// Another drain was already running.
    Skipped,
}

impl DrainOutcome {
    /// Whether the queue is fully handled as far as this cycle knows.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DrainOutcome::Empty | DrainOutcome::Delivered { .. } | DrainOutcome::Skipped
        )
    }
}

/// Drains the queue into one merged delivery per cycle.
///
/// At most one drain runs at a time; the read of the snapshot and the
/// following delete or mark-attempt happen under the same guard.
pub struct ConsolidatedSender {
    queue: EventQueue,
    network: Arc<NetworkController>,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn Render>,
    subject: String,
    guard: Mutex<()>,
}

impl ConsolidatedSender {
    pub fn new(
        queue: EventQueue,
        network: Arc<NetworkController>,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn Render>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            network,
            transport,
            renderer,
            subject: subject.into(),
            guard: Mutex::new(()),
        }
    }

    /// Run one drain cycle. `true` means nothing is left for a later cycle.
    pub async fn drain_and_send(&self) -> bool {
        self.drain().await.is_success()
    }

    /// Run one drain cycle, waiting for any drain already in progress.
    pub async fn drain(&self) -> DrainOutcome {
        let _guard = self.guard.lock().await;
        self.drain_locked().await
    }

    /// Run one drain cycle unless another one is in progress.
    pub async fn drain_if_idle(&self) -> DrainOutcome {
        match self.guard.try_lock() {
            Ok(_guard) => self.drain_locked().await,
            Err(_) => {
                debug!("Drain already in progress, skipping");
                DrainOutcome::Skipped
            }
        }
    }

    async fn drain_locked(&self) -> DrainOutcome {
        let events = match self.queue.list_pending() {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to read pending events");
                return DrainOutcome::Failed {
                    count: 0,
                    reason: e.to_string(),
                };
            }
        };

        if events.is_empty() {
            debug!("No pending events to drain");
            return DrainOutcome::Empty;
        }

        let ids: Vec<i64> = events.iter().filter_map(|e| e.id).collect();
        let count = ids.len();
        info!(count, "Draining pending events");

        if let Err(e) = self.network.ensure_network_ready().await {
            warn!(count, error = %e, "Drain skipped: network unavailable");
            return DrainOutcome::Failed {
                count,
                reason: e.to_string(),
            };
        }

        let result = match self.renderer.render(&self.subject, &events, Utc::now()) {
            Ok(notification) => transport::deliver(self.transport.as_ref(), &notification).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.delete_by_ids(&ids) {
                    error!(count, error = %e, "Delivered events could not be removed and will be sent again");
                }
                info!(count, "Consolidated delivery succeeded");
                DrainOutcome::Delivered { count }
            }
            Err(e) => {
                match &e {
                    DispatchError::Format(_) => {
                        error!(count, error = %e, "Consolidated report could not be formatted")
                    }
                    _ => warn!(count, error = %e, "Consolidated delivery failed"),
                }
                if let Err(mark_err) = self.queue.mark_attempt(&ids, Utc::now()) {
                    error!(count, error = %mark_err, "Failed to record delivery attempt");
                }
                DrainOutcome::Failed {
                    count,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MessageFormatter;
    use crate::mock::{MockOutcome, MockRadio, MockTransport};
    use crate::transport::Notification;
    use crate::network::NetworkSettings;
    use crate::shutdown::ShutdownSignal;
    use callrelay_core::types::{datetime_from_millis, Event};
    use chrono::DateTime;
    use callrelay_storage::Database;
    use std::time::Duration;

    struct Fixture {
        queue: EventQueue,
        radio: Arc<MockRadio>,
        transport: Arc<MockTransport>,
        sender: ConsolidatedSender,
    }

    /// Refuses to render anything.
    struct BrokenRender;

    impl Render for BrokenRender {
        fn render(
            &self,
            _subject: &str,
            _events: &[Event],
            _generated_at: DateTime<Utc>,
        ) -> Result<Notification, DispatchError> {
            Err(DispatchError::Format("template unavailable".to_string()))
        }
    }

    fn fixture(radio: MockRadio, transport: MockTransport) -> Fixture {
        fixture_with(radio, transport, Arc::new(MessageFormatter::default()))
    }

    fn fixture_with(
        radio: MockRadio,
        transport: MockTransport,
        renderer: Arc<dyn Render>,
    ) -> Fixture {
        let queue = EventQueue::new(Arc::new(Database::in_memory().unwrap()));
        let radio = Arc::new(radio);
        let transport = Arc::new(transport);
        let settings = NetworkSettings {
            connect_timeout: Duration::from_secs(35),
            poll_interval: Duration::from_millis(1_500),
            radio_off_delay: Duration::from_secs(180),
        };
        let network = Arc::new(NetworkController::new(
            Arc::clone(&radio) as Arc<dyn crate::radio::RadioControl>,
            settings,
            ShutdownSignal::new(),
        ));
        let sender = ConsolidatedSender::new(
            queue.clone(),
            network,
            Arc::clone(&transport) as Arc<dyn Transport>,
            renderer,
            "SMS/Call report (resend)",
        );
        Fixture {
            queue,
            radio,
            transport,
            sender,
        }
    }

    fn message_at(ms: i64) -> Event {
        Event::message("+15550100", format!("body {}", ms), datetime_from_millis(ms).unwrap(), "SIM 1", 1)
    }

    #[tokio::test]
    async fn test_empty_queue_succeeds_without_sending() {
        let f = fixture(MockRadio::online(), MockTransport::accepting());
        assert_eq!(f.sender.drain().await, DrainOutcome::Empty);
        assert!(f.sender.drain_and_send().await);
        assert_eq!(f.transport.message_count(), 0);
        assert_eq!(f.radio.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_success_deletes_all_events() {
        let f = fixture(MockRadio::online(), MockTransport::accepting());
        f.queue.insert(&message_at(300)).unwrap();
        f.queue.insert(&message_at(100)).unwrap();
        f.queue.insert(&message_at(200)).unwrap();

        assert_eq!(f.sender.drain().await, DrainOutcome::Delivered { count: 3 });
        assert_eq!(f.queue.pending_count().unwrap(), 0);

        let sent = f.transport.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "SMS/Call report (resend)");
        assert!(sent[0].body.contains("SMS/Call event report (3)"));
        let first = sent[0].body.find("body 100").unwrap();
        let second = sent[0].body.find("body 200").unwrap();
        let third = sent[0].body.find("body 300").unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_failure_marks_every_event_once() {
        let f = fixture(MockRadio::online(), MockTransport::rejecting());
        f.queue.insert(&message_at(100)).unwrap();
        f.queue.insert(&message_at(200)).unwrap();

        assert!(!f.sender.drain_and_send().await);

        let events = f.queue.list_pending().unwrap();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.retry_count, 1);
            assert!(event.last_attempt_at.is_some());
        }
        assert_eq!(events[0].last_attempt_at, events[1].last_attempt_at);
    }

    #[tokio::test]
    async fn test_transport_fault_marks_attempt() {
        let f = fixture(MockRadio::online(), MockTransport::failing("smtp down"));
        f.queue.insert(&message_at(100)).unwrap();

        match f.sender.drain().await {
            DrainOutcome::Failed { count, reason } => {
                assert_eq!(count, 1);
                assert!(reason.contains("smtp down"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(f.queue.list_pending().unwrap()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_render_failure_marks_attempt_without_sending() {
        let f = fixture_with(
            MockRadio::online(),
            MockTransport::accepting(),
            Arc::new(BrokenRender),
        );
        f.queue.insert(&message_at(100)).unwrap();
        f.queue.insert(&message_at(200)).unwrap();

        match f.sender.drain().await {
            DrainOutcome::Failed { count, reason } => {
                assert_eq!(count, 2);
                assert!(reason.contains("template unavailable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!f.sender.drain_and_send().await);

        assert_eq!(f.transport.message_count(), 0);
        assert!(f.transport.plain_texts().is_empty());
        let events = f.queue.list_pending().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.retry_count == 2));
    }

    #[tokio::test]
    async fn test_concurrent_drains_send_once() {
        let f = fixture(MockRadio::online(), MockTransport::accepting());
        f.queue.insert(&message_at(100)).unwrap();
        f.queue.insert(&message_at(200)).unwrap();

        let (a, b) = tokio::join!(f.sender.drain_and_send(), f.sender.drain_and_send());

        assert!(a && b);
        assert_eq!(f.transport.message_count(), 1);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_leaves_queue_untouched() {
        let f = fixture(MockRadio::offline(), MockTransport::accepting());
        f.queue.insert(&message_at(100)).unwrap();

        assert!(!f.sender.drain_and_send().await);

        let events = f.queue.list_pending().unwrap();
        assert_eq!(events[0].retry_count, 0);
        assert!(events[0].last_attempt_at.is_none());
        assert_eq!(f.transport.message_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_failure_then_success() {
        let f = fixture(MockRadio::online(), MockTransport::rejecting());
        f.queue.insert(&message_at(100)).unwrap();
        f.queue.insert(&message_at(200)).unwrap();

        assert!(!f.sender.drain_and_send().await);
        assert!(!f.sender.drain_and_send().await);
        assert!(f
            .queue
            .list_pending()
            .unwrap()
            .iter()
            .all(|e| e.retry_count == 2));

        f.transport.set_outcome(MockOutcome::Accept);
        assert!(f.sender.drain_and_send().await);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
        assert_eq!(f.transport.message_count(), 3);
    }

    #[tokio::test]
    async fn test_secondary_channel_failure_does_not_block_delete() {
        let f = fixture(MockRadio::online(), MockTransport::accepting());
        f.transport.set_plain_text_outcome(MockOutcome::Reject);
        f.queue.insert(&message_at(100)).unwrap();

        assert!(f.sender.drain_and_send().await);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_if_idle_skips_while_locked() {
        let f = fixture(MockRadio::online(), MockTransport::accepting());
        f.queue.insert(&message_at(100)).unwrap();

        let held = f.sender.guard.lock().await;
        assert_eq!(f.sender.drain_if_idle().await, DrainOutcome::Skipped);
        drop(held);

        assert_eq!(
            f.sender.drain_if_idle().await,
            DrainOutcome::Delivered { count: 1 }
        );
    }

    #[test]
    fn test_outcome_success_flags() {
        assert!(DrainOutcome::Empty.is_success());
        assert!(DrainOutcome::Delivered { count: 2 }.is_success());
        assert!(DrainOutcome::Skipped.is_success());
        assert!(!DrainOutcome::Failed {
            count: 2,
            reason: "x".to_string()
        }
        .is_success());
    }
}
