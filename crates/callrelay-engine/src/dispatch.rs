//! Immediate, single-event delivery.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use callrelay_core::types::{Event, SendStatus};

use crate::error::DispatchError;
use crate::format::MessageFormatter;
use crate::network::NetworkController;
use crate::transport::{self, Transport};

/// Attempts delivery of one freshly captured event.
///
/// Never touches the durable queue; the caller decides what to do with a
/// failed outcome.
pub struct Dispatcher {
    network: Arc<NetworkController>,
    transport: Arc<dyn Transport>,
    formatter: MessageFormatter,
    subject: String,
}

impl Dispatcher {
    pub fn new(
        network: Arc<NetworkController>,
        transport: Arc<dyn Transport>,
        formatter: MessageFormatter,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            network,
            transport,
            formatter,
            subject: subject.into(),
        }
    }

    /// Try to deliver `event` right now and report how it went.
    pub async fn try_deliver_now(&self, event: &Event) -> SendStatus {
        match self.attempt(event).await {
            Ok(()) => {
                info!(kind = %event.kind, origin = %event.origin, "Event delivered immediately");
                SendStatus::Delivered
            }
            Err(e) => {
                let status = status_for(&e);
                match &e {
                    DispatchError::Format(_) | DispatchError::Storage(_) => {
                        error!(kind = %event.kind, error = %e, "Immediate delivery failed")
                    }
                    _ => warn!(kind = %event.kind, error = %e, "Immediate delivery failed"),
                }
                status
            }
        }
    }

    async fn attempt(&self, event: &Event) -> Result<(), DispatchError> {
        self.network.ensure_network_ready().await?;
        let notification =
            self.formatter
                .notification(&self.subject, std::slice::from_ref(event), Utc::now())?;
        transport::deliver(self.transport.as_ref(), &notification).await
    }
}

/// Map a failed attempt onto the reported outcome.
pub fn status_for(err: &DispatchError) -> SendStatus {
    match err {
        DispatchError::NetworkUnavailable(_) => SendStatus::FailedNetwork,
        DispatchError::DeliveryRejected(_)
        | DispatchError::Format(_)
        | DispatchError::Storage(_) => SendStatus::FailedOther,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockOutcome, MockRadio, MockTransport};
    use crate::network::NetworkSettings;
    use crate::shutdown::ShutdownSignal;
    use callrelay_core::error::RelayError;
    use std::time::Duration;

    fn event() -> Event {
        Event::message("+15550100", "hello", Utc::now(), "SIM 1", 1)
    }

    fn dispatcher(radio: Arc<MockRadio>, transport: Arc<MockTransport>) -> Dispatcher {
        let settings = NetworkSettings {
            connect_timeout: Duration::from_secs(35),
            poll_interval: Duration::from_millis(1_500),
            radio_off_delay: Duration::from_secs(180),
        };
        let network = Arc::new(NetworkController::new(radio, settings, ShutdownSignal::new()));
        Dispatcher::new(
            network,
            transport,
            MessageFormatter::default(),
            "SMS/Call notification",
        )
    }

    #[tokio::test]
    async fn test_delivered_when_online_and_accepted() {
        let transport = Arc::new(MockTransport::accepting());
        let dispatcher = dispatcher(Arc::new(MockRadio::online()), Arc::clone(&transport));

        assert_eq!(dispatcher.try_deliver_now(&event()).await, SendStatus::Delivered);

        let sent = transport.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "SMS/Call notification");
        assert!(sent[0].body.contains("Message notification"));
        assert_eq!(transport.plain_texts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_network_when_connectivity_never_arrives() {
        let transport = Arc::new(MockTransport::accepting());
        let dispatcher = dispatcher(Arc::new(MockRadio::offline()), Arc::clone(&transport));

        assert_eq!(
            dispatcher.try_deliver_now(&event()).await,
            SendStatus::FailedNetwork
        );
        assert_eq!(transport.message_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_network_when_radio_cannot_be_enabled() {
        let radio = Arc::new(MockRadio::offline().with_control_permitted(false));
        let transport = Arc::new(MockTransport::accepting());
        let dispatcher = dispatcher(radio, Arc::clone(&transport));

        assert_eq!(
            dispatcher.try_deliver_now(&event()).await,
            SendStatus::FailedNetwork
        );
        assert_eq!(transport.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_after_enabling_radio() {
        let radio = Arc::new(MockRadio::connects_on_enable());
        let transport = Arc::new(MockTransport::accepting());
        let dispatcher = dispatcher(Arc::clone(&radio), transport);

        assert_eq!(dispatcher.try_deliver_now(&event()).await, SendStatus::Delivered);
        assert_eq!(radio.enable_requests(), 1);
    }

    #[tokio::test]
    async fn test_failed_other_when_transport_refuses() {
        let transport = Arc::new(MockTransport::rejecting());
        let dispatcher = dispatcher(Arc::new(MockRadio::online()), Arc::clone(&transport));

        assert_eq!(
            dispatcher.try_deliver_now(&event()).await,
            SendStatus::FailedOther
        );
        assert_eq!(transport.message_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_other_when_transport_faults() {
        let transport = Arc::new(MockTransport::accepting());
        transport.set_outcome(MockOutcome::Fail("connection reset".to_string()));
        let dispatcher = dispatcher(Arc::new(MockRadio::online()), transport);

        assert_eq!(
            dispatcher.try_deliver_now(&event()).await,
            SendStatus::FailedOther
        );
    }

    #[test]
    fn test_status_for_each_error() {
        assert_eq!(
            status_for(&DispatchError::NetworkUnavailable("x".into())),
            SendStatus::FailedNetwork
        );
        assert_eq!(
            status_for(&DispatchError::DeliveryRejected("x".into())),
            SendStatus::FailedOther
        );
        assert_eq!(
            status_for(&DispatchError::Format("x".into())),
            SendStatus::FailedOther
        );
        assert_eq!(
            status_for(&DispatchError::Storage(RelayError::Storage("x".into()))),
            SendStatus::FailedOther
        );
    }
}
