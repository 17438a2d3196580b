//! Delivery capability and the two-channel delivery rule.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{DispatchError, TransportError};

/// Sends a formatted notification to an external channel.
///
/// Each call is one attempt. `Ok(false)` is a clean refusal; `Err` is an
/// unexpected fault. A channel that is switched off or has nobody to send to
/// reports `Ok(true)` without sending anything.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Primary channel: a subject plus an HTML body.
    async fn deliver_message(&self, subject: &str, body: &str) -> Result<bool, TransportError>;

    /// Secondary channel: a single plain-text line, e.g. for an SMS gateway.
    async fn deliver_plain_text(&self, body: &str) -> Result<bool, TransportError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// A rendered notification ready to hand to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html: String,
    pub plain_text: String,
}

/// Deliver one notification through both channels.
///
/// Only the primary channel decides the outcome. The secondary channel is
/// always attempted after it and its result is only logged.
pub async fn deliver(
    transport: &dyn Transport,
    notification: &Notification,
) -> Result<(), DispatchError> {
    let primary = transport
        .deliver_message(&notification.subject, &notification.html)
        .await;

    match transport.deliver_plain_text(&notification.plain_text).await {
        Ok(true) => debug!(transport = %transport.name(), "Plain-text notification sent"),
        Ok(false) => warn!(
            transport = %transport.name(),
            "Plain-text notification refused; ignored"
        ),
        Err(e) => warn!(
            transport = %transport.name(),
            error = %e,
            "Plain-text notification failed; ignored"
        ),
    }

    match primary {
        Ok(true) => Ok(()),
        Ok(false) => Err(DispatchError::DeliveryRejected(format!(
            "{} refused the notification",
            transport.name()
        ))),
        Err(e) => Err(e.into()),
    }
}
