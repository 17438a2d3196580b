//! Error types for the dispatch engine.

use callrelay_core::error::RelayError;

/// Why an immediate or consolidated delivery attempt did not go through.
///
/// Every variant is handled inside the engine; none of them stops ingestion.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),
    #[error("Format error: {0}")]
    Format(String),
    #[error("Storage error: {0}")]
    Storage(#[from] RelayError),
}

impl From<std::fmt::Error> for DispatchError {
    fn from(err: std::fmt::Error) -> Self {
        DispatchError::Format(err.to_string())
    }
}

impl From<RadioError> for DispatchError {
    fn from(err: RadioError) -> Self {
        DispatchError::NetworkUnavailable(err.to_string())
    }
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        DispatchError::DeliveryRejected(err.to_string())
    }
}

/// Errors from platform radio control.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("Radio control not permitted on this platform")]
    NotPermitted,
    #[error("Radio platform error: {0}")]
    Platform(String),
}

/// Errors raised by a transport while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport failed: {0}")]
    Failed(String),
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
