//! Platform radio and connectivity capability.

use async_trait::async_trait;

use crate::error::RadioError;

/// Control over the network radio (typically Wi-Fi) and a probe for
/// validated internet connectivity.
///
/// Implementations talk to the platform; the engine never assumes the radio
/// can actually be switched.
#[async_trait]
pub trait RadioControl: Send + Sync {
    /// Whether the radio is currently powered.
    async fn is_radio_enabled(&self) -> Result<bool, RadioError>;

    /// Request the radio on or off.
    ///
    /// `Ok(false)` means the platform accepted the call but refused the change.
    async fn set_radio_enabled(&self, enabled: bool) -> Result<bool, RadioError>;

    /// Whether a network with validated internet access is available right now.
    async fn has_validated_connectivity(&self) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
