//! Radio backends selectable from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use callrelay_core::error::RelayError;
use callrelay_engine::mock::MockRadio;
use callrelay_engine::{RadioControl, RadioError};

/// Build the radio backend named in `[network] radio_backend`.
///
/// `none` reports the radio as always on and connected and refuses power
/// changes, which suits hosts on a wired link.
pub fn from_backend(backend: &str) -> Result<Arc<dyn RadioControl>, RelayError> {
    match backend.trim() {
        "" | "none" => Ok(Arc::new(MockRadio::always_online())),
        "nmcli" => Ok(Arc::new(NmcliRadio::new())),
        other => Err(RelayError::Config(format!(
            "unknown radio backend '{}' (expected 'none' or 'nmcli')",
            other
        ))),
    }
}

/// Wi-Fi control through NetworkManager's `nmcli`.
#[derive(Debug, Clone)]
pub struct NmcliRadio {
    program: String,
}

impl NmcliRadio {
    pub fn new() -> Self {
        Self {
            program: "nmcli".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, RadioError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| RadioError::Platform(format!("failed to run {}: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if is_permission_error(&stderr) {
                return Err(RadioError::NotPermitted);
            }
            return Err(RadioError::Platform(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NmcliRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioControl for NmcliRadio {
    async fn is_radio_enabled(&self) -> Result<bool, RadioError> {
        let out = self.run(&["radio", "wifi"]).await?;
        parse_radio_state(&out).ok_or_else(|| {
            RadioError::Platform(format!("unexpected radio state '{}'", out.trim()))
        })
    }

    async fn set_radio_enabled(&self, enabled: bool) -> Result<bool, RadioError> {
        let arg = if enabled { "on" } else { "off" };
        self.run(&["radio", "wifi", arg]).await?;
        Ok(true)
    }

    async fn has_validated_connectivity(&self) -> bool {
        match self.run(&["networking", "connectivity", "check"]).await {
            Ok(out) => is_full_connectivity(&out),
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "nmcli"
    }
}

/// Parse `nmcli radio wifi` output.
fn parse_radio_state(output: &str) -> Option<bool> {
    match output.trim() {
        "enabled" => Some(true),
        "disabled" => Some(false),
        _ => None,
    }
}

/// Only "full" means the network reaches the internet; "limited" and
/// "portal" do not.
fn is_full_connectivity(output: &str) -> bool {
    output.trim() == "full"
}

fn is_permission_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not authorized") || lower.contains("permission denied")
}
