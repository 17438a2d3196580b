use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RelayError, Result};

/// Shortest interval the periodic drain may run at.
pub const MIN_DRAIN_INTERVAL_MINS: u32 = 1;

/// Top-level configuration for the relay.
///
/// Loaded from `~/.callrelay/config.toml` by default. Each section maps onto
/// one engine concern; the engine itself only ever sees the derived value
/// structs, never the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub format: FormatConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing or
    /// cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite queue and the outbox.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.callrelay/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Radio and connectivity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Longest wait for validated connectivity after powering the radio up.
    pub connect_timeout_ms: u64,
    /// Interval between connectivity probes while waiting.
    pub poll_interval_ms: u64,
    /// Idle time after the last event before the radio is powered down.
    pub radio_off_delay_secs: u64,
    /// Radio control backend: "none" or "nmcli".
    pub radio_backend: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 35_000,
            poll_interval_ms: 1_500,
            radio_off_delay_secs: 180,
            radio_backend: "none".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn radio_off_delay(&self) -> Duration {
        Duration::from_secs(self.radio_off_delay_secs)
    }
}

/// Immediate and consolidated delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Window in which repeated missed-call signals for one caller collapse.
    pub debounce_window_ms: u64,
    /// Minutes between periodic queue drains.
    pub drain_interval_mins: u32,
    /// Subject line for single-event deliveries.
    pub immediate_subject: String,
    /// Subject line for consolidated queue deliveries.
    pub consolidated_subject: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 10_000,
            drain_interval_mins: 30,
            immediate_subject: "SMS/Call notification".to_string(),
            consolidated_subject: "SMS/Call report (resend)".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// Drain interval, floored at [`MIN_DRAIN_INTERVAL_MINS`].
    pub fn drain_interval(&self) -> Duration {
        let mins = self.drain_interval_mins.max(MIN_DRAIN_INTERVAL_MINS);
        Duration::from_secs(u64::from(mins) * 60)
    }
}

/// Delivery channel switches and destinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Send the HTML notification to `email_recipients`.
    pub email_enabled: bool,
    /// Comma-separated list of addresses.
    pub email_recipients: String,
    /// Send the plain-text notification to `plain_text_recipients`.
    pub plain_text_enabled: bool,
    /// Comma-separated list of gateway addresses.
    pub plain_text_recipients: String,
}

impl ChannelsConfig {
    /// Recipients of the primary channel, or `None` when it should not send.
    pub fn email_target(&self) -> Option<&str> {
        active_target(self.email_enabled, &self.email_recipients)
    }

    /// Recipients of the plain-text channel, or `None` when it should not send.
    pub fn plain_text_target(&self) -> Option<&str> {
        active_target(self.plain_text_enabled, &self.plain_text_recipients)
    }
}

fn active_target(enabled: bool, recipients: &str) -> Option<&str> {
    let trimmed = recipients.trim();
    if enabled && !trimmed.is_empty() {
        Some(trimmed)
    } else {
        None
    }
}

/// Rendering settings for delivered notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Fixed UTC offset used when printing occurrence times.
    pub utc_offset_minutes: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.general.data_dir, "~/.callrelay/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.network.connect_timeout_ms, 35_000);
        assert_eq!(config.network.poll_interval_ms, 1_500);
        assert_eq!(config.network.radio_off_delay_secs, 180);
        assert_eq!(config.network.radio_backend, "none");
        assert_eq!(config.dispatch.debounce_window_ms, 10_000);
        assert_eq!(config.dispatch.drain_interval_mins, 30);
        assert!(!config.channels.email_enabled);
        assert_eq!(config.format.utc_offset_minutes, 0);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/var/lib/callrelay"
log_level = "debug"

[network]
connect_timeout_ms = 20000
poll_interval_ms = 500
radio_off_delay_secs = 300
radio_backend = "nmcli"

[dispatch]
debounce_window_ms = 5000
drain_interval_mins = 15

[channels]
email_enabled = true
email_recipients = "me@example.com, you@example.com"
plain_text_enabled = false

[format]
utc_offset_minutes = 480
"#;
        let file = create_temp_config(content);
        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/callrelay");
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(20));
        assert_eq!(config.network.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.network.radio_off_delay(), Duration::from_secs(300));
        assert_eq!(config.network.radio_backend, "nmcli");
        assert_eq!(config.dispatch.debounce_window(), Duration::from_secs(5));
        assert_eq!(config.dispatch.drain_interval(), Duration::from_secs(15 * 60));
        assert_eq!(
            config.channels.email_target(),
            Some("me@example.com, you@example.com")
        );
        assert_eq!(config.channels.plain_text_target(), None);
        assert_eq!(config.format.utc_offset_minutes, 480);
        // Unset fields keep their defaults.
        assert_eq!(config.dispatch.immediate_subject, "SMS/Call notification");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[general]\nlog_level = \"warn\"\n");
        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.network.connect_timeout_ms, 35_000);
        assert_eq!(config.dispatch.drain_interval_mins, 30);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(RelayConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = RelayConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.callrelay/data");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = RelayConfig::default();
        config.channels.email_enabled = true;
        config.channels.email_recipients = "ops@example.com".to_string();
        config.save(&path).unwrap();

        let reloaded = RelayConfig::load(&path).unwrap();
        assert_eq!(reloaded.channels.email_target(), Some("ops@example.com"));
        assert_eq!(reloaded.network.radio_backend, "none");
    }

    #[test]
    fn test_drain_interval_floor() {
        let dispatch = DispatchConfig {
            drain_interval_mins: 0,
            ..DispatchConfig::default()
        };
        assert_eq!(dispatch.drain_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_channel_target_requires_enabled_and_recipients() {
        let channels = ChannelsConfig {
            email_enabled: true,
            email_recipients: "   ".to_string(),
            plain_text_enabled: false,
            plain_text_recipients: "gateway@example.com".to_string(),
        };
        assert_eq!(channels.email_target(), None);
        assert_eq!(channels.plain_text_target(), None);
    }
}
