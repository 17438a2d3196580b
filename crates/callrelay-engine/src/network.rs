//! Radio power and connectivity management.
//!
//! The controller owns the observable radio state and the single armed
//! "power radio off" action. Re-arming always replaces the previous action,
//! which turns it into an idle timer measured from the most recent activity.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use callrelay_core::config::NetworkConfig;
use callrelay_core::types::RadioState;

use crate::error::{DispatchError, RadioError};
use crate::radio::RadioControl;
use crate::shutdown::ShutdownSignal;

/// Timing knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Longest wait for validated connectivity after a power-up request.
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    /// Idle time after the last activity before the radio is powered down.
    pub radio_off_delay: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for NetworkSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            radio_off_delay: config.radio_off_delay(),
        }
    }
}

struct ArmedRadioOff {
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Manages the radio around delivery attempts.
pub struct NetworkController {
    radio: Arc<dyn RadioControl>,
    settings: NetworkSettings,
    state: Arc<Mutex<RadioState>>,
    radio_off: Mutex<Option<ArmedRadioOff>>,
    shutdown: ShutdownSignal,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NetworkController {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        settings: NetworkSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            radio,
            settings,
            state: Arc::new(Mutex::new(RadioState::Off)),
            radio_off: Mutex::new(None),
            shutdown,
        }
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Last observed radio state.
    pub fn radio_state(&self) -> RadioState {
        *lock(&self.state)
    }

    fn set_state(&self, state: RadioState) {
        *lock(&self.state) = state;
    }

    /// Probe connectivity and update the observed state.
    ///
    /// A failed probe after the link was up drops the state back to
    /// `Enabling`: the radio is still powered but the link is gone.
    pub async fn has_validated_connectivity(&self) -> bool {
        let connected = self.radio.has_validated_connectivity().await;
        let mut state = lock(&self.state);
        if connected {
            *state = RadioState::On;
        } else if *state == RadioState::On {
            debug!(radio = %self.radio.name(), "Connectivity lost");
            *state = RadioState::Enabling;
        }
        connected
    }

    /// Request radio power-up if it is off. Does not wait for connectivity.
    pub async fn ensure_radio_on(&self) -> Result<(), RadioError> {
        if self.radio.is_radio_enabled().await? {
            debug!(radio = %self.radio.name(), "Radio already enabled");
            if self.radio_state() == RadioState::Off {
                self.set_state(RadioState::Enabling);
            }
            return Ok(());
        }

        info!(radio = %self.radio.name(), "Enabling radio");
        if !self.radio.set_radio_enabled(true).await? {
            return Err(RadioError::Platform(
                "platform refused to enable the radio".to_string(),
            ));
        }
        self.set_state(RadioState::Enabling);
        Ok(())
    }

    /// Poll for validated connectivity until it appears or `timeout` elapses.
    ///
    /// Returns `false` on timeout and when shutdown is signalled mid-wait.
    pub async fn await_connectivity(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let started = Instant::now();
        let poll = async {
            loop {
                if self.has_validated_connectivity().await {
                    return true;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, poll) => match result {
                Ok(connected) => {
                    debug!(waited_ms = started.elapsed().as_millis() as u64, "Connectivity validated");
                    connected
                }
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Connectivity not validated within timeout");
                    false
                }
            },
            _ = self.shutdown.wait() => {
                info!("Connectivity wait interrupted by shutdown");
                false
            }
        }
    }

    /// Make sure validated connectivity is present, powering the radio up and
    /// waiting for it when needed.
    pub async fn ensure_network_ready(&self) -> Result<(), DispatchError> {
        if self.has_validated_connectivity().await {
            return Ok(());
        }

        self.ensure_radio_on().await?;

        if self
            .await_connectivity(self.settings.connect_timeout, self.settings.poll_interval)
            .await
        {
            Ok(())
        } else {
            Err(DispatchError::NetworkUnavailable(format!(
                "no validated connectivity within {}ms",
                self.settings.connect_timeout.as_millis()
            )))
        }
    }

    /// Arm the deferred radio-off action, replacing any armed one.
    pub fn schedule_radio_off(&self, delay: Duration) {
        let radio = Arc::clone(&self.radio);
        let state = Arc::clone(&self.state);
        let deadline = Instant::now() + delay;

        let mut slot = lock(&self.radio_off);
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Detached so a later re-arm cannot abort a power-down in progress.
            tokio::spawn(power_down(radio, state));
        });
        *slot = Some(ArmedRadioOff { deadline, handle });
        debug!(delay_secs = delay.as_secs(), "Radio-off scheduled");
    }

    /// Disarm the deferred radio-off action, if any.
    pub fn cancel_radio_off(&self) {
        if let Some(previous) = lock(&self.radio_off).take() {
            previous.handle.abort();
            debug!("Radio-off cancelled");
        }
    }

    /// Push the radio-off deadline to `radio_off_delay` from now.
    ///
    /// Cancel and re-arm happen under one lock in [`schedule_radio_off`](Self::schedule_radio_off).
    pub fn reset_idle_schedule(&self) {
        self.schedule_radio_off(self.settings.radio_off_delay);
    }

    /// Deadline of the armed radio-off action, if one is still pending.
    pub fn radio_off_deadline(&self) -> Option<Instant> {
        lock(&self.radio_off)
            .as_ref()
            .filter(|armed| !armed.handle.is_finished())
            .map(|armed| armed.deadline)
    }

    pub fn is_radio_off_armed(&self) -> bool {
        self.radio_off_deadline().is_some()
    }
}

impl Drop for NetworkController {
    fn drop(&mut self) {
        if let Some(armed) = lock(&self.radio_off).take() {
            armed.handle.abort();
        }
    }
}

/// Body of the deferred action: power down only if the radio is on.
async fn power_down(radio: Arc<dyn RadioControl>, state: Arc<Mutex<RadioState>>) {
    match radio.is_radio_enabled().await {
        Ok(false) => {
            debug!("Idle radio-off fired; radio already off");
            *lock(&state) = RadioState::Off;
        }
        Ok(true) => match radio.set_radio_enabled(false).await {
            Ok(true) => {
                *lock(&state) = RadioState::Off;
                info!(radio = %radio.name(), "Radio powered off after idle period");
            }
            Ok(false) => debug!(radio = %radio.name(), "Platform refused radio power-off"),
            Err(RadioError::NotPermitted) => {
                debug!(radio = %radio.name(), "Radio control not permitted; leaving radio on")
            }
            Err(e) => warn!(radio = %radio.name(), error = %e, "Failed to power radio off"),
        },
        Err(e) => warn!(radio = %radio.name(), error = %e, "Failed to read radio state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;

    fn settings() -> NetworkSettings {
        NetworkSettings {
            connect_timeout: Duration::from_secs(35),
            poll_interval: Duration::from_millis(1_500),
            radio_off_delay: Duration::from_secs(180),
        }
    }

    fn controller(radio: Arc<MockRadio>) -> NetworkController {
        NetworkController::new(radio, settings(), ShutdownSignal::new())
    }

    /// Let spawned timer tasks observe the advanced clock.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    // =========================================================================
    // ensure_radio_on / await_connectivity
    // =========================================================================

    #[tokio::test]
    async fn test_ensure_radio_on_noop_when_enabled() {
        let radio = Arc::new(MockRadio::online());
        let network = controller(Arc::clone(&radio));
        network.ensure_radio_on().await.unwrap();
        assert_eq!(radio.enable_requests(), 0);
    }

    #[tokio::test]
    async fn test_ensure_radio_on_enables_when_off() {
        let radio = Arc::new(MockRadio::connects_on_enable());
        let network = controller(Arc::clone(&radio));
        network.ensure_radio_on().await.unwrap();
        assert_eq!(radio.enable_requests(), 1);
        assert_eq!(network.radio_state(), RadioState::Enabling);
    }

    #[tokio::test]
    async fn test_ensure_radio_on_not_permitted() {
        let radio = Arc::new(MockRadio::offline().with_control_permitted(false));
        let network = controller(Arc::clone(&radio));
        let err = network.ensure_radio_on().await.unwrap_err();
        assert!(matches!(err, RadioError::NotPermitted));
        assert_eq!(network.radio_state(), RadioState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_connectivity_times_out() {
        let radio = Arc::new(MockRadio::offline());
        let network = controller(Arc::clone(&radio));

        let started = Instant::now();
        let connected = network
            .await_connectivity(Duration::from_secs(35), Duration::from_millis(1_500))
            .await;

        assert!(!connected);
        assert!(started.elapsed() >= Duration::from_secs(35));
        // One probe at t=0 and one per poll interval before the deadline.
        assert_eq!(radio.probe_count(), 24);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_connectivity_sees_late_connection() {
        let radio = Arc::new(MockRadio::offline());
        let network = Arc::new(controller(Arc::clone(&radio)));

        let waiter = tokio::spawn({
            let network = Arc::clone(&network);
            async move {
                network
                    .await_connectivity(Duration::from_secs(35), Duration::from_millis(1_500))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        radio.set_connected(true);

        assert!(waiter.await.unwrap());
        assert_eq!(network.radio_state(), RadioState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_connectivity_interrupted_by_shutdown() {
        let radio = Arc::new(MockRadio::offline());
        let shutdown = ShutdownSignal::new();
        let network = Arc::new(NetworkController::new(
            radio,
            settings(),
            shutdown.clone(),
        ));

        let waiter = tokio::spawn({
            let network = Arc::clone(&network);
            async move {
                network
                    .await_connectivity(Duration::from_secs(35), Duration::from_millis(1_500))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        let before = Instant::now();
        shutdown.trigger();

        assert!(!waiter.await.unwrap());
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_network_ready_connects_after_enable() {
        let radio = Arc::new(MockRadio::connects_on_enable());
        let network = controller(Arc::clone(&radio));
        network.ensure_network_ready().await.unwrap();
        assert_eq!(network.radio_state(), RadioState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_network_ready_reports_unavailable() {
        let radio = Arc::new(MockRadio::offline());
        let network = controller(Arc::clone(&radio));
        let err = network.ensure_network_ready().await.unwrap_err();
        assert!(matches!(err, DispatchError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ensure_network_ready_skips_radio_when_connected() {
        let radio = Arc::new(MockRadio::online());
        let network = controller(Arc::clone(&radio));
        network.ensure_network_ready().await.unwrap();
        assert_eq!(radio.enable_requests(), 0);
        assert_eq!(radio.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_link_leaves_on_state() {
        let radio = Arc::new(MockRadio::online());
        let network = controller(Arc::clone(&radio));
        assert!(network.has_validated_connectivity().await);
        assert_eq!(network.radio_state(), RadioState::On);

        radio.set_connected(false);
        assert!(!network.has_validated_connectivity().await);
        assert_eq!(network.radio_state(), RadioState::Enabling);

        radio.set_connected(true);
        assert!(network.has_validated_connectivity().await);
        assert_eq!(network.radio_state(), RadioState::On);
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_off_state() {
        let radio = Arc::new(MockRadio::offline());
        let network = controller(Arc::clone(&radio));
        assert!(!network.has_validated_connectivity().await);
        assert_eq!(network.radio_state(), RadioState::Off);
    }

    // =========================================================================
    // Idle radio-off timer
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reset_idle_schedule_keeps_single_deadline() {
        let radio = Arc::new(MockRadio::online());
        let network = controller(Arc::clone(&radio));

        for _ in 0..5 {
            network.reset_idle_schedule();
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        let last_call = Instant::now() - Duration::from_secs(10);

        assert_eq!(
            network.radio_off_deadline(),
            Some(last_call + Duration::from_secs(180))
        );

        // Earlier deadlines have passed without powering down.
        tokio::time::advance(Duration::from_secs(165)).await;
        settle().await;
        assert!(radio.is_enabled());
        assert_eq!(radio.disable_requests(), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(!radio.is_enabled());
        assert_eq!(radio.disable_requests(), 1);
        assert_eq!(network.radio_state(), RadioState::Off);
        assert!(!network.is_radio_off_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_radio_off_disarms() {
        let radio = Arc::new(MockRadio::online());
        let network = controller(Arc::clone(&radio));

        network.schedule_radio_off(Duration::from_secs(60));
        assert!(network.is_radio_off_armed());
        network.cancel_radio_off();
        assert!(!network.is_radio_off_armed());

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(radio.is_enabled());

        // Cancelling with nothing armed is fine.
        network.cancel_radio_off();
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_noop_when_control_not_permitted() {
        let radio = Arc::new(MockRadio::always_online());
        let network = controller(Arc::clone(&radio));

        network.schedule_radio_off(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert!(radio.is_enabled());
        assert!(!network.is_radio_off_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_skips_when_already_off() {
        let radio = Arc::new(MockRadio::offline());
        let network = controller(Arc::clone(&radio));

        network.schedule_radio_off(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(radio.disable_requests(), 0);
    }
}
