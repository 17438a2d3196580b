//! Periodic drain of the durable queue.
//!
//! Runs a consolidated retry on a fixed interval regardless of new-event
//! activity, so anything the immediate path failed to send is eventually
//! delivered.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::drain::DrainOutcome;
use crate::engine::RelayEngine;
use crate::shutdown::ShutdownSignal;

/// Background loop that drains the queue every `interval`.
pub struct DrainScheduler {
    engine: Arc<RelayEngine>,
    interval: Duration,
    shutdown: ShutdownSignal,
}

impl DrainScheduler {
    pub fn new(engine: Arc<RelayEngine>, interval: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Drain once per interval until shutdown. The first drain happens one
    /// interval after start.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("Drain scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.run_cycle().await,
            }
        }
    }

    /// One scheduled cycle: drain, then push the radio-off deadline out again.
    pub async fn run_cycle(&self) {
        match self.engine.drain_now().await {
            DrainOutcome::Empty => debug!("Scheduled drain: queue empty"),
            DrainOutcome::Delivered { count } => info!(count, "Scheduled drain delivered events"),
            DrainOutcome::Failed { count, reason } => {
                warn!(count, reason = %reason, "Scheduled drain failed, will retry next interval")
            }
            DrainOutcome::Skipped => debug!("Scheduled drain skipped"),
        }
        self.engine.network().reset_idle_schedule();
    }
}
