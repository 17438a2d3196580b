//! Ingestion coordination: the engine's public surface.
//!
//! Every accepted event re-arms the idle radio timer, gets one immediate
//! delivery attempt, and lands in the durable queue if that attempt fails.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use callrelay_core::config::RelayConfig;
use callrelay_core::error::RelayError;
use callrelay_core::types::{Event, RawEvent, SendStatus};
use callrelay_storage::EventQueue;

use crate::call_state::CallTracker;
use crate::debounce::MissedCallDebouncer;
use crate::dispatch::Dispatcher;
use crate::drain::{ConsolidatedSender, DrainOutcome};
use crate::format::MessageFormatter;
use crate::network::{NetworkController, NetworkSettings};
use crate::radio::RadioControl;
use crate::scheduler::DrainScheduler;
use crate::shutdown::ShutdownSignal;
use crate::transport::Transport;

/// Delivery behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub debounce_window: Duration,
    pub drain_interval: Duration,
    pub immediate_subject: String,
    pub consolidated_subject: String,
    /// Offset used when printing occurrence times.
    pub utc_offset_minutes: i32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for DispatchSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            debounce_window: config.dispatch.debounce_window(),
            drain_interval: config.dispatch.drain_interval(),
            immediate_subject: config.dispatch.immediate_subject.clone(),
            consolidated_subject: config.dispatch.consolidated_subject.clone(),
            utc_offset_minutes: config.format.utc_offset_minutes,
        }
    }
}

/// What happened to one raw event handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Delivered by the immediate attempt.
    Delivered,
    /// Immediate delivery failed; the event is in the durable queue.
    Queued { id: i64, status: SendStatus },
    /// Immediate delivery failed and the queue insert failed too.
    Lost { status: SendStatus },
    /// A duplicate missed call inside the debounce window.
    Debounced,
    /// A call-state signal that did not complete a missed call.
    NoEvent,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Store-and-forward dispatch engine.
pub struct RelayEngine {
    queue: EventQueue,
    network: Arc<NetworkController>,
    dispatcher: Dispatcher,
    drainer: ConsolidatedSender,
    debouncer: MissedCallDebouncer,
    calls: CallTracker,
    settings: DispatchSettings,
    shutdown: ShutdownSignal,
    ingest_tx: Mutex<Option<mpsc::UnboundedSender<RawEvent>>>,
    ingest_rx: Mutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
}

impl RelayEngine {
    pub fn new(
        queue: EventQueue,
        radio: Arc<dyn RadioControl>,
        transport: Arc<dyn Transport>,
        network_settings: NetworkSettings,
        settings: DispatchSettings,
    ) -> Self {
        let shutdown = ShutdownSignal::new();
        let network = Arc::new(NetworkController::new(
            radio,
            network_settings,
            shutdown.clone(),
        ));
        let formatter = MessageFormatter::from_offset_minutes(settings.utc_offset_minutes);
        let dispatcher = Dispatcher::new(
            Arc::clone(&network),
            Arc::clone(&transport),
            formatter,
            settings.immediate_subject.clone(),
        );
        let drainer = ConsolidatedSender::new(
            queue.clone(),
            Arc::clone(&network),
            transport,
            Arc::new(formatter),
            settings.consolidated_subject.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            queue,
            network,
            dispatcher,
            drainer,
            debouncer: MissedCallDebouncer::new(settings.debounce_window),
            calls: CallTracker::new(),
            settings,
            shutdown,
            ingest_tx: Mutex::new(Some(tx)),
            ingest_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn network(&self) -> &Arc<NetworkController> {
        &self.network
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Hand a raw event to the ingestion worker.
    ///
    /// Events submitted before [`start`](Self::start) are buffered.
    pub fn submit_event(&self, raw: RawEvent) -> Result<(), RelayError> {
        let tx = lock(&self.ingest_tx);
        match tx.as_ref() {
            Some(tx) => tx.send(raw).map_err(|_| RelayError::ShuttingDown),
            None => Err(RelayError::ShuttingDown),
        }
    }

    /// Classify and dispatch one raw event on the caller's task.
    pub async fn process_event(&self, raw: RawEvent) -> IngestOutcome {
        match self.classify(raw) {
            Ok(event) => self.dispatch_event(event).await,
            Err(outcome) => outcome,
        }
    }

    /// Run one consolidated drain. `true` means nothing is left to retry.
    pub async fn trigger_drain(&self) -> bool {
        self.drain_now().await.is_success()
    }

    /// Run one consolidated drain and report the detailed outcome.
    pub async fn drain_now(&self) -> DrainOutcome {
        self.drainer.drain().await
    }

    /// Number of events waiting in the durable queue.
    pub fn pending_count(&self) -> Result<u64, RelayError> {
        self.queue.pending_count()
    }

    /// Stop accepting events and interrupt waits in progress.
    pub fn shutdown(&self) {
        self.close_input();
        self.shutdown.trigger();
    }

    /// Stop accepting new events; already submitted ones are still processed.
    pub fn close_input(&self) {
        if lock(&self.ingest_tx).take().is_some() {
            debug!("Ingestion input closed");
        }
    }

    /// Spawn the ingestion worker and the periodic drain.
    pub fn start(self: &Arc<Self>) -> Result<EngineHandle, RelayError> {
        let rx = lock(&self.ingest_rx)
            .take()
            .ok_or(RelayError::AlreadyStarted)?;

        // A radio left on before start still gets powered down when idle.
        self.network.reset_idle_schedule();

        let worker = tokio::spawn(ingest_loop(Arc::clone(self), rx));
        let scheduler = DrainScheduler::new(
            Arc::clone(self),
            self.settings.drain_interval,
            self.shutdown.clone(),
        );
        let scheduler = tokio::spawn(async move { scheduler.run().await });

        info!(
            drain_interval_secs = self.settings.drain_interval.as_secs(),
            "Relay engine started"
        );
        Ok(EngineHandle {
            engine: Arc::clone(self),
            worker,
            scheduler,
        })
    }

    // =========================================================================
    // Coordination
    // =========================================================================

    fn classify(&self, raw: RawEvent) -> Result<Event, IngestOutcome> {
        match raw {
            RawEvent::Message {
                origin,
                body,
                line_id,
                line_label,
                occurred_at,
            } => Ok(Event::message(origin, body, occurred_at, line_label, line_id)),
            RawEvent::MissedCall {
                origin,
                line_id,
                line_label,
                occurred_at,
            } => self.accept_missed_call(origin, line_id, line_label, occurred_at),
            RawEvent::CallState {
                line_id,
                line_label,
                signal,
                occurred_at,
            } => match self.calls.observe(line_id, &signal) {
                Some(number) => self.accept_missed_call(number, line_id, line_label, occurred_at),
                None => {
                    debug!(line_id, phase = ?self.calls.phase(line_id), "Call state updated");
                    Err(IngestOutcome::NoEvent)
                }
            },
        }
    }

    fn accept_missed_call(
        &self,
        origin: String,
        line_id: i64,
        line_label: String,
        occurred_at: DateTime<Utc>,
    ) -> Result<Event, IngestOutcome> {
        if self.debouncer.accept(line_id, &origin) {
            Ok(Event::missed_call(origin, occurred_at, line_label, line_id))
        } else {
            Err(IngestOutcome::Debounced)
        }
    }

    /// Immediate attempt, falling back to the durable queue.
    pub async fn dispatch_event(&self, event: Event) -> IngestOutcome {
        self.network.reset_idle_schedule();

        let status = self.dispatcher.try_deliver_now(&event).await;
        if status == SendStatus::Delivered {
            // The radio is up; flush any backlog while it lasts.
            let backlog = self.drainer.drain_if_idle().await;
            debug!(?backlog, "Opportunistic drain finished");
            return IngestOutcome::Delivered;
        }

        match self.enqueue(&event) {
            Some(id) => {
                info!(event_id = id, kind = %event.kind, status = %status, "Event queued for retry");
                IngestOutcome::Queued { id, status }
            }
            None => IngestOutcome::Lost { status },
        }
    }

    fn enqueue(&self, event: &Event) -> Option<i64> {
        match self.queue.insert(event) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    kind = %event.kind,
                    origin = %event.origin,
                    occurred_at = %event.occurred_at,
                    error = %e,
                    "Event lost: not delivered and could not be queued"
                );
                None
            }
        }
    }

    /// Queue a raw event without a delivery attempt (used while stopping).
    fn persist_unsent(&self, raw: RawEvent) {
        if let Ok(event) = self.classify(raw) {
            if let Some(id) = self.enqueue(&event) {
                info!(event_id = id, kind = %event.kind, "Event queued during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("settings", &self.settings)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

async fn ingest_loop(engine: Arc<RelayEngine>, mut rx: mpsc::UnboundedReceiver<RawEvent>) {
    loop {
        tokio::select! {
            biased;
            _ = engine.shutdown.wait() => break,
            next = rx.recv() => match next {
                Some(raw) => {
                    let outcome = engine.process_event(raw).await;
                    debug!(?outcome, "Event processed");
                }
                None => {
                    debug!("Ingestion channel closed");
                    break;
                }
            },
        }
    }

    rx.close();
    while let Ok(raw) = rx.try_recv() {
        engine.persist_unsent(raw);
    }
    debug!("Ingestion worker stopped");
}

/// Running engine tasks.
pub struct EngineHandle {
    engine: Arc<RelayEngine>,
    worker: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    pub fn submit(&self, raw: RawEvent) -> Result<(), RelayError> {
        self.engine.submit_event(raw)
    }

    /// Signal both tasks to stop. Use [`join`](Self::join) to wait for them.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }

    /// Process everything already submitted, run a final drain, then stop.
    pub async fn finish(self) -> DrainOutcome {
        self.engine.close_input();
        if let Err(e) = self.worker.await {
            error!(error = %e, "Ingestion worker failed");
        }
        let outcome = self.engine.drain_now().await;
        self.engine.shutdown.trigger();
        if let Err(e) = self.scheduler.await {
            error!(error = %e, "Drain scheduler failed");
        }
        self.engine.network.cancel_radio_off();
        outcome
    }

    /// Wait for both tasks to exit.
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            error!(error = %e, "Ingestion worker failed");
        }
        if let Err(e) = self.scheduler.await {
            error!(error = %e, "Drain scheduler failed");
        }
        self.engine.network.cancel_radio_off();
        if let Ok(pending) = self.engine.pending_count() {
            if pending > 0 {
                warn!(count = pending, "Stopped with undelivered events in the queue");
            }
        }
    }
}
