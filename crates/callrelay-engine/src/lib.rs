//! Store-and-forward dispatch engine.
//!
//! Takes locally observed events (messages and missed calls), tries to
//! deliver each one immediately, keeps failures in a durable queue and
//! drains that queue periodically as one consolidated notification. The
//! network radio is powered up on demand and powered down after an idle
//! period.

pub mod call_state;
pub mod debounce;
pub mod dispatch;
pub mod drain;
pub mod engine;
pub mod error;
pub mod format;
pub mod mock;
pub mod network;
pub mod radio;
pub mod scheduler;
pub mod shutdown;
pub mod transport;

pub use call_state::{CallTracker, LinePhase, LineSession};
pub use debounce::MissedCallDebouncer;
pub use dispatch::Dispatcher;
pub use drain::{ConsolidatedSender, DrainOutcome};
pub use engine::{DispatchSettings, EngineHandle, IngestOutcome, RelayEngine};
pub use error::{DispatchError, RadioError, TransportError};
pub use format::{MessageFormatter, Render};
pub use network::{NetworkController, NetworkSettings};
pub use radio::RadioControl;
pub use scheduler::DrainScheduler;
pub use shutdown::ShutdownSignal;
pub use transport::{Notification, Transport};
