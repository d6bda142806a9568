//! Job lifecycle, worker runtime and control plane for jobq.
//!
//! All coordination between workers goes through the store: there is no
//! in-process locking, and any number of worker processes may share one queue.

pub mod control;
pub mod error;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{ControlPlane, ShutdownReport, StatusReport};
pub use error::{QueueError, QueueResult};
pub use queue::JobQueue;
pub use worker::{Worker, WorkerSettings, watch_stop_signals};
