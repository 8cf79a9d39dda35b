//! opsgate-scheduler — the tick-driven probe scheduler.
//!
//! Owns the per-key run cadence: which probes are due, which are already
//! running, and when the next launch may happen. Results only ever reach
//! readers through the state store; the scheduler itself exposes no
//! status queries beyond what it needs for its own bookkeeping.

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::ProbeScheduler;
