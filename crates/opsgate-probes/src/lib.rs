//! opsgate-probes — the probe runner.
//!
//! Executes one [`ProbeDefinition`](opsgate_core::ProbeDefinition) and
//! produces one [`ProbeRun`](opsgate_state::ProbeRun). Four probe kinds:
//!
//! - `tcp_check` — bounded connect to host:port
//! - `http_check` — bounded GET, ok iff the status matches the expectation
//! - `sms_health` — composite: provider TCP + HTTP, then optional
//!   database-backed signals (skipped when no DSN is configured)
//! - `nid_health` — composite: gateway TCP + base/requestData/getData HTTP
//!
//! Expected network failures (refusals, timeouts, bad statuses) are *data*:
//! they become failed steps, never errors. Only malformed definitions
//! produce `status = "error"` runs — and even those never panic or
//! propagate out of [`ProbeRunner::run`].

pub mod net;
pub mod runner;
pub mod signals;

pub use net::{HttpExpectation, HttpProbeResult, TcpProbeResult, http_probe, tcp_probe};
pub use runner::{ProbeExecutor, ProbeRunner};
