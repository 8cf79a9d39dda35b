//! opsgate-helper — the privileged-action execution boundary.
//!
//! The console process never runs `systemctl` or `docker` itself. It sends
//! one newline-delimited JSON request over a unix domain socket to a small
//! root-owned helper daemon, which re-validates the request against its own
//! allowlist before executing anything. Both processes load the same config
//! file; neither trusts the other's validation.

pub mod allowlist;
pub mod client;
pub mod error;
pub mod protocol;
pub mod service;

pub use allowlist::{Allowlist, Denial};
pub use client::{HelperClient, HelperOutcome};
pub use error::{HelperError, HelperResult};
pub use protocol::{HelperRequest, HelperResponse};
pub use service::HelperService;
