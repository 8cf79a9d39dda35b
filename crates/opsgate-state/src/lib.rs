//! opsgate-state — embedded store for probe history and the audit trail.
//!
//! Backed by [redb](https://docs.rs/redb). Two append-only logs live here:
//! probe runs (keyed `{probe_key}:{seq}`) and audit records (keyed `{seq}`),
//! with a shared counter table assigning monotonic sequence numbers inside
//! the same write transaction as the append. Nothing in the serving path
//! updates or deletes a row once written.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and safe for one writer per probe key with arbitrary concurrent readers.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
