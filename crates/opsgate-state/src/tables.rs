//! redb table definitions for the opsgate state store.
//!
//! String keys, JSON-serialized values. Sequence numbers are zero-padded to
//! 20 digits so lexicographic key order equals append order.

use redb::TableDefinition;

/// Probe runs keyed by `{probe_key}:{seq:020}`.
pub const PROBE_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("probe_runs");

/// Audit records keyed by `{seq:020}`.
pub const AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("audit");

/// Monotonic counters keyed by counter name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter names.
pub const COUNTER_PROBE_RUNS: &str = "probe_runs";
pub const COUNTER_AUDIT: &str = "audit";

/// Render a sequence number as a fixed-width, sortable key segment.
pub fn seq_key(seq: u64) -> String {
    format!("{seq:020}")
}

/// Render the composite key for one probe run.
pub fn probe_run_key(probe_key: &str, seq: u64) -> String {
    format!("{probe_key}:{}", seq_key(seq))
}
