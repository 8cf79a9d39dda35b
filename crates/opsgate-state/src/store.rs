//! StateStore — redb-backed persistence for probe runs and audit records.
//!
//! Both logs are append-only: a monotonic sequence number is claimed from
//! the counter table inside the same write transaction as the insert, so
//! append order is total and survives restarts. Supports on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROBE_RUNS).map_err(map_err!(Table))?;
        txn.open_table(AUDIT).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Probe runs ─────────────────────────────────────────────────

    /// Append one probe run. Returns the assigned sequence number.
    pub fn append_probe_run(&self, run: &ProbeRun) -> StateResult<u64> {
        let value = serde_json::to_vec(run).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            seq = next_seq(&mut counters, COUNTER_PROBE_RUNS)?;
            let mut table = txn.open_table(PROBE_RUNS).map_err(map_err!(Table))?;
            let key = probe_run_key(&run.probe_key, seq);
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(probe_key = %run.probe_key, seq, ok = run.ok, "probe run recorded");
        Ok(seq)
    }

    /// The most recent run for a probe key, by append order.
    pub fn latest_run_for(&self, probe_key: &str) -> StateResult<Option<ProbeRun>> {
        let (start, end) = key_bounds(probe_key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROBE_RUNS).map_err(map_err!(Table))?;
        let mut range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let run: ProbeRun =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// Run history for a probe key, most recent first.
    pub fn probe_history(&self, probe_key: &str, limit: usize) -> StateResult<Vec<ProbeRun>> {
        let (start, end) = key_bounds(probe_key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROBE_RUNS).map_err(map_err!(Table))?;
        let range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?;
        let mut results = Vec::new();
        for entry in range.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let run: ProbeRun =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(run);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Derive the freshness of a probe's latest result.
    ///
    /// Staleness compares `now - finished_at` to the probe's configured
    /// cutoff; a probe with no recorded runs is `NeverRun`.
    pub fn freshness(
        &self,
        probe_key: &str,
        stale_after_seconds: u64,
        now_ms: u64,
    ) -> StateResult<Freshness> {
        match self.latest_run_for(probe_key)? {
            None => Ok(Freshness::NeverRun),
            Some(run) => {
                let age_seconds = now_ms.saturating_sub(run.finished_at_ms) / 1000;
                if age_seconds > stale_after_seconds {
                    Ok(Freshness::Stale { age_seconds })
                } else {
                    Ok(Freshness::Fresh { age_seconds })
                }
            }
        }
    }

    // ── Audit trail ────────────────────────────────────────────────

    /// Append one audit record. Returns the assigned sequence number.
    ///
    /// Callers must treat a failure here as fatal for the surrounding
    /// action: an unaudited privileged action is worse than a failed one.
    pub fn append_audit(&self, record: &AuditRecord) -> StateResult<u64> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            seq = next_seq(&mut counters, COUNTER_AUDIT)?;
            let mut table = txn.open_table(AUDIT).map_err(map_err!(Table))?;
            table
                .insert(seq_key(seq).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq, actor = %record.actor, target = %record.target, ok = record.ok, "audit record appended");
        Ok(seq)
    }

    /// Audit records, most recent first.
    pub fn list_audit(&self, limit: usize) -> StateResult<Vec<AuditRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AUDIT).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: AuditRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

/// Claim the next sequence number for a named counter.
fn next_seq(
    counters: &mut redb::Table<'_, &'static str, u64>,
    name: &str,
) -> StateResult<u64> {
    let current = counters
        .get(name)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    let next = current + 1;
    counters.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Half-open key range covering all runs of one probe key.
/// `;` is the successor of the `:` separator in byte order.
fn key_bounds(probe_key: &str) -> (String, String) {
    (format!("{probe_key}:"), format!("{probe_key};"))
}
