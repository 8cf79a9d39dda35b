//! The probe scheduler — tick loop, due tracking, and the per-key claim set.
//!
//! Each enabled probe cycles `Idle → Due → Running → Idle`. A key is due
//! when it has never started or its interval has elapsed since the last
//! launch. The claim set enforces at most one in-flight run per key: a
//! slow run simply absorbs the ticks that come due while it executes, and
//! `run_now` during a run is refused rather than queued.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use opsgate_core::{ProbeDefinition, ProbeRegistry, epoch_ms};
use opsgate_probes::ProbeExecutor;
use opsgate_state::{ProbeRun, StateStore};

use crate::error::{SchedulerError, SchedulerResult};

/// Drives probe runs against the registry and persists every result.
///
/// Generic over the executor so tests can substitute one; the daemon uses
/// [`ProbeRunner`](opsgate_probes::ProbeRunner). Cheap to clone.
pub struct ProbeScheduler<E> {
    registry: Arc<ProbeRegistry>,
    store: StateStore,
    executor: Arc<E>,
    /// Keys with a run currently in flight.
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Per-key launch times (epoch ms). Owned exclusively by the scheduler.
    last_started: Arc<Mutex<HashMap<String, u64>>>,
}

impl<E> Clone for ProbeScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            store: self.store.clone(),
            executor: Arc::clone(&self.executor),
            in_flight: Arc::clone(&self.in_flight),
            last_started: Arc::clone(&self.last_started),
        }
    }
}

impl<E: ProbeExecutor> ProbeScheduler<E> {
    pub fn new(registry: Arc<ProbeRegistry>, store: StateStore, executor: E) -> Self {
        Self {
            registry,
            store,
            executor: Arc::new(executor),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_started: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// One scheduling pass: launch every enabled probe that is due and not
    /// already running. Returns the number of runs launched.
    pub async fn tick(&self) -> usize {
        self.tick_at(epoch_ms()).await
    }

    /// [`tick`](Self::tick) against an explicit clock, so interval
    /// arithmetic is testable without waiting out real intervals.
    pub async fn tick_at(&self, now_ms: u64) -> usize {
        let mut launched = 0;

        for def in self.registry.enabled() {
            if !self.claim_if_due(def, now_ms).await {
                continue;
            }
            self.launch(def.clone());
            launched += 1;
        }

        if launched > 0 {
            debug!(launched, "tick launched probe runs");
        }
        launched
    }

    /// Run a probe immediately, bypassing the due wait but honoring the
    /// claim. Waits for the run to finish and returns the persisted result.
    pub async fn run_now(&self, key: &str) -> SchedulerResult<ProbeRun> {
        let def = self
            .registry
            .get(key)
            .ok_or_else(|| SchedulerError::UnknownProbe(key.to_string()))?
            .clone();

        if !self.claim(&def.key, epoch_ms()).await {
            return Err(SchedulerError::AlreadyRunning(def.key));
        }

        info!(probe_key = %def.key, "on-demand probe run");
        let run = self.executor.run_probe(&def).await;
        let persisted = self.store.append_probe_run(&run);
        self.release(&def.key).await;
        persisted?;
        Ok(run)
    }

    /// The scheduler loop: tick at a fixed cadence until shutdown.
    ///
    /// In-flight runs launched before the shutdown signal finish on their
    /// own spawned tasks and still persist their results.
    pub async fn run_loop(self, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            probes = self.registry.enabled().count(),
            tick_seconds = tick_interval.as_secs(),
            "probe scheduler starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("probe scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Number of runs currently in flight (all keys).
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Claim the key if its interval has elapsed (or it never started).
    async fn claim_if_due(&self, def: &ProbeDefinition, now_ms: u64) -> bool {
        let due = {
            let last = self.last_started.lock().await;
            match last.get(&def.key) {
                Some(&started_ms) => now_ms >= started_ms + def.interval_seconds * 1000,
                None => true,
            }
        };
        due && self.claim(&def.key, now_ms).await
    }

    /// Take the in-flight claim for a key. False if someone holds it.
    async fn claim(&self, key: &str, now_ms: u64) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(key.to_string()) {
            return false;
        }
        drop(in_flight);
        self.last_started.lock().await.insert(key.to_string(), now_ms);
        true
    }

    async fn release(&self, key: &str) {
        self.in_flight.lock().await.remove(key);
    }

    /// Run a claimed probe on its own task. The task persists the result
    /// and releases the claim; its failure never reaches the tick loop.
    fn launch(&self, def: ProbeDefinition) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let run = scheduler.executor.run_probe(&def).await;
            if !run.ok {
                warn!(
                    probe_key = %def.key,
                    status = %run.status,
                    error = run.error.as_deref().unwrap_or(""),
                    "probe run failed"
                );
            }
            if let Err(e) = scheduler.store.append_probe_run(&run) {
                error!(probe_key = %def.key, error = %e, "failed to persist probe run");
            }
            scheduler.release(&def.key).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use opsgate_core::{ProbeConfig, ProbeParams};

    /// Configurable fake executor recording call and concurrency counts.
    struct FakeExecutor {
        delay: Duration,
        ok: bool,
        calls: Arc<AtomicUsize>,
        current: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
    }

    impl FakeExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ok: true,
                calls: Arc::new(AtomicUsize::new(0)),
                current: Arc::new(AtomicUsize::new(0)),
                max_concurrent: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(delay: Duration) -> Self {
            Self {
                ok: false,
                ..Self::new(delay)
            }
        }
    }

    impl ProbeExecutor for FakeExecutor {
        fn run_probe(
            &self,
            def: &ProbeDefinition,
        ) -> impl std::future::Future<Output = ProbeRun> + Send {
            let key = def.key.clone();
            let delay = self.delay;
            let ok = self.ok;
            let calls = Arc::clone(&self.calls);
            let current = Arc::clone(&self.current);
            let max_concurrent = Arc::clone(&self.max_concurrent);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                current.fetch_sub(1, Ordering::SeqCst);

                let started = epoch_ms();
                ProbeRun {
                    probe_key: key,
                    started_at_ms: started,
                    finished_at_ms: started,
                    ok,
                    status: if ok { "healthy" } else { "degraded" }.to_string(),
                    latency_ms: delay.as_millis() as f64,
                    error: if ok { None } else { Some("synthetic failure".to_string()) },
                    steps: Vec::new(),
                }
            }
        }
    }

    fn registry(keys: &[(&str, bool)]) -> Arc<ProbeRegistry> {
        let configs: Vec<ProbeConfig> = keys
            .iter()
            .map(|(key, enabled)| ProbeConfig {
                key: key.to_string(),
                kind: "tcp_check".to_string(),
                interval_seconds: 60,
                timeout_seconds: 5,
                stale_after_seconds: None,
                enabled: *enabled,
                params: ProbeParams {
                    port: Some(1),
                    ..Default::default()
                },
            })
            .collect();
        Arc::new(ProbeRegistry::from_config(&configs).unwrap())
    }

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn repeated_ticks_launch_each_key_once() {
        let executor = FakeExecutor::new(Duration::from_millis(200));
        let calls = Arc::clone(&executor.calls);
        let max = Arc::clone(&executor.max_concurrent);
        let scheduler = ProbeScheduler::new(registry(&[("a", true)]), store(), executor);

        // Every tick after the first finds the key claimed or not yet due.
        assert_eq!(scheduler.tick().await, 1);
        for _ in 0..5 {
            assert_eq!(scheduler.tick().await, 0);
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(max.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn key_becomes_due_again_once_its_interval_elapses() {
        let executor = FakeExecutor::new(Duration::from_millis(1));
        let calls = Arc::clone(&executor.calls);
        // Registry interval is 60s; drive the clock instead of waiting.
        let scheduler = ProbeScheduler::new(registry(&[("a", true)]), store(), executor);

        let t0 = 1_700_000_000_000u64;
        assert_eq!(scheduler.tick_at(t0).await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.in_flight_count().await, 0);

        // One millisecond short of the interval: still idle.
        assert_eq!(scheduler.tick_at(t0 + 59_999).await, 0);
        // At the interval boundary: due again.
        assert_eq!(scheduler.tick_at(t0 + 60_000).await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The second launch reset the interval from its own start time.
        assert_eq!(scheduler.tick_at(t0 + 60_001).await, 0);
        assert_eq!(scheduler.tick_at(t0 + 120_000).await, 1);
    }

    #[tokio::test]
    async fn tick_skips_disabled_probes() {
        let executor = FakeExecutor::new(Duration::from_millis(1));
        let scheduler = ProbeScheduler::new(
            registry(&[("on", true), ("off", false)]),
            store(),
            executor,
        );
        assert_eq!(scheduler.tick().await, 1);
    }

    #[tokio::test]
    async fn run_now_unknown_key() {
        let executor = FakeExecutor::new(Duration::from_millis(1));
        let scheduler = ProbeScheduler::new(registry(&[("a", true)]), store(), executor);

        let result = scheduler.run_now("nope").await;
        assert!(matches!(result, Err(SchedulerError::UnknownProbe(_))));
    }

    #[tokio::test]
    async fn run_now_during_in_flight_run_is_refused() {
        let executor = FakeExecutor::new(Duration::from_millis(300));
        let calls = Arc::clone(&executor.calls);
        let scheduler = ProbeScheduler::new(registry(&[("a", true)]), store(), executor);

        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = scheduler.run_now("a").await;
        assert!(matches!(result, Err(SchedulerError::AlreadyRunning(_))));

        // The refusal did not queue a second run.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_now_persists_and_returns_the_run() {
        let executor = FakeExecutor::new(Duration::from_millis(1));
        let store = store();
        let scheduler =
            ProbeScheduler::new(registry(&[("a", true)]), store.clone(), executor);

        let run = scheduler.run_now("a").await.unwrap();
        assert!(run.ok);
        assert_eq!(run.probe_key, "a");

        let latest = store.latest_run_for("a").unwrap().unwrap();
        assert_eq!(latest.started_at_ms, run.started_at_ms);
        assert_eq!(scheduler.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn failed_runs_are_persisted_and_release_the_claim() {
        let executor = FakeExecutor::failing(Duration::from_millis(10));
        let store = store();
        let scheduler =
            ProbeScheduler::new(registry(&[("a", true)]), store.clone(), executor);

        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let latest = store.latest_run_for("a").unwrap().unwrap();
        assert!(!latest.ok);
        assert_eq!(latest.status, "degraded");
        assert_eq!(scheduler.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn one_keys_slow_run_does_not_block_others() {
        let executor = FakeExecutor::new(Duration::from_millis(200));
        let max = Arc::clone(&executor.max_concurrent);
        let scheduler = ProbeScheduler::new(
            registry(&[("a", true), ("b", true), ("c", true)]),
            store(),
            executor,
        );

        assert_eq!(scheduler.tick().await, 3);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Different keys do run concurrently.
        assert_eq!(max.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown_signal() {
        let executor = FakeExecutor::new(Duration::from_millis(1));
        let scheduler = ProbeScheduler::new(registry(&[("a", true)]), store(), executor);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            scheduler.run_loop(Duration::from_millis(10), shutdown_rx),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap();
    }
}
