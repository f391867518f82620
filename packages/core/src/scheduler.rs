//! Module scheduler.
//!
//! Drives the background loop: each tick runs every enabled module whose
//! configured schedule is due, then sweeps expired cache entries, so
//! scheduled analyses keep producing fresh results and alerts without an
//! operator calling the API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::sync::Mutex;
use tokio::time;

use crate::metrics::AppMetrics;
use crate::runner::ModuleRunner;
use crate::schedule::Schedule;

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Modules executed this tick, in id order.
    pub executed: Vec<String>,
    /// Executed modules whose result had `status = error`.
    pub failed: usize,
    pub cache_entries_purged: u64,
}

pub struct Scheduler {
    runner: Arc<ModuleRunner>,
    last_runs: Mutex<HashMap<String, DateTime<Utc>>>,
    metrics: Option<Arc<AppMetrics>>,
}

impl Scheduler {
    pub fn new(runner: Arc<ModuleRunner>) -> Self {
        Self {
            runner,
            last_runs: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the scheduling loop until `Ctrl+C` (SIGINT) is received.
    ///
    /// A failing module is logged and never stops the loop.
    pub async fn run(&self, interval_seconds: u64) {
        let mut interval = time::interval(Duration::from_secs(interval_seconds.max(1)));

        tracing::info!("Scheduler started (interval: {}s)", interval_seconds);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }

                _ = signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received. Stopping scheduler.");
                    break;
                }
            }
        }

        tracing::info!("Scheduler stopped cleanly");
    }

    /// Execute every due module once, then purge expired cache entries.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        for metadata in self.runner.registry().list_all() {
            let module_id = metadata.id.as_str();

            let Some(config) = self.runner.resolver().load(module_id).await else {
                continue;
            };
            if !config.enabled {
                continue;
            }
            let Some(expr) = config.schedule.as_deref() else {
                continue;
            };
            let schedule: Schedule = match expr.parse() {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::warn!(module_id, error = %err, "Skipping module with invalid schedule");
                    continue;
                }
            };

            let last_run = self.last_run(module_id).await;
            if !schedule.is_due(last_run, now) {
                continue;
            }

            match self.runner.execute(module_id, Some(config), true).await {
                Ok(result) => {
                    if !result.is_success() {
                        summary.failed += 1;
                        tracing::warn!(
                            module_id,
                            "Scheduled run finished with error: {}",
                            result.error.as_deref().unwrap_or("unknown")
                        );
                    }
                    summary.executed.push(module_id.to_string());
                    self.last_runs.lock().await.insert(module_id.to_string(), now);
                }
                Err(err) => {
                    tracing::error!(module_id, "Scheduled run skipped: {}", err);
                }
            }
        }

        summary.cache_entries_purged = self.runner.clear_expired_cache().await;

        if let Some(m) = &self.metrics {
            m.scheduler_ticks_total.inc();
        }
        tracing::debug!(
            executed = summary.executed.len(),
            failed = summary.failed,
            purged = summary.cache_entries_purged,
            "Scheduler tick complete"
        );

        summary
    }

    /// Last run seen by this scheduler, else the newest run in the ledger.
    async fn last_run(&self, module_id: &str) -> Option<DateTime<Utc>> {
        if let Some(at) = self.last_runs.lock().await.get(module_id) {
            return Some(*at);
        }

        match self.runner.recent_runs(Some(module_id), 1).await {
            Ok(runs) => {
                let started = runs.first().map(|r| r.started_at)?;
                self.last_runs
                    .lock()
                    .await
                    .insert(module_id.to_string(), started);
                Some(started)
            }
            Err(err) => {
                tracing::warn!(module_id, error = %err, "Could not read last run; treating as never run");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertDispatcher;
    use crate::modules::ModuleConfig;
    use crate::registry::tests::StubModule;
    use crate::registry::ModuleRegistry;
    use crate::store::{ModuleStore, MemoryStore};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<MemoryStore>,
        runs: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ModuleRegistry::new());
        for id in ["a", "b"] {
            let counter = runs.clone();
            registry.register(move || {
                Box::new(StubModule {
                    id,
                    category: "misc",
                    runs: counter.clone(),
                })
            });
        }

        let store = Arc::new(MemoryStore::default());
        let runner = ModuleRunner::new(registry, store.clone(), Arc::new(AlertDispatcher::disabled()));
        Fixture {
            scheduler: Scheduler::new(Arc::new(runner)),
            store,
            runs,
        }
    }

    #[tokio::test]
    async fn unconfigured_modules_never_run() {
        let f = fixture();

        let summary = f.scheduler.tick(Utc::now()).await;

        assert!(summary.executed.is_empty());
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runs_due_module_once_per_interval() {
        let f = fixture();
        f.store
            .save_config(&ModuleConfig::new("a").with_schedule("*/15 * * * *"))
            .await
            .unwrap();
        let now = Utc::now();

        let first = f.scheduler.tick(now).await;
        let second = f.scheduler.tick(now + ChronoDuration::minutes(5)).await;

        assert_eq!(first.executed, vec!["a"]);
        assert!(second.executed.is_empty());
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_and_invalid_schedules_are_skipped() {
        let f = fixture();
        let mut disabled = ModuleConfig::new("a").with_schedule("@hourly");
        disabled.enabled = false;
        f.store.save_config(&disabled).await.unwrap();
        f.store
            .save_config(&ModuleConfig::new("b").with_schedule("every tuesday"))
            .await
            .unwrap();

        let summary = f.scheduler.tick(Utc::now()).await;

        assert!(summary.executed.is_empty());
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn last_run_is_seeded_from_ledger() {
        let f = fixture();
        f.store
            .save_config(&ModuleConfig::new("a").with_schedule("@hourly").with_cache_ttl(0))
            .await
            .unwrap();

        // A run recorded by an earlier process.
        f.scheduler.runner.execute("a", None, false).await.unwrap();
        let before = f.runs.load(Ordering::SeqCst);

        let summary = f.scheduler.tick(Utc::now()).await;

        assert!(summary.executed.is_empty());
        assert_eq!(f.runs.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn tick_purges_expired_cache() {
        let f = fixture();
        f.store
            .save_config(&ModuleConfig::new("a").with_schedule("@every 30s").with_cache_ttl(0))
            .await
            .unwrap();

        let summary = f.scheduler.tick(Utc::now()).await;

        assert_eq!(summary.executed, vec!["a"]);
        assert_eq!(summary.cache_entries_purged, 1);
        assert_eq!(f.store.count_cache_entries(None).await.unwrap(), 0);
    }
}
