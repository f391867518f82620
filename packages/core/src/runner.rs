//! Module runner: the single `execute` entry point.
//!
//! Composes the registry, config resolution, the result cache, the run
//! ledger and alert dispatch. Only an unknown module id fails `execute`;
//! every other problem is logged and the run carries on without that side
//! effect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use crate::alerts::{AlertDispatcher, DispatchOutcome};
use crate::cache::ResultCache;
use crate::error::RunnerError;
use crate::ledger::{RecordOutcome, RetryPolicy, RunLedger};
use crate::metrics::AppMetrics;
use crate::modules::{AnalysisModule, AnalysisOutput, ModuleConfig, ModuleResult};
use crate::registry::ModuleRegistry;
use crate::resolver::ConfigResolver;
use crate::store::{ModuleStore, RunRecord, StoreError};

pub struct ModuleRunner {
    registry: Arc<ModuleRegistry>,
    store: Arc<dyn ModuleStore>,
    resolver: ConfigResolver,
    cache: ResultCache,
    ledger: RunLedger,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Option<Arc<AppMetrics>>,
}

impl ModuleRunner {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        store: Arc<dyn ModuleStore>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            registry,
            resolver: ConfigResolver::new(store.clone()),
            cache: ResultCache::new(store.clone()),
            ledger: RunLedger::new(store.clone()),
            store,
            dispatcher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.ledger = RunLedger::with_policy(self.store.clone(), policy);
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Run `module_id`, or serve a fresh cached result when `use_cache` is set.
    ///
    /// `config` overrides the stored/default configuration for this call only.
    pub async fn execute(
        &self,
        module_id: &str,
        config: Option<ModuleConfig>,
        use_cache: bool,
    ) -> Result<ModuleResult, RunnerError> {
        let module = self
            .registry
            .get_instance(module_id)
            .ok_or_else(|| RunnerError::ModuleNotFound {
                module_id: module_id.to_string(),
            })?;

        let config = self.resolver.resolve(module_id, config, module.as_ref()).await;
        let cache_key = use_cache.then(|| module.cache_key(&config));

        if let Some(key) = cache_key.as_deref() {
            match self.cache.get(module_id, key).await {
                Ok(Some(hit)) => {
                    tracing::info!(module_id, "Serving cached result");
                    if let Some(m) = &self.metrics {
                        m.cache_hits_total.with_label_values(&[module_id]).inc();
                    }
                    return Ok(hit);
                }
                Ok(None) => {
                    if let Some(m) = &self.metrics {
                        m.cache_misses_total.with_label_values(&[module_id]).inc();
                    }
                }
                Err(err) => {
                    tracing::warn!(module_id, error = %err, "Cache read failed; running module");
                }
            }
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = run_bounded(module, &config).await;
        let elapsed = clock.elapsed();
        let execution_time_ms = elapsed.as_millis() as u64;

        let (mut result, results_payload) = match outcome {
            Ok(output) => {
                let payload = serde_json::to_value(&output).ok();
                (ModuleResult::success(module_id, output, execution_time_ms), payload)
            }
            Err(message) => {
                tracing::error!(module_id, execution_time_ms, "Module run failed: {}", message);
                (ModuleResult::failure(module_id, message, execution_time_ms), None)
            }
        };

        if let Some(m) = &self.metrics {
            m.module_executions_total
                .with_label_values(&[module_id, result.status.as_str()])
                .inc();
            m.execution_duration
                .with_label_values(&[module_id])
                .observe(elapsed.as_secs_f64());
        }

        let run = RunRecord {
            id: None,
            module_id: module_id.to_string(),
            started_at,
            completed_at: Some(result.generated_at),
            status: result.status,
            results: results_payload,
            params: json!(config.params),
            error: result.error.clone(),
            execution_time_ms: Some(execution_time_ms),
        };
        let recorded = self.ledger.record(&run).await;
        self.observe_record(&recorded);
        result.run_id = recorded.run_id();

        if result.is_success() && !result.alerts.is_empty() {
            if config.alerts_enabled {
                let dispatched = self.dispatcher.dispatch(module_id, &result.alerts).await;
                self.observe_dispatch(module_id, &dispatched);
            } else {
                tracing::debug!(module_id, "Alerts disabled in module config");
            }
        }

        if let Some(key) = cache_key.as_deref() {
            if result.is_success() {
                if let Err(err) = self
                    .cache
                    .put(module_id, key, &result, config.cache_ttl_seconds)
                    .await
                {
                    tracing::warn!(module_id, error = %err, "Cache write failed");
                }
            }
        }

        tracing::info!(
            module_id,
            status = %result.status,
            execution_time_ms,
            alerts = result.alerts.len(),
            run_id = ?result.run_id,
            "Module executed"
        );

        Ok(result)
    }

    /// Delete cached results for one module, or all of them. Returns rows deleted.
    pub async fn clear_cache(&self, module_id: Option<&str>) -> u64 {
        match self.cache.clear(module_id).await {
            Ok(deleted) => {
                tracing::info!(module_id = ?module_id, deleted, "Cache cleared");
                deleted
            }
            Err(err) => {
                tracing::error!(module_id = ?module_id, error = %err, "Cache clear failed");
                0
            }
        }
    }

    /// Delete expired cache entries. Returns rows deleted.
    pub async fn clear_expired_cache(&self) -> u64 {
        match self.cache.purge_expired().await {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(deleted, "Expired cache entries purged");
                }
                if let Some(m) = &self.metrics {
                    m.cache_entries_purged_total.inc_by(deleted as f64);
                }
                deleted
            }
            Err(err) => {
                tracing::error!(error = %err, "Expired cache purge failed");
                0
            }
        }
    }

    pub async fn recent_runs(
        &self,
        module_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RunRecord>, StoreError> {
        self.store.recent_runs(module_id, limit).await
    }

    pub async fn count_runs(&self, module_id: Option<&str>) -> Result<i64, StoreError> {
        self.store.count_runs(module_id).await
    }

    fn observe_record(&self, outcome: &RecordOutcome) {
        let Some(m) = &self.metrics else { return };
        let retries = outcome.attempts().saturating_sub(1);
        if retries > 0 {
            m.run_write_retries_total.inc_by(retries as f64);
        }
        if matches!(outcome, RecordOutcome::Dropped { .. }) {
            m.run_writes_dropped_total.inc();
        }
    }

    fn observe_dispatch(&self, module_id: &str, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered {
                messages_sent,
                messages_failed,
                ..
            } => {
                if *messages_failed > 0 {
                    tracing::warn!(module_id, failed = messages_failed, "Some alerts were not delivered");
                }
                if let Some(m) = &self.metrics {
                    m.alerts_sent_total.inc_by(*messages_sent as f64);
                    m.alerts_failed_total.inc_by(*messages_failed as f64);
                }
            }
            DispatchOutcome::Skipped(reason) => {
                tracing::debug!(module_id, reason = ?reason, "Alert dispatch skipped");
            }
        }
    }
}

/// Run the module on its own task, bounded by the config's timeout.
///
/// Timeouts, panics and module errors all come back as an error message.
async fn run_bounded(
    module: Box<dyn AnalysisModule>,
    config: &ModuleConfig,
) -> Result<AnalysisOutput, String> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let task_config = config.clone();
    let mut handle = tokio::spawn(async move { module.run(&task_config).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(output))) => Ok(output),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(join_err)) if join_err.is_panic() => Err("Module panicked during run".to_string()),
        Ok(Err(join_err)) => Err(format!("Module task failed: {}", join_err)),
        Err(_) => {
            handle.abort();
            Err(format!("Module timed out after {}s", config.timeout_seconds))
        }
    }
}
