//! Prometheus metrics registry for the analytics engine.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and hand it to
//! the runner and scheduler.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Completed module executions, labelled by module and result status.
    pub module_executions_total: CounterVec,
    /// Executions answered from the result cache.
    pub cache_hits_total: CounterVec,
    /// Cache-enabled executions that had to run the module.
    pub cache_misses_total: CounterVec,
    /// Wall-clock duration of module runs in seconds (cache misses only).
    pub execution_duration: HistogramVec,
    /// Run-ledger writes retried after contention.
    pub run_write_retries_total: Counter,
    /// Runs that ended without a ledger entry.
    pub run_writes_dropped_total: Counter,
    /// Alert messages delivered to the notification sink.
    pub alerts_sent_total: Counter,
    /// Alert messages the sink failed to accept.
    pub alerts_failed_total: Counter,
    /// Expired cache entries removed by sweeps.
    pub cache_entries_purged_total: Counter,
    /// Completed scheduler ticks.
    pub scheduler_ticks_total: Counter,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let module_executions_total = CounterVec::new(
            Opts::new(
                "campaign_analytics_module_executions_total",
                "Module executions by module and status",
            ),
            &["module", "status"],
        )?;

        let cache_hits_total = CounterVec::new(
            Opts::new("campaign_analytics_cache_hits_total", "Result cache hits by module"),
            &["module"],
        )?;

        let cache_misses_total = CounterVec::new(
            Opts::new("campaign_analytics_cache_misses_total", "Result cache misses by module"),
            &["module"],
        )?;

        let execution_duration = HistogramVec::new(
            HistogramOpts::new(
                "campaign_analytics_module_execution_seconds",
                "Module run duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["module"],
        )?;

        let run_write_retries_total = Counter::with_opts(Opts::new(
            "campaign_analytics_run_write_retries_total",
            "Run ledger writes retried after store contention",
        ))?;

        let run_writes_dropped_total = Counter::with_opts(Opts::new(
            "campaign_analytics_run_writes_dropped_total",
            "Runs completed without a persisted ledger entry",
        ))?;

        let alerts_sent_total = Counter::with_opts(Opts::new(
            "campaign_analytics_alerts_sent_total",
            "Alert messages delivered",
        ))?;

        let alerts_failed_total = Counter::with_opts(Opts::new(
            "campaign_analytics_alerts_failed_total",
            "Alert messages that failed to deliver",
        ))?;

        let cache_entries_purged_total = Counter::with_opts(Opts::new(
            "campaign_analytics_cache_entries_purged_total",
            "Expired cache entries deleted",
        ))?;

        let scheduler_ticks_total = Counter::with_opts(Opts::new(
            "campaign_analytics_scheduler_ticks_total",
            "Completed scheduler ticks",
        ))?;

        registry.register(Box::new(module_executions_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(execution_duration.clone()))?;
        registry.register(Box::new(run_write_retries_total.clone()))?;
        registry.register(Box::new(run_writes_dropped_total.clone()))?;
        registry.register(Box::new(alerts_sent_total.clone()))?;
        registry.register(Box::new(alerts_failed_total.clone()))?;
        registry.register(Box::new(cache_entries_purged_total.clone()))?;
        registry.register(Box::new(scheduler_ticks_total.clone()))?;

        Ok(Self {
            module_executions_total,
            cache_hits_total,
            cache_misses_total,
            execution_duration,
            run_write_retries_total,
            run_writes_dropped_total,
            alerts_sent_total,
            alerts_failed_total,
            cache_entries_purged_total,
            scheduler_ticks_total,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_contains_labelled_execution_counter() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .module_executions_total
            .with_label_values(&["spend_spike", "success"])
            .inc();
        let output = metrics.render().unwrap();
        assert!(output.contains(
            "campaign_analytics_module_executions_total{module=\"spend_spike\",status=\"success\"} 1"
        ));
    }

    #[test]
    fn counters_increment_correctly() {
        let metrics = AppMetrics::new().unwrap();
        metrics.run_write_retries_total.inc_by(3.0);
        metrics.run_writes_dropped_total.inc();
        assert!((metrics.run_write_retries_total.get() - 3.0).abs() < f64::EPSILON);
        assert!((metrics.run_writes_dropped_total.get() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_counters_are_per_module() {
        let metrics = AppMetrics::new().unwrap();
        metrics.cache_hits_total.with_label_values(&["a"]).inc();
        metrics.cache_misses_total.with_label_values(&["b"]).inc_by(2.0);

        assert!((metrics.cache_hits_total.with_label_values(&["a"]).get() - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.cache_hits_total.with_label_values(&["b"]).get(), 0.0);
        assert!((metrics.cache_misses_total.with_label_values(&["b"]).get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_records_observations() {
        let metrics = AppMetrics::new().unwrap();
        metrics.execution_duration.with_label_values(&["x"]).observe(0.2);
        let output = metrics.render().unwrap();
        assert!(output.contains("campaign_analytics_module_execution_seconds_count{module=\"x\"} 1"));
    }
}
