//! Alert dispatch.
//!
//! Forwards a run's alerts to the configured [`NotificationSink`]. Up to
//! [`DispatcherConfig::batch_threshold`] alerts go out one message each,
//! paced so the sink is not flooded; anything above that is folded into a
//! single summary message. Delivery failures are logged and reported in the
//! returned [`DispatchOutcome`], never raised.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::format::{format_alert, format_batch};
use super::{Alert, MessageFormat, NotificationSink};
use crate::modules::CRITICAL_MODULES;

pub const DEFAULT_BATCH_THRESHOLD: usize = 3;
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);
pub const DEFAULT_DASHBOARD_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Modules whose alerts are forwarded at all.
    pub enabled_modules: HashSet<String>,
    /// Delay between consecutive individual messages.
    pub pacing: Duration,
    /// Largest alert count still sent as individual messages.
    pub batch_threshold: usize,
    pub dashboard_url: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled_modules: CRITICAL_MODULES.iter().map(|id| id.to_string()).collect(),
            pacing: DEFAULT_PACING,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            dashboard_url: DEFAULT_DASHBOARD_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoAlerts,
    ChannelUnconfigured,
    ModuleNotEnabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    Delivered {
        messages_sent: usize,
        messages_failed: usize,
        batched: bool,
    },
}

pub struct AlertDispatcher {
    sink: Option<Arc<dyn NotificationSink>>,
    config: DispatcherConfig,
    unconfigured_logged: AtomicBool,
}

impl AlertDispatcher {
    pub fn new(sink: Option<Arc<dyn NotificationSink>>, config: DispatcherConfig) -> Self {
        Self {
            sink,
            config,
            unconfigured_logged: AtomicBool::new(false),
        }
    }

    /// A dispatcher with no channel; every dispatch is a logged no-op.
    pub fn disabled() -> Self {
        Self::new(None, DispatcherConfig::default())
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn dispatch(&self, module_id: &str, alerts: &[Alert]) -> DispatchOutcome {
        if alerts.is_empty() {
            return DispatchOutcome::Skipped(SkipReason::NoAlerts);
        }

        let Some(sink) = self.sink.as_ref() else {
            if !self.unconfigured_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!("Alert channel not configured; alerts will not be delivered");
            }
            return DispatchOutcome::Skipped(SkipReason::ChannelUnconfigured);
        };

        if !self.config.enabled_modules.contains(module_id) {
            tracing::debug!(module_id, "Alerts not enabled for module; skipping dispatch");
            return DispatchOutcome::Skipped(SkipReason::ModuleNotEnabled);
        }

        if alerts.len() <= self.config.batch_threshold {
            self.send_individually(sink.as_ref(), module_id, alerts).await
        } else {
            self.send_batch(sink.as_ref(), module_id, alerts).await
        }
    }

    async fn send_individually(
        &self,
        sink: &dyn NotificationSink,
        module_id: &str,
        alerts: &[Alert],
    ) -> DispatchOutcome {
        let mut sent = 0;
        let mut failed = 0;

        for (i, alert) in alerts.iter().enumerate() {
            if i > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }

            let text = format_alert(module_id, alert, &self.config.dashboard_url);
            match sink.deliver(&text, MessageFormat::Html).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    failed += 1;
                    tracing::error!(
                        module_id,
                        alert_type = %alert.alert_type,
                        sink = sink.sink_name(),
                        "Failed to deliver alert: {}",
                        err
                    );
                }
            }
        }

        tracing::info!(module_id, sent, failed, "Alerts dispatched individually");
        DispatchOutcome::Delivered {
            messages_sent: sent,
            messages_failed: failed,
            batched: false,
        }
    }

    async fn send_batch(
        &self,
        sink: &dyn NotificationSink,
        module_id: &str,
        alerts: &[Alert],
    ) -> DispatchOutcome {
        let text = format_batch(&[(module_id, alerts)], &self.config.dashboard_url);
        let delivered = match sink.deliver(&text, MessageFormat::Html).await {
            Ok(()) => {
                tracing::info!(module_id, alerts = alerts.len(), "Alert summary dispatched");
                true
            }
            Err(err) => {
                tracing::error!(
                    module_id,
                    alerts = alerts.len(),
                    sink = sink.sink_name(),
                    "Failed to deliver alert summary: {}",
                    err
                );
                false
            }
        };

        DispatchOutcome::Delivered {
            messages_sent: usize::from(delivered),
            messages_failed: usize::from(!delivered),
            batched: true,
        }
    }
}
