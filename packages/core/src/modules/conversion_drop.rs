//! Conversion drop detection
//!
//! A campaign whose conversions on the analysed day fall far below its
//! recent daily average usually means a broken offer, landing page or
//! postback rather than normal variance.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use crate::alerts::{Alert, Severity};
use crate::modules::{
    as_of_parameter, campaign_filter_parameter, dated_cache_key, resolve_as_of, round2,
    AnalysisModule, AnalysisOutput, ModuleConfig, ModuleError, ModuleMetadata, ParameterKind,
    ParameterSpec,
};
use crate::source::{GroupBy, MetricsQuery, MetricsSource};

pub const MODULE_ID: &str = "conversion_drop";

pub struct ConversionDropModule {
    source: Arc<dyn MetricsSource>,
}

impl ConversionDropModule {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }
}

#[derive(Default)]
struct DailyConversions {
    current: u64,
    prior_total: u64,
    current_cost: f64,
}

#[async_trait]
impl AnalysisModule for ConversionDropModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: MODULE_ID.to_string(),
            category: "performance".to_string(),
            name: "Conversion Drop".to_string(),
            description: "Flags campaigns whose conversions fell sharply against their recent average"
                .to_string(),
            parameters: vec![
                ParameterSpec::new(
                    "lookback_days",
                    ParameterKind::Integer,
                    "Days of history used for the baseline",
                    7,
                ),
                ParameterSpec::new(
                    "drop_threshold_pct",
                    ParameterKind::Float,
                    "Percentage drop versus baseline that triggers an alert",
                    50.0,
                ),
                ParameterSpec::new(
                    "min_baseline_conversions",
                    ParameterKind::Float,
                    "Skip campaigns averaging fewer daily conversions than this",
                    5.0,
                ),
                campaign_filter_parameter(),
                as_of_parameter(),
            ],
        }
    }

    fn cache_key(&self, config: &ModuleConfig) -> String {
        dated_cache_key(config)
    }

    async fn run(&self, config: &ModuleConfig) -> Result<AnalysisOutput, ModuleError> {
        let lookback_days = config.param_u64("lookback_days", 7)?;
        let drop_threshold = config.param_f64("drop_threshold_pct", 50.0)?;
        let min_baseline = config.param_f64("min_baseline_conversions", 5.0)?;
        let campaign_ids = config.param_strings("campaign_ids")?;
        let as_of = resolve_as_of(config)?;

        if lookback_days == 0 || lookback_days > 90 {
            return Err(ModuleError::invalid_params("lookback_days must be between 1 and 90"));
        }
        if !(0.0..=100.0).contains(&drop_threshold) {
            return Err(ModuleError::invalid_params("drop_threshold_pct must be within 0..=100"));
        }

        let query = MetricsQuery::new(
            as_of - Duration::days(lookback_days as i64),
            as_of,
            GroupBy::Day,
        )
        .with_campaigns(campaign_ids);
        let rows = self.source.fetch(&query).await?;

        let mut by_campaign: BTreeMap<String, DailyConversions> = BTreeMap::new();
        for row in rows {
            let Some(date) = row.date else { continue };
            let entry = by_campaign.entry(row.campaign_id).or_default();
            if date == as_of {
                entry.current += row.conversions;
                entry.current_cost += row.cost;
            } else {
                entry.prior_total += row.conversions;
            }
        }

        let mut drops = Vec::new();
        let mut alerts = Vec::new();

        for (campaign_id, stats) in &by_campaign {
            let baseline = stats.prior_total as f64 / lookback_days as f64;
            if baseline < min_baseline || baseline <= 0.0 {
                continue;
            }

            let drop_pct = (baseline - stats.current as f64) / baseline * 100.0;
            if drop_pct < drop_threshold {
                continue;
            }

            let severity = if stats.current == 0 {
                Severity::Critical
            } else if drop_pct >= 75.0 {
                Severity::High
            } else {
                Severity::Medium
            };

            drops.push(json!({
                "campaign_id": campaign_id,
                "current_conversions": stats.current,
                "baseline_conversions": round2(baseline),
                "drop_pct": round2(drop_pct),
                "spend": round2(stats.current_cost),
            }));
            alerts.push(
                Alert::new(
                    MODULE_ID,
                    severity,
                    format!(
                        "Campaign {} converted {} times on {}, down {:.0}% from a daily average of {:.1}",
                        campaign_id, stats.current, as_of, drop_pct, baseline
                    ),
                )
                .with_action("Check the offer, landing page and postback tracking"),
            );
        }

        Ok(AnalysisOutput {
            data: json!({
                "as_of": as_of.to_string(),
                "lookback_days": lookback_days,
                "campaigns_analyzed": by_campaign.len(),
                "drops": drops,
            }),
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_source::{metric_row, MockMetricsSource};
    use crate::source::MetricRow;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn conversions(d: u32, campaign: &str, count: u64) -> MetricRow {
        metric_row(Some(day(d)), campaign, None, (5000, 100, count), (50.0, 0.0))
    }

    fn rows_with_today(daily: u64, today: u64) -> Vec<MetricRow> {
        let mut rows: Vec<MetricRow> = (1..=7).map(|d| conversions(d, "c1", daily)).collect();
        rows.push(conversions(8, "c1", today));
        rows
    }

    fn run_with(rows: Vec<MetricRow>) -> AnalysisOutput {
        let module = ConversionDropModule::new(Arc::new(MockMetricsSource::with_rows(rows)));
        let config = ModuleConfig::new(MODULE_ID).with_param("as_of", "2024-05-08");
        tokio_test::block_on(module.run(&config)).unwrap()
    }

    #[test]
    fn zero_conversions_is_critical() {
        let output = run_with(rows_with_today(20, 0));

        assert_eq!(output.alerts.len(), 1);
        assert_eq!(output.alerts[0].severity, Severity::Critical);
        assert_eq!(output.data["drops"][0]["drop_pct"], 100.0);
    }

    #[test]
    fn large_drop_is_high() {
        let output = run_with(rows_with_today(20, 4));
        assert_eq!(output.alerts[0].severity, Severity::High);
    }

    #[test]
    fn moderate_drop_is_medium() {
        let output = run_with(rows_with_today(20, 9));
        assert_eq!(output.alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn normal_variance_is_not_flagged() {
        let output = run_with(rows_with_today(20, 15));
        assert!(output.alerts.is_empty());
        assert_eq!(output.data["campaigns_analyzed"], 1);
    }

    #[test]
    fn low_volume_campaigns_are_skipped() {
        let output = run_with(rows_with_today(2, 0));
        assert!(output.alerts.is_empty());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let module = ConversionDropModule::new(Arc::new(MockMetricsSource::new()));
        let config = ModuleConfig::new(MODULE_ID).with_param("drop_threshold_pct", 150);
        let err = tokio_test::block_on(module.run(&config)).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidParams { .. }));
    }
}
