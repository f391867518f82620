//! ROI summary across campaigns for the trailing window.

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
use crate::source::{GroupBy, MetricRow, MetricsQuery, MetricsSource};

pub const MODULE_ID: &str = "roi_summary";

pub struct RoiSummaryModule {
    source: Arc<dyn MetricsSource>,
}

impl RoiSummaryModule {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }
}

fn severity_for(roi: f64) -> Severity {
    if roi <= -0.5 {
        Severity::Critical
    } else if roi <= -0.35 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[async_trait]
impl AnalysisModule for RoiSummaryModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: MODULE_ID.to_string(),
            category: "performance".to_string(),
            name: "ROI Summary".to_string(),
            description: "Ranks campaigns by return on spend and flags unprofitable ones"
                .to_string(),
            parameters: vec![
                ParameterSpec::new(
                    "lookback_days",
                    ParameterKind::Integer,
                    "Window size in days, ending on the analysed day",
                    7,
                ),
                ParameterSpec::new(
                    "min_spend",
                    ParameterKind::Float,
                    "Campaigns with less spend in the window are listed but never flagged",
                    50.0,
                ),
                ParameterSpec::new(
                    "min_roi",
                    ParameterKind::Float,
                    "ROI (fraction) below which a campaign is flagged",
                    -0.2,
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
        let min_spend = config.param_f64("min_spend", 50.0)?;
        let min_roi = config.param_f64("min_roi", -0.2)?;
        let campaign_ids = config.param_strings("campaign_ids")?;
        let as_of = resolve_as_of(config)?;

        if lookback_days == 0 || lookback_days > 90 {
            return Err(ModuleError::invalid_params("lookback_days must be between 1 and 90"));
        }

        let query = MetricsQuery::new(
            as_of - Duration::days(lookback_days as i64 - 1),
            as_of,
            GroupBy::Campaign,
        )
        .with_campaigns(campaign_ids);
        let mut rows: Vec<MetricRow> = self.source.fetch(&query).await?;

        if rows.iter().any(|r| !r.cost.is_finite() || !r.revenue.is_finite()) {
            return Err(ModuleError::computation("source returned non-finite cost or revenue"));
        }

        let total_cost: f64 = rows.iter().map(|r| r.cost).sum();
        let total_revenue: f64 = rows.iter().map(|r| r.revenue).sum();
        let total_conversions: u64 = rows.iter().map(|r| r.conversions).sum();

        // Worst first; campaigns without spend sink to the bottom.
        rows.sort_by(|a, b| {
            let ra = a.roi().unwrap_or(f64::INFINITY);
            let rb = b.roi().unwrap_or(f64::INFINITY);
            ra.total_cmp(&rb).then_with(|| a.campaign_id.cmp(&b.campaign_id))
        });

        let mut alerts = Vec::new();
        let campaigns: Vec<_> = rows
            .iter()
            .map(|row| {
                let roi = row.roi();
                if let Some(roi) = roi {
                    if row.cost >= min_spend && roi < min_roi {
                        alerts.push(
                            Alert::new(
                                "negative_roi",
                                severity_for(roi),
                                format!(
                                    "Campaign {} returned {:.0}% on {:.2} spend over {} day(s)",
                                    row.campaign_id,
                                    roi * 100.0,
                                    row.cost,
                                    lookback_days
                                ),
                            )
                            .with_action("Pause or re-target the campaign"),
                        );
                    }
                }
                json!({
                    "campaign_id": row.campaign_id,
                    "cost": round2(row.cost),
                    "revenue": round2(row.revenue),
                    "conversions": row.conversions,
                    "roi": roi.map(round2),
                })
            })
            .collect();

        let overall_roi = if total_cost > 0.0 {
            Some(round2((total_revenue - total_cost) / total_cost))
        } else {
            None
        };

        Ok(AnalysisOutput {
            data: json!({
                "as_of": as_of.to_string(),
                "lookback_days": lookback_days,
                "totals": {
                    "cost": round2(total_cost),
                    "revenue": round2(total_revenue),
                    "conversions": total_conversions,
                    "roi": overall_roi,
                },
                "campaigns": campaigns,
            }),
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_source::{metric_row, MockMetricsSource};

    fn config() -> ModuleConfig {
        ModuleConfig::new(MODULE_ID).with_param("as_of", "2024-05-08")
    }

    fn campaign(id: &str, cost: f64, revenue: f64) -> MetricRow {
        metric_row(None, id, None, (10_000, 100, 5), (cost, revenue))
    }

    #[tokio::test]
    async fn ranks_campaigns_worst_first() {
        let source = MockMetricsSource::with_rows(vec![
            campaign("good", 100.0, 180.0),
            campaign("bad", 100.0, 40.0),
            campaign("idle", 0.0, 0.0),
        ]);
        let module = RoiSummaryModule::new(Arc::new(source));

        let output = module.run(&config()).await.unwrap();

        let ids: Vec<&str> = output.data["campaigns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["campaign_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["bad", "good", "idle"]);
        assert_eq!(output.data["totals"]["cost"], 200.0);
        assert_eq!(output.data["totals"]["roi"], 0.1);
    }

    #[tokio::test]
    async fn flags_unprofitable_campaigns_by_severity() {
        let source = MockMetricsSource::with_rows(vec![
            campaign("a", 100.0, 40.0),
            campaign("b", 100.0, 70.0),
            campaign("c", 100.0, 95.0),
        ]);
        let module = RoiSummaryModule::new(Arc::new(source));

        let output = module.run(&config()).await.unwrap();

        let severities: Vec<Severity> = output.alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Medium]);
    }

    #[tokio::test]
    async fn low_spend_campaigns_are_not_flagged() {
        let source = MockMetricsSource::with_rows(vec![campaign("tiny", 10.0, 0.0)]);
        let module = RoiSummaryModule::new(Arc::new(source));

        let output = module.run(&config()).await.unwrap();

        assert!(output.alerts.is_empty());
        assert_eq!(output.data["campaigns"][0]["roi"], -1.0);
    }

    #[tokio::test]
    async fn empty_window_has_null_roi() {
        let module = RoiSummaryModule::new(Arc::new(MockMetricsSource::new()));

        let output = module.run(&config()).await.unwrap();

        assert!(output.data["totals"]["roi"].is_null());
        assert!(output.alerts.is_empty());
    }

    #[tokio::test]
    async fn non_finite_values_are_a_computation_error() {
        let source = MockMetricsSource::with_rows(vec![campaign("x", f64::NAN, 1.0)]);
        let module = RoiSummaryModule::new(Arc::new(source));

        let err = module.run(&config()).await.unwrap_err();

        assert!(matches!(err, ModuleError::Computation { .. }));
    }
}
