//! Traffic zone quality
//!
//! Looks at zone-level totals over a short window and flags zones that
//! either burn budget without converting or deliver impressions nobody
//! clicks on.

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

pub const MODULE_ID: &str = "zone_quality";

pub struct ZoneQualityModule {
    source: Arc<dyn MetricsSource>,
}

impl ZoneQualityModule {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl AnalysisModule for ZoneQualityModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: MODULE_ID.to_string(),
            category: "traffic".to_string(),
            name: "Zone Quality".to_string(),
            description: "Finds zones that spend without converting or show abnormally low CTR"
                .to_string(),
            parameters: vec![
                ParameterSpec::new(
                    "lookback_days",
                    ParameterKind::Integer,
                    "Window size in days, ending on the analysed day",
                    3,
                ),
                ParameterSpec::new(
                    "max_spend_without_conversion",
                    ParameterKind::Float,
                    "Spend on a zone with zero conversions that triggers an alert",
                    20.0,
                ),
                ParameterSpec::new(
                    "min_ctr",
                    ParameterKind::Float,
                    "CTR (fraction) below which a zone is considered low quality",
                    0.001,
                ),
                ParameterSpec::new(
                    "min_impressions",
                    ParameterKind::Integer,
                    "Impressions required before CTR is judged",
                    10_000,
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
        let lookback_days = config.param_u64("lookback_days", 3)?;
        let max_spend = config.param_f64("max_spend_without_conversion", 20.0)?;
        let min_ctr = config.param_f64("min_ctr", 0.001)?;
        let min_impressions = config.param_u64("min_impressions", 10_000)?;
        let campaign_ids = config.param_strings("campaign_ids")?;
        let as_of = resolve_as_of(config)?;

        if lookback_days == 0 || lookback_days > 30 {
            return Err(ModuleError::invalid_params("lookback_days must be between 1 and 30"));
        }

        let query = MetricsQuery::new(
            as_of - Duration::days(lookback_days as i64 - 1),
            as_of,
            GroupBy::Zone,
        )
        .with_campaigns(campaign_ids);
        let rows = self.source.fetch(&query).await?;

        let mut flagged = Vec::new();
        let mut alerts = Vec::new();
        let mut zones_analyzed = 0;
        let mut wasted_spend = 0.0;

        for row in &rows {
            let Some(zone_id) = row.zone_id.as_deref() else { continue };
            zones_analyzed += 1;

            if row.conversions == 0 && row.cost >= max_spend {
                wasted_spend += row.cost;
                let severity = if row.cost >= max_spend * 3.0 {
                    Severity::Critical
                } else {
                    Severity::High
                };
                flagged.push(json!({
                    "zone_id": zone_id,
                    "campaign_id": row.campaign_id,
                    "issue": "zero_conversions",
                    "spend": round2(row.cost),
                }));
                alerts.push(
                    Alert::new(
                        "zone_zero_conversions",
                        severity,
                        format!(
                            "Zone {} spent {:.2} on campaign {} over {} day(s) without a conversion",
                            zone_id, row.cost, row.campaign_id, lookback_days
                        ),
                    )
                    .with_action("Blacklist the zone for this campaign"),
                );
                continue;
            }

            let ctr = row.ctr();
            if row.impressions >= min_impressions && ctr < min_ctr {
                flagged.push(json!({
                    "zone_id": zone_id,
                    "campaign_id": row.campaign_id,
                    "issue": "low_ctr",
                    "ctr": ctr,
                    "impressions": row.impressions,
                }));
                alerts.push(
                    Alert::new(
                        "zone_low_ctr",
                        Severity::Low,
                        format!(
                            "Zone {} on campaign {} has CTR {:.3}% over {} impressions",
                            zone_id,
                            row.campaign_id,
                            ctr * 100.0,
                            row.impressions
                        ),
                    )
                    .with_action("Review creatives or lower the bid for this zone"),
                );
            }
        }

        Ok(AnalysisOutput {
            data: json!({
                "as_of": as_of.to_string(),
                "lookback_days": lookback_days,
                "zones_analyzed": zones_analyzed,
                "wasted_spend": round2(wasted_spend),
                "flagged": flagged,
            }),
            alerts,
        })
    }
}
