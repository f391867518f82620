//! Spend spike detection
//!
//! Compares each campaign's spend on the analysed day against its average
//! daily spend over the preceding `lookback_days`.

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

pub const MODULE_ID: &str = "spend_spike";

pub struct SpendSpikeModule {
    source: Arc<dyn MetricsSource>,
}

impl SpendSpikeModule {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }
}

#[derive(Default)]
struct DailySpend {
    current: f64,
    prior_total: f64,
}

fn severity_for(ratio: f64, spike_ratio: f64) -> Severity {
    if ratio >= spike_ratio * 2.0 {
        Severity::Critical
    } else if ratio >= spike_ratio * 1.5 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[async_trait]
impl AnalysisModule for SpendSpikeModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: MODULE_ID.to_string(),
            category: "budget".to_string(),
            name: "Spend Spike".to_string(),
            description: "Flags campaigns whose daily spend jumped well above their recent average"
                .to_string(),
            parameters: vec![
                ParameterSpec::new(
                    "lookback_days",
                    ParameterKind::Integer,
                    "Days of history used for the baseline",
                    7,
                ),
                ParameterSpec::new(
                    "spike_ratio",
                    ParameterKind::Float,
                    "Current / baseline spend ratio that counts as a spike",
                    2.0,
                ),
                ParameterSpec::new(
                    "min_spend",
                    ParameterKind::Float,
                    "Ignore campaigns that spent less than this on the analysed day",
                    10.0,
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
        let spike_ratio = config.param_f64("spike_ratio", 2.0)?;
        let min_spend = config.param_f64("min_spend", 10.0)?;
        let campaign_ids = config.param_strings("campaign_ids")?;
        let as_of = resolve_as_of(config)?;

        if lookback_days == 0 || lookback_days > 90 {
            return Err(ModuleError::invalid_params("lookback_days must be between 1 and 90"));
        }
        if spike_ratio <= 1.0 {
            return Err(ModuleError::invalid_params("spike_ratio must be greater than 1"));
        }

        let query = MetricsQuery::new(
            as_of - Duration::days(lookback_days as i64),
            as_of,
            GroupBy::Day,
        )
        .with_campaigns(campaign_ids);
        let rows = self.source.fetch(&query).await?;

        let mut by_campaign: BTreeMap<String, DailySpend> = BTreeMap::new();
        for row in rows {
            let Some(date) = row.date else { continue };
            let entry = by_campaign.entry(row.campaign_id).or_default();
            if date == as_of {
                entry.current += row.cost;
            } else {
                entry.prior_total += row.cost;
            }
        }

        let mut spikes = Vec::new();
        let mut alerts = Vec::new();
        let mut without_history = 0;

        for (campaign_id, spend) in &by_campaign {
            let baseline = spend.prior_total / lookback_days as f64;
            if baseline <= 0.0 {
                without_history += 1;
                continue;
            }
            if spend.current < min_spend {
                continue;
            }

            let ratio = spend.current / baseline;
            if ratio < spike_ratio {
                continue;
            }

            spikes.push(json!({
                "campaign_id": campaign_id,
                "current_spend": round2(spend.current),
                "baseline_spend": round2(baseline),
                "ratio": round2(ratio),
            }));
            alerts.push(
                Alert::new(
                    MODULE_ID,
                    severity_for(ratio, spike_ratio),
                    format!(
                        "Campaign {} spent {:.2} on {}, {:.1}x its {}-day average of {:.2}",
                        campaign_id, spend.current, as_of, ratio, lookback_days, baseline
                    ),
                )
                .with_action("Review bids and daily caps for this campaign"),
            );
        }

        tracing::debug!(
            campaigns = by_campaign.len(),
            spikes = spikes.len(),
            "Spend spike analysis complete"
        );

        Ok(AnalysisOutput {
            data: json!({
                "as_of": as_of.to_string(),
                "lookback_days": lookback_days,
                "campaigns_analyzed": by_campaign.len(),
                "campaigns_without_history": without_history,
                "spikes": spikes,
            }),
            alerts,
        })
    }
}
