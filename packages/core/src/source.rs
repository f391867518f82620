//! Campaign Metrics Source Interface
//!
//! Abstraction over the tracking platform that analysis modules read from.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How rows returned by the tracker are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Campaign,
    Zone,
    Day,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Campaign => "campaign",
            GroupBy::Zone => "zone",
            GroupBy::Day => "day",
        }
    }
}

/// Parameters of a single metrics fetch. Both dates are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub group_by: GroupBy,
    #[serde(default)]
    pub campaign_ids: Vec<String>,
}

impl MetricsQuery {
    pub fn new(date_from: NaiveDate, date_to: NaiveDate, group_by: GroupBy) -> Self {
        Self {
            date_from,
            date_to,
            group_by,
            campaign_ids: Vec::new(),
        }
    }

    pub fn with_campaigns(mut self, campaign_ids: Vec<String>) -> Self {
        self.campaign_ids = campaign_ids;
        self
    }
}

/// One aggregated row of campaign performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub campaign_id: String,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,
}

impl MetricRow {
    /// Click-through rate; zero when there were no impressions.
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }

    /// Return on spend as a fraction (`0.25` = +25%); `None` without spend.
    pub fn roi(&self) -> Option<f64> {
        if self.cost <= 0.0 {
            None
        } else {
            Some((self.revenue - self.cost) / self.cost)
        }
    }
}

/// Errors from metrics sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Data format error: {message}")]
    Format { message: String },

    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Service unavailable")]
    Unavailable,
}

/// Trait for metrics sources to keep modules independent of the tracker
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch aggregated rows for the given query
    async fn fetch(&self, query: &MetricsQuery) -> Result<Vec<MetricRow>, SourceError>;

    /// Name of this source for logging
    fn source_name(&self) -> &str;
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;
