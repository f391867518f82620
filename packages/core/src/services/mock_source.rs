use std::sync::Mutex;

use async_trait::async_trait;

use crate::source::{MetricRow, MetricsQuery, MetricsSource, SourceError, SourceResult};

/// In-memory metrics source for tests and offline runs.
///
/// Rows are filtered by the query's date range (rows without a date always
/// match) and campaign filter; `group_by` is ignored, so callers seed rows
/// already shaped the way the module expects.
#[derive(Default)]
pub struct MockMetricsSource {
    rows: Vec<MetricRow>,
    error: Option<SourceError>,
    queries: Mutex<Vec<MetricsQuery>>,
}

impl MockMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<MetricRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Every fetch fails with `error`.
    pub fn with_error(error: SourceError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Queries received so far, oldest first.
    pub fn queries(&self) -> Vec<MetricsQuery> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn fetch_count(&self) -> usize {
        self.queries().len()
    }
}

#[async_trait]
impl MetricsSource for MockMetricsSource {
    async fn fetch(&self, query: &MetricsQuery) -> SourceResult<Vec<MetricRow>> {
        match self.queries.lock() {
            Ok(mut q) => q.push(query.clone()),
            Err(poisoned) => poisoned.into_inner().push(query.clone()),
        }

        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        Ok(self
            .rows
            .iter()
            .filter(|row| {
                row.date
                    .map_or(true, |d| d >= query.date_from && d <= query.date_to)
            })
            .filter(|row| {
                query.campaign_ids.is_empty() || query.campaign_ids.contains(&row.campaign_id)
            })
            .cloned()
            .collect())
    }

    fn source_name(&self) -> &str {
        "mock"
    }
}

/// Convenience constructor for seeding rows in tests.
pub fn metric_row(
    date: Option<chrono::NaiveDate>,
    campaign_id: &str,
    zone_id: Option<&str>,
    (impressions, clicks, conversions): (u64, u64, u64),
    (cost, revenue): (f64, f64),
) -> MetricRow {
    MetricRow {
        date,
        campaign_id: campaign_id.to_string(),
        zone_id: zone_id.map(str::to_string),
        impressions,
        clicks,
        conversions,
        cost,
        revenue,
    }
}
