use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::source::{MetricRow, MetricsQuery, MetricsSource, SourceError, SourceResult};

/// HTTP client for the campaign tracker's statistics API.
#[derive(Clone)]
pub struct TrackerClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    rows: Vec<MetricRow>,
}

impl TrackerClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MetricsSource for TrackerClient {
    async fn fetch(&self, query: &MetricsQuery) -> SourceResult<Vec<MetricRow>> {
        let url = format!("{}/stats", self.base_url);

        let mut params = vec![
            ("date_from", query.date_from.to_string()),
            ("date_to", query.date_to.to_string()),
            ("group_by", query.group_by.as_str().to_string()),
        ];
        for id in &query.campaign_ids {
            params.push(("campaign_id", id.clone()));
        }

        let mut request = self.http.get(&url).query(&params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| SourceError::Network {
            message: err.to_string(),
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Auth {
                    message: format!("Tracker returned HTTP {}", status),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(SourceError::RateLimited),
            s if s.is_server_error() => return Err(SourceError::Unavailable),
            s if !s.is_success() => {
                return Err(SourceError::Network {
                    message: format!("Tracker returned HTTP {}", s),
                })
            }
            _ => {}
        }

        let stats = response
            .json::<StatsResponse>()
            .await
            .map_err(|err| SourceError::Format {
                message: err.to_string(),
            })?;

        tracing::debug!(
            group_by = query.group_by.as_str(),
            rows = stats.rows.len(),
            "Fetched tracker stats"
        );
        Ok(stats.rows)
    }

    fn source_name(&self) -> &str {
        "tracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GroupBy;
    use chrono::NaiveDate;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query() -> MetricsQuery {
        MetricsQuery::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 8).unwrap(),
            GroupBy::Day,
        )
    }

    const ROWS: &str = r#"{"rows": [
        {"date": "2024-05-08", "campaign_id": "c1", "impressions": 1000,
         "clicks": 12, "conversions": 2, "cost": 14.5, "revenue": 20.0}
    ]}"#;

    #[tokio::test]
    async fn fetch_sends_query_and_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .and(query_param("date_from", "2024-05-01"))
            .and(query_param("date_to", "2024-05-08"))
            .and(query_param("group_by", "day"))
            .and(query_param("campaign_id", "c1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ROWS, "application/json"))
            .mount(&server)
            .await;

        let client = TrackerClient::new(server.uri(), Some("secret".into()));
        let rows = client
            .fetch(&query().with_campaigns(vec!["c1".into()]))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].campaign_id, "c1");
        assert_eq!(rows[0].zone_id, None);
        assert_eq!(rows[0].conversions, 2);
    }

    async fn error_for(status: u16) -> SourceError {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        TrackerClient::new(server.uri(), None)
            .fetch(&query())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn maps_http_errors() {
        assert!(matches!(error_for(401).await, SourceError::Auth { .. }));
        assert!(matches!(error_for(403).await, SourceError::Auth { .. }));
        assert_eq!(error_for(429).await, SourceError::RateLimited);
        assert_eq!(error_for(503).await, SourceError::Unavailable);
        assert!(matches!(error_for(404).await, SourceError::Network { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_format_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
            .mount(&server)
            .await;

        let err = TrackerClient::new(server.uri(), None)
            .fetch(&query())
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Format { .. }));
    }

    #[tokio::test]
    async fn unreachable_tracker_is_network_error() {
        let client = TrackerClient::new("http://127.0.0.1:1".into(), None);
        let err = client.fetch(&query()).await.unwrap_err();
        assert!(matches!(err, SourceError::Network { .. }));
    }
}
