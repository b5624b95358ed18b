//! Result store client for fired alerts
//!
//! ElastAlert records every alert it sends in its status index. The
//! reconciler reads those records through [`ResultStore`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// A fired-alert record as reported by the alerting engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredAlert {
    /// Document identifier in the result store
    pub id: String,
    /// Title of the rule that fired
    pub rule_name: Option<String>,
    /// When the triggering event happened
    pub match_time: Option<DateTime<Utc>>,
}

/// Read-only access to fired-alert records
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Records at or after `since`, oldest first, at most `limit` of them
    async fn fired_alerts(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<FiredAlert>>;
}

/// Connection settings for Elasticsearch
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `https://localhost:9200`
    pub endpoint: String,
    /// ElastAlert status index
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:9200".to_string(),
            index: "elastalert_status".to_string(),
            username: None,
            password: None,
            accept_invalid_certs: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Elasticsearch-backed result store
pub struct ElasticsearchClient {
    config: ElasticsearchConfig,
    client: reqwest::Client,
}

impl ElasticsearchClient {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn search_url(&self) -> String {
        format!(
            "{}/{}/_search",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index
        )
    }
}

/// Query for sent alerts in a time range, oldest first
pub(crate) fn search_body(since: DateTime<Utc>, limit: usize) -> serde_json::Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    { "term": { "alert_sent": true } },
                    { "range": { "@timestamp": { "gte": since.to_rfc3339() } } }
                ]
            }
        },
        "sort": [{ "@timestamp": { "order": "asc" } }],
        "size": limit
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: StatusRecord,
}

#[derive(Debug, Default, Deserialize)]
struct StatusRecord {
    rule_name: Option<String>,
    match_time: Option<String>,
    #[serde(rename = "@timestamp")]
    timestamp: Option<String>,
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub(crate) fn parse_hits(body: &str) -> Result<Vec<FiredAlert>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| Error::StoreUnavailable(format!("Unexpected search response: {}", e)))?;

    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| {
            let match_time = hit
                .source
                .match_time
                .as_deref()
                .and_then(parse_time)
                .or_else(|| hit.source.timestamp.as_deref().and_then(parse_time));

            FiredAlert {
                id: hit.id,
                rule_name: hit.source.rule_name,
                match_time,
            }
        })
        .collect())
}

#[async_trait::async_trait]
impl ResultStore for ElasticsearchClient {
    async fn fired_alerts(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<FiredAlert>> {
        let url = self.search_url();
        tracing::debug!(url = %url, since = %since, limit, "querying fired alerts");

        let mut request = self.client.post(&url).json(&search_body(since, limit));
        if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to query {}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::StoreUnavailable(format!(
                "Search request failed: {} - {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read response: {}", e)))?;

        parse_hits(&body)
    }
}

/// Mock result store for testing
#[derive(Debug, Clone, Default)]
pub struct MockResultStore {
    records: Vec<FiredAlert>,
    unavailable: bool,
}

impl MockResultStore {
    pub fn new(records: Vec<FiredAlert>) -> Self {
        Self {
            records,
            unavailable: false,
        }
    }

    /// A store that fails every query
    pub fn unavailable() -> Self {
        Self {
            records: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait::async_trait]
impl ResultStore for MockResultStore {
    async fn fired_alerts(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<FiredAlert>> {
        if self.unavailable {
            return Err(Error::StoreUnavailable("connection refused".to_string()));
        }

        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.match_time.map_or(true, |t| t >= since))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.match_time);
        records.truncate(limit);

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body() {
        let since = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = search_body(since, 1000);

        assert_eq!(body["size"], 1000);
        assert_eq!(body["query"]["bool"]["must"][0]["term"]["alert_sent"], true);
        assert_eq!(
            body["query"]["bool"]["must"][1]["range"]["@timestamp"]["gte"],
            "2024-05-01T10:00:00+00:00"
        );
        assert_eq!(body["sort"][0]["@timestamp"]["order"], "asc");
    }

    #[test]
    fn test_parse_hits() {
        let body = r#"{
            "took": 3,
            "hits": {
                "total": {"value": 3},
                "hits": [
                    {"_id": "a1", "_source": {"rule_name": "T1", "match_time": "2024-05-01T10:05:00.123456Z", "@timestamp": "2024-05-01T10:06:00Z", "alert_sent": true}},
                    {"_id": "a2", "_source": {"rule_name": "T2", "@timestamp": "2024-05-01T10:07:00Z"}},
                    {"_id": "a3", "_source": {"match_time": "not a time"}}
                ]
            }
        }"#;

        let alerts = parse_hits(body).unwrap();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].rule_name.as_deref(), Some("T1"));
        assert_eq!(
            alerts[0].match_time.unwrap().to_rfc3339(),
            "2024-05-01T10:05:00.123456+00:00"
        );
        assert_eq!(
            alerts[1].match_time.unwrap().to_rfc3339(),
            "2024-05-01T10:07:00+00:00"
        );
        assert_eq!(alerts[2].rule_name, None);
        assert_eq!(alerts[2].match_time, None);
    }

    #[test]
    fn test_parse_hits_rejects_garbage() {
        assert!(matches!(
            parse_hits("<html>502</html>"),
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_search_url_trims_slash() {
        let client = ElasticsearchClient::new(ElasticsearchConfig {
            endpoint: "http://es:9200/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.search_url(), "http://es:9200/elastalert_status/_search");
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let client = ElasticsearchClient::new(ElasticsearchConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let result = client.fired_alerts(Utc::now(), 10).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }
}
