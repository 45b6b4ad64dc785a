use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use super::dashboard::DashboardQuery;
use crate::config::LogSearchConfig;
use crate::error::LogSearchError;
use crate::models::{CorrelationKey, LogEntry, TimeWindow};
use crate::retry::RetryPolicy;

/// Production log search, one key at a time.
#[async_trait]
pub trait LogSearchBackend: Send + Sync {
    async fn search(
        &self,
        key: &CorrelationKey,
        window: &TimeWindow,
    ) -> Result<Vec<LogEntry>, LogSearchError>;

    /// Run a search lifted from a dashboard link on the pod the link points at.
    async fn search_dashboard(
        &self,
        query: &DashboardQuery,
        _window: &TimeWindow,
    ) -> Result<Vec<LogEntry>, LogSearchError> {
        Err(LogSearchError::Backend(format!(
            "dashboard search not supported for {}",
            query.host
        )))
    }

    /// Follow a goto short link to the discover URL it redirects to.
    async fn expand_goto(&self, url: &str) -> Result<String, LogSearchError> {
        Err(LogSearchError::Backend(format!("cannot expand {url}")))
    }
}

/// OpenSearch Dashboards `_msearch` client.
pub struct HaystackClient {
    client: reqwest::Client,
    config: LogSearchConfig,
    retry: RetryPolicy,
}

impl HaystackClient {
    pub fn new(client: reqwest::Client, config: LogSearchConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }

    /// Known log host serving `host`. The session cookie is never sent anywhere else.
    fn pod_base_url(&self, host: &str) -> anyhow::Result<&str> {
        self.config
            .base_url_for_host(host)
            .with_context(|| format!("{host} is not a configured log host"))
    }

    async fn search_once(
        &self,
        base_url: &str,
        index: &str,
        query: &str,
        matched: &str,
        window: &TimeWindow,
    ) -> anyhow::Result<Vec<LogEntry>> {
        let url = format!("{}/internal/_msearch", base_url.trim_end_matches('/'));
        let body = msearch_body(index, query, window, self.config.max_hits_per_key);

        let mut req = self
            .client
            .post(&url)
            .header("osd-xsrf", "true")
            .json(&body);
        if let Some(cookie) = &self.config.session_cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }

        let resp = req.send().await.context("Failed to call log search API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Log search API returned {status}: {body}");
        }

        // An expired session answers 200 with the login page
        let text = resp.text().await.context("Failed to read log search response")?;
        let parsed: MsearchEnvelope = serde_json::from_str(&text)
            .context("Log search response is not JSON (session expired?)")?;
        Ok(parsed.into_entries(matched))
    }

    async fn expand_once(&self, url: &str) -> anyhow::Result<String> {
        let mut req = self.client.head(url);
        if let Some(cookie) = &self.config.session_cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        let resp = req.send().await.context("Failed to follow dashboard link")?;
        check_expanded(resp.url().as_str())
    }
}

/// A goto link must land on a discover page; a login page means the session expired.
fn check_expanded(final_url: &str) -> anyhow::Result<String> {
    let lower = final_url.to_lowercase();
    if lower.contains("accounts.google.com") || lower.contains("login") {
        anyhow::bail!("Dashboard link redirected to a login page (session expired?)");
    }
    if !final_url.contains("/app/discover") {
        anyhow::bail!("Dashboard link did not resolve to a discover page: {final_url}");
    }
    Ok(final_url.to_string())
}

#[async_trait]
impl LogSearchBackend for HaystackClient {
    async fn search(
        &self,
        key: &CorrelationKey,
        window: &TimeWindow,
    ) -> Result<Vec<LogEntry>, LogSearchError> {
        let query = query_string_for(key);
        let query = query.as_str();
        let (base_url, index) = (self.config.base_url.as_str(), self.config.index.as_str());
        self.retry
            .run("log search", |_| true, move || {
                self.search_once(base_url, index, query, &key.value, window)
            })
            .await
            .map_err(|e| LogSearchError::Backend(format!("{e:#}")))
    }

    async fn search_dashboard(
        &self,
        query: &DashboardQuery,
        window: &TimeWindow,
    ) -> Result<Vec<LogEntry>, LogSearchError> {
        let base_url = self
            .pod_base_url(&query.host)
            .map_err(|e| LogSearchError::Backend(format!("{e:#}")))?;
        let index = query.index.as_deref().unwrap_or(&self.config.index);
        self.retry
            .run("dashboard log search", |_| true, move || {
                self.search_once(base_url, index, &query.query, &query.query, window)
            })
            .await
            .map_err(|e| LogSearchError::Backend(format!("{e:#}")))
    }

    async fn expand_goto(&self, url: &str) -> Result<String, LogSearchError> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        self.pod_base_url(&host)
            .map_err(|e| LogSearchError::Backend(format!("{e:#}")))?;
        self.retry
            .run("dashboard link expansion", |_| true, move || self.expand_once(url))
            .await
            .map_err(|e| LogSearchError::Backend(format!("{e:#}")))
    }
}

/// Lucene query for a key: the value as a quoted phrase.
pub fn query_string_for(key: &CorrelationKey) -> String {
    format!("\"{}\"", key.value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn msearch_body(index: &str, query: &str, window: &TimeWindow, size: usize) -> serde_json::Value {
    json!({
        "searches": [{
            "header": { "index": index },
            "body": {
                "size": size,
                "sort": [{ "@timestamp": { "order": "asc", "unmapped_type": "boolean" } }],
                "query": {
                    "bool": {
                        "must": [{
                            "query_string": {
                                "query": query,
                                "analyze_wildcard": true,
                                "default_operator": "AND"
                            }
                        }],
                        "filter": [{
                            "range": {
                                "@timestamp": {
                                    "gte": format_ts(&window.start),
                                    "lte": format_ts(&window.end),
                                    "format": "strict_date_optional_time"
                                }
                            }
                        }]
                    }
                },
                "track_total_hits": false
            }
        }]
    })
}

// ─── Response shape ──────────────────────────────────────

#[derive(Deserialize)]
struct MsearchEnvelope {
    body: MsearchBody,
}

#[derive(Deserialize)]
struct MsearchBody {
    #[serde(default)]
    responses: Vec<MsearchResponse>,
}

#[derive(Deserialize)]
struct MsearchResponse {
    #[serde(default)]
    hits: Option<HitsEnvelope>,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
}

impl MsearchEnvelope {
    fn into_entries(self, matched_key: &str) -> Vec<LogEntry> {
        self.body
            .responses
            .into_iter()
            .next()
            .and_then(|r| r.hits)
            .map(|h| h.hits)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| {
                let message = hit.source.get("message")?.as_str()?.to_string();
                let timestamp = hit
                    .source
                    .get("@timestamp")
                    .and_then(|t| t.as_str())
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())?
                    .with_timezone(&Utc);
                Some(LogEntry {
                    id: format!("{}/{}", hit.index, hit.id),
                    timestamp,
                    message,
                    matched_key: matched_key.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyKind;
    use chrono::TimeZone;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 10, 17, 9, 45, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 17, 10, 45, 0).unwrap(),
        )
    }

    #[test]
    fn test_query_string_quotes_value() {
        let key = CorrelationKey::new(KeyKind::RequestUrl, "https://x.test/a\"b");
        assert_eq!(query_string_for(&key), r#""https://x.test/a\"b""#);
    }

    #[test]
    fn test_msearch_body_shape() {
        let body = msearch_body("freshservice*", "\"918273\"", &window(), 2000);
        let search = &body["searches"][0];
        assert_eq!(search["header"]["index"], "freshservice*");
        assert_eq!(search["body"]["size"], 2000);
        let range = &search["body"]["query"]["bool"]["filter"][0]["range"]["@timestamp"];
        assert_eq!(range["gte"], "2025-10-17T09:45:00.000Z");
        assert_eq!(range["lte"], "2025-10-17T10:45:00.000Z");
    }

    #[test]
    fn test_parse_hits_skips_entries_without_message() {
        let raw = r#"{"body": {"responses": [{"hits": {"hits": [
            {"_index": "fs-2025.10.17", "_id": "a1", "_source": {"@timestamp": "2025-10-17T10:00:00.000Z", "message": "Completed 500 for account 918273"}},
            {"_index": "fs-2025.10.17", "_id": "a2", "_source": {"@timestamp": "2025-10-17T10:00:01.000Z"}}
        ]}}]}}"#;
        let envelope: MsearchEnvelope = serde_json::from_str(raw).unwrap();
        let entries = envelope.into_entries("918273");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "fs-2025.10.17/a1");
        assert_eq!(entries[0].matched_key, "918273");
    }

    #[test]
    fn test_expanded_link_must_reach_discover() {
        let ok = "https://logs.haystack.es/app/discover#/?_a=(query:(language:lucene,query:'x'))";
        assert_eq!(check_expanded(ok).unwrap(), ok);
        assert!(check_expanded("https://accounts.google.com/o/oauth2/auth?x=1")
            .unwrap_err()
            .to_string()
            .contains("login page"));
        assert!(check_expanded("https://logs.haystack.es/app/home").is_err());
    }

    #[tokio::test]
    async fn test_dashboard_search_refuses_unknown_host() {
        let client = HaystackClient::new(reqwest::Client::new(), LogSearchConfig::default(), RetryPolicy::none());
        let query = DashboardQuery {
            url: "https://logs.attacker.test/app/discover#/".into(),
            host: "logs.attacker.test".into(),
            index: None,
            query: "x".into(),
            window: None,
        };
        let err = client.search_dashboard(&query, &window()).await.unwrap_err();
        assert!(err.to_string().contains("not a configured log host"));
        let err = client.expand_goto("https://logs.attacker.test/goto/abc123").await.unwrap_err();
        assert!(err.to_string().contains("not a configured log host"));
    }

    #[test]
    fn test_empty_responses_yield_nothing() {
        let envelope: MsearchEnvelope = serde_json::from_str(r#"{"body": {"responses": []}}"#).unwrap();
        assert!(envelope.into_entries("x").is_empty());
    }
}
