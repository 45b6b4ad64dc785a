//! Log correlation: identifiers in, ranked log evidence out.
//!
//! - `extract`: identifier extraction from text and captures
//! - `capture`: tolerant HAR parsing
//! - `dashboard`: searches lifted from pasted log dashboard links
//! - `logs`: the log search backend and its `_msearch` adapter

pub mod capture;
pub mod dashboard;
pub mod extract;
pub mod logs;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::{join, join_all};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{InvestigationError, LogSearchError};
use crate::models::{CorrelationKey, EvidenceItem, EvidenceSource, LogEntry, TimeWindow};
use dashboard::{DashboardLink, DashboardQuery};
use logs::LogSearchBackend;

/// Result of one correlation run.
#[derive(Debug, Default)]
pub struct Correlation {
    /// Ranked log evidence, best first.
    pub evidence: Vec<EvidenceItem>,
    /// Keys whose search failed, with the reason.
    pub failed_keys: Vec<(CorrelationKey, String)>,
    /// Dashboard searches that failed, by link URL.
    pub failed_dashboards: Vec<(String, String)>,
}

pub struct LogCorrelator {
    backend: Arc<dyn LogSearchBackend>,
    per_key_timeout: Duration,
    top_n: usize,
}

struct Merged {
    entry: LogEntry,
    matched: BTreeSet<String>,
}

impl LogCorrelator {
    pub fn new(backend: Arc<dyn LogSearchBackend>, per_key_timeout: Duration, top_n: usize) -> Self {
        Self {
            backend,
            per_key_timeout,
            top_n,
        }
    }

    /// Search every key inside `window` concurrently and merge the hits.
    ///
    /// An entry returned for several keys appears once and ranks by the
    /// number of distinct keys it matched, then by recency. Fails only when
    /// every search failed.
    pub async fn correlate(
        &self,
        keys: &BTreeSet<CorrelationKey>,
        window: &TimeWindow,
    ) -> Result<Correlation, InvestigationError> {
        self.correlate_with(keys, &[], window).await
    }

    /// As [`correlate`](Self::correlate), plus one search per dashboard
    /// query. A dashboard query runs in its own window when the link had
    /// one and counts as one more searched key for ranking.
    pub async fn correlate_with(
        &self,
        keys: &BTreeSet<CorrelationKey>,
        dashboards: &[DashboardQuery],
        window: &TimeWindow,
    ) -> Result<Correlation, InvestigationError> {
        let total = keys.len() + dashboards.len();
        if total == 0 {
            return Ok(Correlation::default());
        }

        let key_searches = join_all(keys.iter().map(|key| async move {
            (key, self.bounded_search(self.backend.search(key, window)).await)
        }));
        let dashboard_searches = join_all(dashboards.iter().map(|query| async move {
            let scope = query.window.unwrap_or(*window);
            let outcome = self.bounded_search(self.backend.search_dashboard(query, &scope)).await;
            (query, scope, outcome)
        }));
        let (key_outcomes, dashboard_outcomes) = join(key_searches, dashboard_searches).await;

        let mut merged: HashMap<String, Merged> = HashMap::new();
        let mut failed_keys = Vec::new();
        let mut failed_dashboards = Vec::new();
        for (key, outcome) in key_outcomes {
            match outcome {
                Ok(entries) => merge(&mut merged, entries, window, &key.value),
                Err(e) => {
                    tracing::warn!("Log search for {key} failed: {e}");
                    failed_keys.push((key.clone(), e.to_string()));
                }
            }
        }
        for (query, scope, outcome) in dashboard_outcomes {
            match outcome {
                Ok(entries) => merge(&mut merged, entries, &scope, &query.query),
                Err(e) => {
                    tracing::warn!("Dashboard search {} failed: {e}", query.url);
                    failed_dashboards.push((query.url.clone(), e.to_string()));
                }
            }
        }

        if failed_keys.len() + failed_dashboards.len() == total {
            return Err(InvestigationError::CorrelationUnavailable(format!(
                "all {total} log searches failed"
            )));
        }

        let mut ranked: Vec<Merged> = merged.into_values().collect();
        ranked.sort_by(|a, b| {
            b.matched
                .len()
                .cmp(&a.matched.len())
                .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        ranked.truncate(self.top_n);

        let searched = total as f32;
        let evidence: Vec<EvidenceItem> = ranked
            .into_iter()
            .filter_map(|m| {
                let score = m.matched.len() as f32 / searched;
                let identifier = m.matched.into_iter().collect::<Vec<_>>().join(", ");
                EvidenceItem::new(
                    EvidenceSource::Log,
                    Some(identifier),
                    format!("[{}] {}", m.entry.timestamp.to_rfc3339(), m.entry.message),
                    score,
                    format!("log:{}", m.entry.id),
                )
            })
            .collect();

        tracing::info!(
            "Correlated {} keys and {} dashboard queries: {} log entries kept, {} searches failed",
            keys.len(),
            dashboards.len(),
            evidence.len(),
            failed_keys.len() + failed_dashboards.len()
        );
        Ok(Correlation {
            evidence,
            failed_keys,
            failed_dashboards,
        })
    }

    /// Turn pasted dashboard links into searches. Goto links are expanded
    /// through the backend first; links that cannot be read are returned
    /// with the reason.
    pub async fn resolve_links(
        &self,
        links: &[DashboardLink],
        now: DateTime<Utc>,
    ) -> (Vec<DashboardQuery>, Vec<(String, String)>) {
        let resolved = join_all(links.iter().map(|link| async move {
            let discover_url = match link {
                DashboardLink::Discover(url) => url.clone(),
                DashboardLink::Goto(url) => match self.bounded_search(self.backend.expand_goto(url)).await {
                    Ok(expanded) => expanded,
                    Err(e) => return Err(e.to_string()),
                },
            };
            dashboard::parse_discover(&discover_url, now).map_err(|e| format!("{e:#}"))
        }));

        let mut queries = Vec::new();
        let mut failed = Vec::new();
        for (link, outcome) in links.iter().zip(resolved.await) {
            match outcome {
                Ok(query) => queries.push(query),
                Err(reason) => {
                    tracing::warn!("Dashboard link {} unusable: {reason}", link.url());
                    failed.push((link.url().to_string(), reason));
                }
            }
        }
        (queries, failed)
    }

    async fn bounded_search<T>(
        &self,
        search: impl std::future::Future<Output = Result<T, LogSearchError>>,
    ) -> Result<T, LogSearchError> {
        match tokio::time::timeout(self.per_key_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(LogSearchError::Timeout(self.per_key_timeout)),
        }
    }
}

/// Fold `entries` inside `scope` into `merged`, tagging each with `matched`.
fn merge(merged: &mut HashMap<String, Merged>, entries: Vec<LogEntry>, scope: &TimeWindow, matched: &str) {
    for entry in entries.into_iter().filter(|e| scope.contains(e.timestamp)) {
        merged
            .entry(entry.id.clone())
            .or_insert_with(|| Merged {
                entry,
                matched: BTreeSet::new(),
            })
            .matched
            .insert(matched.to_string());
    }
}

/// Window searched for a ticket.
///
/// With capture timestamps: earliest minus `padding` to latest plus
/// `padding`. Without: `lookback` before the ticket was created until `now`.
pub fn search_window(
    capture_span: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ticket_created_at: DateTime<Utc>,
    padding: ChronoDuration,
    lookback: ChronoDuration,
    now: DateTime<Utc>,
) -> TimeWindow {
    match capture_span {
        Some((earliest, latest)) => TimeWindow::new(earliest - padding, latest + padding),
        None => TimeWindow::new(ticket_created_at - lookback, now.max(ticket_created_at)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyKind;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 17, 10, min, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(at(0), at(59))
    }

    fn entry(id: &str, min: u32, key: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: at(min),
            message: format!("entry {id}"),
            matched_key: key.to_string(),
        }
    }

    /// Serves canned entries per key value; "down" keys fail, "slow" keys hang.
    struct FakeBackend {
        hits: HashMap<String, Vec<LogEntry>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LogSearchBackend for FakeBackend {
        async fn search(&self, key: &CorrelationKey, _window: &TimeWindow) -> Result<Vec<LogEntry>, LogSearchError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            match key.value.as_str() {
                v if v.starts_with("down") => Err(LogSearchError::Backend("connection reset".into())),
                v if v.starts_with("slow") => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
                v => Ok(self.hits.get(v).cloned().unwrap_or_default()),
            }
        }

        async fn search_dashboard(&self, query: &DashboardQuery, _window: &TimeWindow) -> Result<Vec<LogEntry>, LogSearchError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.hits.get(&query.query).cloned().unwrap_or_default())
        }

        async fn expand_goto(&self, url: &str) -> Result<String, LogSearchError> {
            match url.rsplit('/').next() {
                Some("abc123") => Ok(format!("{DISCOVER_BASE}(from:now-1h,to:now))&_a=(query:(language:lucene,query:'status:500'))")),
                _ => Err(LogSearchError::Backend("redirected to login".into())),
            }
        }
    }

    const DISCOVER_BASE: &str = "https://logs.haystack.es/app/discover#/?_g=(time:";

    fn dashboard(query: &str, window: Option<TimeWindow>) -> DashboardQuery {
        DashboardQuery {
            url: format!("https://logs.haystack.es/app/discover#/{query}"),
            host: "logs.haystack.es".into(),
            index: None,
            query: query.into(),
            window,
        }
    }

    fn correlator(hits: Vec<(&str, Vec<LogEntry>)>) -> (LogCorrelator, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend {
            hits: hits.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            calls: AtomicUsize::new(0),
        });
        (
            LogCorrelator::new(backend.clone(), Duration::from_millis(200), 25),
            backend,
        )
    }

    fn keys(values: &[&str]) -> BTreeSet<CorrelationKey> {
        values.iter().map(|v| CorrelationKey::new(KeyKind::AccountId, *v)).collect()
    }

    #[tokio::test]
    async fn test_no_keys_makes_no_calls() {
        let (c, backend) = correlator(vec![]);
        let result = c.correlate(&BTreeSet::new(), &window()).await.unwrap();
        assert!(result.evidence.is_empty());
        assert_eq!(backend.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_key_match_outranks_single_key() {
        // "shared" is newer-inserted and older in time than "solo", but matches twice
        let (c, _) = correlator(vec![
            ("111", vec![entry("solo", 50, "111"), entry("shared", 5, "111")]),
            ("222", vec![entry("shared", 5, "222")]),
        ]);
        let result = c.correlate(&keys(&["111", "222"]), &window()).await.unwrap();

        let refs: Vec<&str> = result.evidence.iter().map(|e| e.origin_ref()).collect();
        assert_eq!(refs, vec!["log:shared", "log:solo"]);
        assert_eq!(result.evidence[0].identifier(), Some("111, 222"));
        assert!((result.evidence[0].relevance_score() - 1.0).abs() < 1e-6);
        assert!((result.evidence[1].relevance_score() - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let (c, _) = correlator(vec![("111", vec![entry("a", 10, "111")])]);
        let result = c.correlate(&keys(&["111", "down-1"]), &window()).await.unwrap();
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.failed_keys.len(), 1);
        assert_eq!(result.failed_keys[0].0.value, "down-1");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_key() {
        let (c, _) = correlator(vec![("111", vec![entry("a", 10, "111")])]);
        let result = c.correlate(&keys(&["111", "slow-1"]), &window()).await.unwrap();
        assert_eq!(result.evidence.len(), 1);
        assert!(result.failed_keys[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn test_total_outage_is_unavailable() {
        let (c, _) = correlator(vec![]);
        let err = c.correlate(&keys(&["down-1", "slow-2"]), &window()).await.unwrap_err();
        assert!(matches!(err, InvestigationError::CorrelationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_entries_outside_window_and_over_top_n_dropped() {
        let mut many: Vec<LogEntry> = (0..40).map(|i| entry(&format!("e{i:02}"), i, "111")).collect();
        let mut outside = entry("late", 0, "111");
        outside.timestamp = at(59) + ChronoDuration::hours(2);
        many.push(outside);

        let (c, _) = correlator(vec![("111", many)]);
        let result = c.correlate(&keys(&["111"]), &window()).await.unwrap();
        assert_eq!(result.evidence.len(), 25);
        // Newest first among equal match counts
        assert_eq!(result.evidence[0].origin_ref(), "log:e39");
        assert!(result.evidence.iter().all(|e| e.origin_ref() != "log:late"));
    }

    #[tokio::test]
    async fn test_dashboard_query_searches_its_own_window() {
        let day_before = at(30) - ChronoDuration::days(1);
        let mut old = entry("old", 30, "status:500");
        old.timestamp = day_before;
        let (c, _) = correlator(vec![("status:500", vec![old, entry("recent", 10, "status:500")])]);

        let own = TimeWindow::new(day_before - ChronoDuration::hours(1), day_before + ChronoDuration::hours(1));
        let result = c
            .correlate_with(&BTreeSet::new(), &[dashboard("status:500", Some(own))], &window())
            .await
            .unwrap();
        let refs: Vec<&str> = result.evidence.iter().map(|e| e.origin_ref()).collect();
        assert_eq!(refs, vec!["log:old"]);
        assert_eq!(result.evidence[0].identifier(), Some("status:500"));
    }

    #[tokio::test]
    async fn test_dashboard_and_key_hits_merge() {
        let (c, backend) = correlator(vec![
            ("111", vec![entry("shared", 5, "111")]),
            ("account_id:111 AND status:500", vec![entry("shared", 5, "q"), entry("other", 50, "q")]),
        ]);
        let result = c
            .correlate_with(&keys(&["111"]), &[dashboard("account_id:111 AND status:500", None)], &window())
            .await
            .unwrap();
        assert_eq!(backend.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(result.evidence[0].origin_ref(), "log:shared");
        assert!((result.evidence[0].relevance_score() - 1.0).abs() < 1e-6);
        assert!(result.failed_dashboards.is_empty());
    }

    #[tokio::test]
    async fn test_goto_links_expand_or_report() {
        let (c, _) = correlator(vec![]);
        let links = vec![
            DashboardLink::Goto("https://logs.haystack.es/goto/abc123".into()),
            DashboardLink::Goto("https://logs.haystack.es/goto/def456".into()),
            DashboardLink::Discover("https://logs.haystack.es/app/discover#/?_a=(columns:!(message))".into()),
        ];
        let (queries, failed) = c.resolve_links(&links, at(30)).await;

        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].query, "status:500");
        assert_eq!(queries[0].window, Some(TimeWindow::new(at(30) - ChronoDuration::hours(1), at(30))));
        assert_eq!(failed.len(), 2);
        assert!(failed[0].1.contains("redirected to login"));
        assert!(failed[1].1.contains("no search query"));
    }

    #[test]
    fn test_window_from_capture_span() {
        let w = search_window(
            Some((at(10), at(20))),
            at(0),
            ChronoDuration::minutes(30),
            ChronoDuration::hours(24),
            at(59),
        );
        assert_eq!(w.start, at(10) - ChronoDuration::minutes(30));
        assert_eq!(w.end, at(20) + ChronoDuration::minutes(30));
    }

    #[test]
    fn test_window_without_capture_uses_lookback() {
        let w = search_window(None, at(30), ChronoDuration::minutes(30), ChronoDuration::hours(24), at(45));
        assert_eq!(w.start, at(30) - ChronoDuration::hours(24));
        assert_eq!(w.end, at(45));
    }
}
