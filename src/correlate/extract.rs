//! Identifier extraction from ticket text and HAR captures.
//!
//! Keys are normalised before they are collected: UUIDs lowercased, URLs
//! stripped of trailing punctuation. Output sets are ordered so the same
//! input always produces the same search order.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use super::capture::Capture;
use super::dashboard;
use crate::models::{CorrelationKey, KeyKind};

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("static regex")
});

// `account id: 123456`, `account_id=123456`, `accountId 123456`, `/accounts/123456`
static ACCOUNT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\baccount[ _-]?id\b[\s:=#]*|/accounts/)(\d{3,})\b").expect("static regex")
});

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("static regex"));

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '\'', '"'];

/// UUIDs, account ids and absolute URLs mentioned in `text`.
///
/// Log dashboard links are skipped: they carry a search of their own and are
/// picked up by [`dashboard::links_in`].
pub fn extract_from_text(text: &str) -> BTreeSet<CorrelationKey> {
    let text = dashboard::strip_links(text);
    let mut keys = scan_identifiers(&text);
    for m in URL.find_iter(&text) {
        let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if url.len() > "https://".len() {
            keys.insert(CorrelationKey::new(KeyKind::RequestUrl, url));
        }
    }
    keys
}

/// Identifiers from every well-formed record of a capture: URL path and
/// query, correlation headers, bodies, and the URL of each failed request.
pub fn extract_from_capture(capture: &Capture) -> BTreeSet<CorrelationKey> {
    let mut keys = BTreeSet::new();

    for record in &capture.records {
        keys.extend(scan_identifiers(&record.url));

        for (name, value) in &record.headers {
            if is_correlation_header(name) {
                keys.extend(uuids_in(value));
            }
        }

        for body in &record.bodies {
            match serde_json::from_str::<serde_json::Value>(body) {
                Ok(json) => collect_from_json(&json, None, &mut keys),
                Err(_) => keys.extend(scan_identifiers(body)),
            }
        }

        if record.is_failed() {
            keys.insert(CorrelationKey::new(KeyKind::RequestUrl, strip_query(&record.url)));
        }
    }

    keys
}

fn scan_identifiers(text: &str) -> BTreeSet<CorrelationKey> {
    let mut keys = uuids_in(text);
    for caps in ACCOUNT_ID.captures_iter(text) {
        keys.insert(CorrelationKey::new(KeyKind::AccountId, &caps[1]));
    }
    keys
}

fn uuids_in(text: &str) -> BTreeSet<CorrelationKey> {
    UUID.find_iter(text)
        .map(|m| CorrelationKey::new(KeyKind::Uuid, m.as_str().to_lowercase()))
        .collect()
}

fn is_correlation_header(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("request-id")
        || name.contains("correlation")
        || name.contains("trace")
}

fn is_account_field(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    normalized == "accountid"
}

fn collect_from_json(value: &serde_json::Value, field: Option<&str>, keys: &mut BTreeSet<CorrelationKey>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (name, child) in map {
                collect_from_json(child, Some(name), keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_from_json(item, field, keys);
            }
        }
        Value::Number(n) if field.is_some_and(is_account_field) => {
            if let Some(id) = n.as_u64() {
                keys.insert(CorrelationKey::new(KeyKind::AccountId, id.to_string()));
            }
        }
        Value::String(s) => {
            if field.is_some_and(is_account_field) && !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                keys.insert(CorrelationKey::new(KeyKind::AccountId, s.as_str()));
            }
            keys.extend(uuids_in(s));
        }
        _ => {}
    }
}

fn strip_query(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url
            .split(&['?', '#'][..])
            .next()
            .unwrap_or(url)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::capture::CaptureRecord;

    fn key(kind: KeyKind, value: &str) -> CorrelationKey {
        CorrelationKey::new(kind, value)
    }

    #[test]
    fn test_text_extracts_and_normalizes() {
        let text = "Customer (account id: 482913) hit 5C1E0F4A-2B7D-4E8A-9F10-3A2B1C0D9E8F again, \
                    see https://acme.freshservice.com/a/changes/55. Same as 5c1e0f4a-2b7d-4e8a-9f10-3a2b1c0d9e8f.";
        let keys = extract_from_text(text);
        assert_eq!(
            keys,
            BTreeSet::from([
                key(KeyKind::Uuid, "5c1e0f4a-2b7d-4e8a-9f10-3a2b1c0d9e8f"),
                key(KeyKind::AccountId, "482913"),
                key(KeyKind::RequestUrl, "https://acme.freshservice.com/a/changes/55"),
            ])
        );
    }

    #[test]
    fn test_account_id_variants() {
        for text in ["account_id=918273", "accountId: 918273", "GET /accounts/918273/users"] {
            let keys = extract_from_text(text);
            assert!(
                keys.contains(&key(KeyKind::AccountId, "918273")),
                "no account id in {text:?}"
            );
        }
        // Too short to be an account id
        assert!(extract_from_text("account id: 12").is_empty());
    }

    #[test]
    fn test_dashboard_links_are_not_request_urls() {
        let text = "See https://logs.haystack.es/app/discover#/?_a=(query:(language:lucene,query:'5c1e0f4a-2b7d-4e8a-9f10-3a2b1c0d9e8f')) \
                    and https://logs-in.haystack.es/goto/fcfcf7992bf3d65a6708060150547f37 for account id: 482913";
        let keys = extract_from_text(text);
        assert_eq!(keys, BTreeSet::from([key(KeyKind::AccountId, "482913")]));
    }

    #[test]
    fn test_text_without_identifiers_is_empty() {
        assert!(extract_from_text("the page is slow since yesterday").is_empty());
    }

    fn record(url: &str, status: u16, headers: &[(&str, &str)], bodies: &[&str]) -> CaptureRecord {
        CaptureRecord {
            url: url.to_string(),
            method: "GET".to_string(),
            status,
            headers: headers.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
            bodies: bodies.iter().map(|b| b.to_string()).collect(),
            timestamp: None,
        }
    }

    #[test]
    fn test_capture_sources() {
        let capture = Capture {
            records: vec![
                record(
                    "https://acme.freshservice.com/api/v2/accounts/771122/assets?include=type",
                    200,
                    &[("X-Trace-Id", "0A1B2C3D-4E5F-4061-8271-92A3B4C5D6E7"), ("Accept", "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")],
                    &[r#"{"data": {"accountId": "771122", "owner": {"id": "11111111-2222-4333-8444-555555555555"}}}"#],
                ),
                record(
                    "https://acme.freshservice.com/api/v2/changes?id=9",
                    503,
                    &[],
                    &["upstream timeout for request 99999999-8888-4777-8666-555555555555"],
                ),
            ],
            malformed: 0,
        };

        let keys = extract_from_capture(&capture);
        assert!(keys.contains(&key(KeyKind::AccountId, "771122")));
        assert!(keys.contains(&key(KeyKind::Uuid, "0a1b2c3d-4e5f-4061-8271-92a3b4c5d6e7")));
        assert!(keys.contains(&key(KeyKind::Uuid, "11111111-2222-4333-8444-555555555555")));
        assert!(keys.contains(&key(KeyKind::Uuid, "99999999-8888-4777-8666-555555555555")));
        assert!(keys.contains(&key(KeyKind::RequestUrl, "https://acme.freshservice.com/api/v2/changes")));
        // Non-correlation headers are ignored
        assert!(!keys.contains(&key(KeyKind::Uuid, "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")));
        // Successful requests do not contribute their URL
        assert_eq!(keys.iter().filter(|k| k.kind == KeyKind::RequestUrl).count(), 1);
    }

    #[test]
    fn test_same_identifier_in_text_and_capture_kept_once() {
        let capture = Capture {
            records: vec![record("https://x.test/api", 200, &[("x-request-id", "5C1E0F4A-2B7D-4E8A-9F10-3A2B1C0D9E8F")], &[])],
            malformed: 0,
        };
        let mut keys = extract_from_text("request 5c1e0f4a-2b7d-4e8a-9f10-3a2b1c0d9e8f failed");
        keys.extend(extract_from_capture(&capture));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_strip_query_falls_back_for_relative_urls() {
        assert_eq!(strip_query("/api/v2/changes?id=9#top"), "/api/v2/changes");
        assert_eq!(strip_query("https://x.test/a?b=1"), "https://x.test/a");
    }
}
