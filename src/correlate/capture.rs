//! HAR capture parsing.
//!
//! Parsing is tolerant: the document must be JSON with a `log.entries`
//! array, but an entry that does not have the expected shape is skipped and
//! counted rather than failing the whole capture.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::CaptureError;

/// Response/request bodies longer than this are truncated before extraction.
const MAX_BODY_CHARS: usize = 64 * 1024;

/// One request/response pair from a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub url: String,
    pub method: String,
    pub status: u16,
    /// Request headers followed by response headers, names as sent.
    pub headers: Vec<(String, String)>,
    /// Request payload and response content, when present.
    pub bodies: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CaptureRecord {
    pub fn is_failed(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub records: Vec<CaptureRecord>,
    /// Entries skipped because they could not be read.
    pub malformed: usize,
}

impl Capture {
    pub fn parse(json: &str) -> Result<Self, CaptureError> {
        let doc: serde_json::Value =
            serde_json::from_str(json).map_err(|e| CaptureError::Invalid(e.to_string()))?;
        let entries = doc
            .get("log")
            .and_then(|l| l.get("entries"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| CaptureError::Invalid("missing log.entries".to_string()))?;

        let mut capture = Capture::default();
        for entry in entries {
            match serde_json::from_value::<HarEntry>(entry.clone()) {
                Ok(entry) => capture.records.push(entry.into_record()),
                Err(e) => {
                    tracing::debug!("Skipping malformed capture entry: {e}");
                    capture.malformed += 1;
                }
            }
        }

        if capture.malformed > 0 {
            tracing::warn!(
                "Capture: {} entries read, {} malformed entries skipped",
                capture.records.len(),
                capture.malformed
            );
        }
        Ok(capture)
    }

    /// Earliest and latest record timestamps, if any record carries one.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut stamps = self.records.iter().filter_map(|r| r.timestamp);
        let first = stamps.next()?;
        Some(stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }
}

// ─── HAR wire format ─────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarEntry {
    #[serde(default)]
    started_date_time: Option<String>,
    request: HarRequest,
    response: HarResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    url: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    post_data: Option<HarContent>,
}

#[derive(Deserialize)]
struct HarResponse {
    status: i64,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    content: Option<HarContent>,
}

#[derive(Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct HarContent {
    #[serde(default)]
    text: Option<String>,
}

impl HarEntry {
    fn into_record(self) -> CaptureRecord {
        let timestamp = self
            .started_date_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        let headers = self
            .request
            .headers
            .into_iter()
            .chain(self.response.headers)
            .map(|h| (h.name, h.value))
            .collect();

        let bodies = [self.request.post_data, self.response.content]
            .into_iter()
            .flatten()
            .filter_map(|c| c.text)
            .filter(|t| !t.trim().is_empty())
            .map(|t| truncate_chars(t, MAX_BODY_CHARS))
            .collect();

        CaptureRecord {
            url: self.request.url,
            method: self.request.method,
            // HAR uses 0 (or -1) for aborted requests
            status: u16::try_from(self.response.status).unwrap_or(0),
            headers,
            bodies,
            timestamp,
        }
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAR: &str = r#"{
      "log": {
        "version": "1.2",
        "entries": [
          {
            "startedDateTime": "2025-10-17T10:15:00.000Z",
            "request": {
              "method": "GET",
              "url": "https://acme.freshservice.com/api/v2/tickets?page=2",
              "headers": [{"name": "Accept", "value": "application/json"}]
            },
            "response": {"status": 200, "headers": [], "content": {"text": "{}"}}
          },
          {"request": {"url": 42}, "response": {}},
          {
            "startedDateTime": "2025-10-17T10:20:30.000+05:30",
            "request": {
              "method": "POST",
              "url": "https://acme.freshservice.com/api/v2/changes",
              "headers": [],
              "postData": {"text": "{\"account_id\": 918273}"}
            },
            "response": {
              "status": 500,
              "headers": [{"name": "X-Request-Id", "value": "5C1E0F4A-2B7D-4E8A-9F10-3A2B1C0D9E8F"}],
              "content": {"text": "Internal Server Error"}
            }
          }
        ]
      }
    }"#;

    #[test]
    fn test_parse_skips_malformed_entries() {
        let capture = Capture::parse(HAR).unwrap();
        assert_eq!(capture.records.len(), 2);
        assert_eq!(capture.malformed, 1);
        assert!(!capture.records[0].is_failed());
        assert!(capture.records[1].is_failed());
        assert_eq!(capture.records[1].bodies.len(), 2);
    }

    #[test]
    fn test_time_span_uses_utc() {
        let capture = Capture::parse(HAR).unwrap();
        let (earliest, latest) = capture.time_span().unwrap();
        // 10:20:30+05:30 is 04:50:30Z, earlier than 10:15Z
        assert_eq!(earliest.to_rfc3339(), "2025-10-17T04:50:30+00:00");
        assert_eq!(latest.to_rfc3339(), "2025-10-17T10:15:00+00:00");
    }

    #[test]
    fn test_not_json_is_invalid() {
        assert!(matches!(Capture::parse("<html>"), Err(CaptureError::Invalid(_))));
        assert!(matches!(Capture::parse(r#"{"log": {}}"#), Err(CaptureError::Invalid(_))));
    }

    #[test]
    fn test_empty_capture_has_no_span() {
        let capture = Capture::parse(r#"{"log": {"entries": []}}"#).unwrap();
        assert!(capture.records.is_empty());
        assert!(capture.time_span().is_none());
    }
}
