//! Log dashboard links pasted into tickets.
//!
//! An OpenSearch Dashboards discover link carries its own search: the query
//! string and time range live in the rison-encoded `_a` and `_g` state of the
//! URL fragment. A goto link is a short redirect to one and is expanded by
//! the log backend before it can be parsed.
//!
//! ```text
//! https://logs.example/app/discover#/?_g=(time:(from:'2025-10-22T18:30:00.000Z',to:now))
//!     &_a=(indexPatternTitle:'freshservice*',query:(language:lucene,query:'7f1c...'))
//! ```

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;

use crate::models::TimeWindow;

static DASHBOARD_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"/]+(?:/[\w.-]+)*?/(?:app/discover[^\s<>"]*|goto/[0-9a-f]+)"#)
        .expect("static regex")
});

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time:\(from:(?:'([^']*)'|([^,)]*)),to:(?:'([^']*)'|([^,)]*))\)").expect("static regex")
});

static QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"query:\(language:\w+,query:(?:'((?:[^'!]|!.)*)'|([^,)']*))\)").expect("static regex")
});

static INDEX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"indexPatternTitle:'([^']+)'").expect("static regex"));

static RELATIVE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^now(?:-(\d+)([smhdwMy]))?(?:/\w)?$").expect("static regex"));

// Rison ends many values with `)`, so only sentence punctuation is trimmed.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', '?'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardLink {
    /// Full discover URL.
    Discover(String),
    /// Short link that redirects to a discover URL.
    Goto(String),
}

impl DashboardLink {
    pub fn url(&self) -> &str {
        match self {
            Self::Discover(url) | Self::Goto(url) => url,
        }
    }
}

/// A search lifted from a discover link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardQuery {
    pub url: String,
    /// Host the link points at; selects the pod searched.
    pub host: String,
    pub index: Option<String>,
    pub query: String,
    /// `None` when the link's range is missing or unreadable; the ticket
    /// window is used instead.
    pub window: Option<TimeWindow>,
}

/// Dashboard links in `text`, first occurrence order, without repeats.
pub fn links_in(text: &str) -> Vec<DashboardLink> {
    let mut seen = HashSet::new();
    DASHBOARD_URL
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION))
        .filter(|url| seen.insert(url.to_string()))
        .map(|url| {
            if url.to_lowercase().contains("/goto/") {
                DashboardLink::Goto(url.to_string())
            } else {
                DashboardLink::Discover(url.to_string())
            }
        })
        .collect()
}

/// `text` with every dashboard link blanked out.
pub fn strip_links(text: &str) -> Cow<'_, str> {
    DASHBOARD_URL.replace_all(text, " ")
}

/// Read the query, index pattern and time range out of a discover URL.
/// Relative times (`now-15m`) resolve against `now`.
pub fn parse_discover(url: &str, now: DateTime<Utc>) -> anyhow::Result<DashboardQuery> {
    let parsed = url::Url::parse(url).context("Dashboard link is not a valid URL")?;
    if !parsed.path().contains("/app/discover") {
        anyhow::bail!("Dashboard link is not a discover link");
    }
    let host = parsed
        .host_str()
        .context("Dashboard link has no host")?
        .to_string();
    let fragment = parsed.fragment().context("Discover link has no search state")?;

    // `#/?_g=(...)&_a=(...)`
    let state = fragment.split_once('?').map_or(fragment, |(_, q)| q);
    let mut global = String::new();
    let mut app = String::new();
    for (name, value) in url::form_urlencoded::parse(state.as_bytes()) {
        match name.as_ref() {
            "_g" => global = value.into_owned(),
            "_a" => app = value.into_owned(),
            _ => {}
        }
    }

    let query = QUERY
        .captures(&app)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| clean_query(&unescape_rison(m.as_str())))
        .unwrap_or_default();
    if query.is_empty() {
        anyhow::bail!("Discover link has no search query");
    }

    let index = INDEX_PATTERN.captures(&app).map(|c| c[1].to_string());
    let window = TIME_RANGE.captures(&global).and_then(|c| {
        let from = c.get(1).or_else(|| c.get(2))?.as_str();
        let to = c.get(3).or_else(|| c.get(4))?.as_str();
        Some(TimeWindow::new(parse_time(from, now)?, parse_time(to, now)?))
    });

    Ok(DashboardQuery {
        url: url.to_string(),
        host,
        index,
        query,
        window,
    })
}

/// `!'` → `'`, `!!` → `!`
fn unescape_rison(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '!' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn clean_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_time(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let caps = RELATIVE_TIME.captures(value)?;
    let Some(amount) = caps.get(1) else {
        return Some(now);
    };
    let amount: i64 = amount.as_str().parse().ok()?;
    let offset = match &caps[2] {
        "s" => ChronoDuration::seconds(amount),
        "m" => ChronoDuration::minutes(amount),
        "h" => ChronoDuration::hours(amount),
        "d" => ChronoDuration::days(amount),
        "w" => ChronoDuration::weeks(amount),
        "M" => ChronoDuration::days(amount * 30),
        _ => ChronoDuration::days(amount * 365),
    };
    Some(now - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DISCOVER: &str = "https://logs-in.haystack.es/app/discover#/?_g=(filters:!(),refreshInterval:(pause:!t,value:0),time:(from:'2025-10-22T18:30:00.000Z',to:'2025-10-25T18:29:59.999Z'))&_a=(columns:!(host,message),filters:!(),index:'806f55e0',indexPatternTitle:'freshservice*',interval:auto,query:(language:lucene,query:'96a9d210-70ac-9097-920e-23791daf3c67%0A'),sort:!(!('@timestamp',desc)))";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 26, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_discover_link_supplies_query_and_window() {
        let q = parse_discover(DISCOVER, now()).unwrap();
        assert_eq!(q.host, "logs-in.haystack.es");
        assert_eq!(q.query, "96a9d210-70ac-9097-920e-23791daf3c67");
        assert_eq!(q.index.as_deref(), Some("freshservice*"));
        let window = q.window.unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 10, 22, 18, 30, 0).unwrap());
        assert_eq!(window.end.date_naive().to_string(), "2025-10-25");
    }

    #[test]
    fn test_percent_encoded_state_and_relative_range() {
        let url = "https://logs.haystack.es/app/discover#/?_g=(time:(from:now-15m,to:now))&_a=(query:(language:kuery,query:%27status:500%20AND%20path:%22%2Fapi%2Fv2%2Fchanges%22%27))";
        let q = parse_discover(url, now()).unwrap();
        assert_eq!(q.query, r#"status:500 AND path:"/api/v2/changes""#);
        assert_eq!(q.index, None);
        let window = q.window.unwrap();
        assert_eq!(window.start, now() - ChronoDuration::minutes(15));
        assert_eq!(window.end, now());
    }

    #[test]
    fn test_rison_escapes_in_query() {
        let url = "https://logs.haystack.es/app/discover#/?_a=(query:(language:lucene,query:'message:!'it!!s down!''))";
        let q = parse_discover(url, now()).unwrap();
        assert_eq!(q.query, "message:'it!s down'");
        // No time state: the caller falls back to its own window
        assert_eq!(q.window, None);
    }

    #[test]
    fn test_discover_link_without_query_is_rejected() {
        let url = "https://logs.haystack.es/app/discover#/?_g=(time:(from:now-1h,to:now))&_a=(columns:!(message))";
        let err = parse_discover(url, now()).unwrap_err();
        assert!(err.to_string().contains("no search query"));
        assert!(parse_discover("https://logs.haystack.es/app/discover", now()).is_err());
    }

    #[test]
    fn test_links_found_in_prose() {
        let text = format!(
            "Logs here: {DISCOVER}. Also https://logs-au.haystack.es/goto/fcfcf7992bf3d65a6708060150547f37, \
             and again {DISCOVER} plus https://acme.freshservice.com/a/changes/55"
        );
        let links = links_in(&text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], DashboardLink::Discover(DISCOVER.to_string()));
        assert_eq!(
            links[1],
            DashboardLink::Goto("https://logs-au.haystack.es/goto/fcfcf7992bf3d65a6708060150547f37".to_string())
        );
        let rest = strip_links(&text);
        assert!(!rest.contains("haystack"));
        assert!(rest.contains("https://acme.freshservice.com/a/changes/55"));
    }
}
