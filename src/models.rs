use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Ticket,
    Log,
    Code,
    Doc,
}

/// A retrieved artifact used to ground an answer.
///
/// Fields are private: an item is immutable once created, and the only
/// constructor refuses an empty `origin_ref`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    source: EvidenceSource,
    identifier: Option<String>,
    content: String,
    relevance_score: f32,
    origin_ref: String,
}

impl EvidenceItem {
    pub fn new(
        source: EvidenceSource,
        identifier: Option<String>,
        content: impl Into<String>,
        relevance_score: f32,
        origin_ref: impl Into<String>,
    ) -> Option<Self> {
        let origin_ref = origin_ref.into();
        if origin_ref.trim().is_empty() {
            return None;
        }
        Some(Self {
            source,
            identifier,
            content: content.into(),
            relevance_score,
            origin_ref,
        })
    }

    pub fn source(&self) -> EvidenceSource {
        self.source
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn relevance_score(&self) -> f32 {
        self.relevance_score
    }

    pub fn origin_ref(&self) -> &str {
        &self.origin_ref
    }
}

/// Coarse lifecycle of an investigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Routing,
    Gathering,
    Synthesizing,
    Done,
    Failed,
}

/// Evidence-gathering stage, set while the status is `Gathering`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingesting,
    Extracting,
    Correlating,
    RetrievingCode,
}

/// Which pipeline a request was routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TicketAnalysis,
    CodeQuery,
}

/// One unit of work: a request, the evidence gathered for it, and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub id: Uuid,
    pub input_reference: String,
    pub kind: Option<RequestKind>,
    pub status: InvestigationStatus,
    pub stage: Option<Stage>,
    evidence: Vec<EvidenceItem>,
    /// Warnings about evidence that could not be gathered.
    pub annotations: Vec<String>,
    pub error: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Investigation {
    pub fn new(input_reference: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_reference: input_reference.into(),
            kind: None,
            status: InvestigationStatus::Routing,
            stage: None,
            evidence: Vec::new(),
            annotations: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn evidence(&self) -> &[EvidenceItem] {
        &self.evidence
    }

    /// Append evidence in gathering order. Items are never removed or edited.
    pub fn record(&mut self, items: impl IntoIterator<Item = EvidenceItem>) {
        self.evidence.extend(items);
    }

    pub fn annotate(&mut self, note: impl Into<String>) {
        self.annotations.push(note.into());
    }

    /// True when some evidence source failed and the answer rests on less
    /// than the full evidence set.
    pub fn is_partial(&self) -> bool {
        !self.annotations.is_empty()
    }

    pub fn enter(&mut self, stage: Stage) {
        self.status = InvestigationStatus::Gathering;
        self.stage = Some(stage);
        tracing::debug!(investigation = %self.id, ?stage, "entering stage");
    }

    pub fn begin_synthesis(&mut self) {
        self.status = InvestigationStatus::Synthesizing;
        self.stage = None;
    }

    pub fn complete(&mut self) {
        self.status = InvestigationStatus::Done;
        self.stage = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, kind: ErrorKind) {
        self.status = InvestigationStatus::Failed;
        self.error = Some(kind);
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            InvestigationStatus::Done | InvestigationStatus::Failed
        )
    }
}

/// A contiguous range of a source file, as stored in the code index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    pub path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub content: String,
    /// Hex sha256 of `content`.
    pub content_hash: String,
    /// Filled in by the index on upsert.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl CodeChunk {
    pub fn new(path: impl Into<String>, start_line: usize, end_line: usize, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            start_line,
            end_line,
            content_hash: content_hash(&content),
            content,
            embedding: None,
        }
    }
}

/// A window of a documentation page, as stored in the knowledge index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocChunk {
    pub doc_id: String,
    pub chunk_id: usize,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl DocChunk {
    pub fn new(doc_id: impl Into<String>, chunk_id: usize, title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            doc_id: doc_id.into(),
            chunk_id,
            title: title.into(),
            content_hash: content_hash(&content),
            content,
            embedding: None,
        }
    }
}

pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Uuid,
    AccountId,
    RequestUrl,
}

/// An identifier used to cross-reference evidence sources.
/// Equality is by (kind, value); values are normalised by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationKey {
    pub kind: KeyKind,
    pub value: String,
}

impl CorrelationKey {
    pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            KeyKind::Uuid => "uuid",
            KeyKind::AccountId => "account_id",
            KeyKind::RequestUrl => "request_url",
        };
        write!(f, "{kind}:{}", self.value)
    }
}

/// Closed time interval used to scope log searches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// One log line returned by the log search backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// The query value that produced this hit.
    pub matched_key: String,
}

/// A support ticket as returned by the ticket source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub conversation: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub url: Option<String>,
}

impl Attachment {
    pub fn is_capture(&self) -> bool {
        self.name.to_lowercase().ends_with(".har")
    }
}

/// Answer produced by the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StructuredAnswer {
    pub summary: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    /// Set when the answer was produced from partial evidence.
    #[serde(default)]
    pub partial: bool,
}

/// What the core hands to the responder once an investigation ends.
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationReport {
    pub investigation: Investigation,
    pub answer: Option<StructuredAnswer>,
    /// Human-readable failure, when the investigation failed.
    pub error: Option<String>,
}

/// Investigation request body
#[derive(Debug, Clone, Deserialize)]
pub struct InvestigateRequest {
    pub request: String,
}

/// Index refresh response
#[derive(Debug, Clone, Serialize)]
pub struct IndexRefreshResponse {
    pub files: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_requires_origin_ref() {
        assert!(EvidenceItem::new(EvidenceSource::Log, None, "x", 1.0, "").is_none());
        assert!(EvidenceItem::new(EvidenceSource::Log, None, "x", 1.0, "  ").is_none());
        let item = EvidenceItem::new(EvidenceSource::Code, None, "fn a()", 0.5, "src/a.rs:1-3").unwrap();
        assert_eq!(item.origin_ref(), "src/a.rs:1-3");
    }

    #[test]
    fn test_status_serializes_to_snake_case() {
        let json = serde_json::to_value(Stage::RetrievingCode).unwrap();
        assert_eq!(json, "retrieving_code");
        let json = serde_json::to_value(InvestigationStatus::Synthesizing).unwrap();
        assert_eq!(json, "synthesizing");
    }

    #[test]
    fn test_investigation_lifecycle() {
        let mut inv = Investigation::new("how does auth work?");
        assert_eq!(inv.status, InvestigationStatus::Routing);
        inv.enter(Stage::RetrievingCode);
        assert_eq!(inv.status, InvestigationStatus::Gathering);
        inv.begin_synthesis();
        assert_eq!(inv.stage, None);
        inv.complete();
        assert!(inv.is_terminal());
        assert!(inv.completed_at.is_some());
    }

    #[test]
    fn test_code_chunk_hash_tracks_content() {
        let a = CodeChunk::new("a.rb", 1, 3, "def a; end");
        let b = CodeChunk::new("a.rb", 1, 3, "def a; end");
        let c = CodeChunk::new("a.rb", 1, 3, "def b; end");
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_time_window_normalizes_order() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::hours(1);
        let w = TimeWindow::new(now, earlier);
        assert_eq!(w.start, earlier);
        assert!(w.contains(now - chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_attachment_capture_detection() {
        let har = Attachment { name: "Session.HAR".into(), url: None };
        let png = Attachment { name: "screen.png".into(), url: None };
        assert!(har.is_capture());
        assert!(!png.is_capture());
    }
}
