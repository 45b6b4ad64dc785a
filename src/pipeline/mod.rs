//! Investigation pipelines.
//!
//! A request is routed to one of two fixed stage sequences:
//!
//! ```text
//! ticket analysis: ingesting → extracting → correlating → retrieving_code → synthesizing
//! code query:      retrieving_code → synthesizing
//! ```
//!
//! Each stage receives the investigation by `&mut` and appends evidence to it.
//! Every collaborator call is bounded by a timeout and raced against the
//! cancellation token.

mod code_query;
pub mod router;
mod ticket;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::correlate::logs::LogSearchBackend;
use crate::correlate::LogCorrelator;
use crate::error::{InvestigationError, SynthesisError};
use crate::llm::synthesis::Synthesizer;
use crate::models::{
    CodeChunk, DocChunk, EvidenceItem, EvidenceSource, Investigation, InvestigationReport,
    RequestKind, StructuredAnswer,
};
use crate::search::index::SemanticIndex;
use crate::ticket::{CaptureStore, TicketSource};
use router::Route;

/// Why a bounded call did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupted {
    Cancelled,
    TimedOut(Duration),
}

/// Run `fut` unless the token fires first or `limit` elapses.
pub(crate) async fn bounded<F: Future>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<F::Output, Interrupted> {
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        res = tokio::time::timeout(limit, fut) => res.map_err(|_| Interrupted::TimedOut(limit)),
    }
}

/// Runs investigations against a fixed set of collaborators.
pub struct Investigator {
    tickets: Arc<dyn TicketSource>,
    captures: Arc<dyn CaptureStore>,
    correlator: LogCorrelator,
    code_index: Arc<dyn SemanticIndex<CodeChunk>>,
    doc_index: Option<Arc<dyn SemanticIndex<DocChunk>>>,
    synthesizer: Arc<dyn Synthesizer>,
    config: PipelineConfig,
}

impl Investigator {
    pub fn new(
        tickets: Arc<dyn TicketSource>,
        captures: Arc<dyn CaptureStore>,
        logs: Arc<dyn LogSearchBackend>,
        code_index: Arc<dyn SemanticIndex<CodeChunk>>,
        synthesizer: Arc<dyn Synthesizer>,
        config: PipelineConfig,
    ) -> Self {
        let correlator = LogCorrelator::new(logs, config.log_search_timeout(), config.log_top_n);
        Self {
            tickets,
            captures,
            correlator,
            code_index,
            doc_index: None,
            synthesizer,
            config,
        }
    }

    /// Append documentation excerpts to code-query evidence.
    pub fn with_knowledge(mut self, doc_index: Arc<dyn SemanticIndex<DocChunk>>) -> Self {
        self.doc_index = Some(doc_index);
        self
    }

    /// Route `request`, run the matching pipeline and report the outcome.
    /// Never panics on collaborator failure; failures end up in the report.
    pub async fn investigate(&self, request: &str, cancel: &CancellationToken) -> InvestigationReport {
        let mut inv = Investigation::new(request);
        let span = tracing::info_span!("investigation", id = %inv.id);

        async move {
            tracing::info!("Investigation started");
            let outcome = match router::route(request) {
                Ok(Route::TicketAnalysis { ticket_id, reference }) => {
                    inv.kind = Some(RequestKind::TicketAnalysis);
                    tracing::info!("Routed to ticket analysis: {reference}");
                    ticket::analyze(self, &mut inv, &ticket_id, cancel).await
                }
                Ok(Route::CodeQuery { question }) => {
                    inv.kind = Some(RequestKind::CodeQuery);
                    tracing::info!("Routed to code query");
                    code_query::answer(self, &mut inv, &question, cancel).await
                }
                Err(e) => Err(e),
            };
            finish(inv, outcome)
        }
        .instrument(span)
        .await
    }

    /// Final stage shared by both pipelines.
    async fn synthesize(
        &self,
        inv: &mut Investigation,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<StructuredAnswer, InvestigationError> {
        inv.begin_synthesis();
        let limit = self.config.synthesis_timeout();
        tracing::info!("Synthesizing from {} evidence items", inv.evidence().len());

        match bounded(cancel, limit, self.synthesizer.synthesize(inv.evidence(), question)).await {
            Ok(result) => Ok(result?),
            Err(Interrupted::Cancelled) => Err(InvestigationError::Cancelled),
            Err(Interrupted::TimedOut(limit)) => Err(SynthesisError::Timeout(limit).into()),
        }
    }
}

fn finish(mut inv: Investigation, outcome: Result<StructuredAnswer, InvestigationError>) -> InvestigationReport {
    match outcome {
        Ok(mut answer) => {
            answer.partial = inv.is_partial();
            inv.complete();
            tracing::info!(
                "Investigation done: {} evidence items{}",
                inv.evidence().len(),
                if answer.partial { " (partial)" } else { "" }
            );
            InvestigationReport {
                investigation: inv,
                answer: Some(answer),
                error: None,
            }
        }
        Err(e) => {
            inv.fail(e.kind());
            tracing::warn!("Investigation failed: {e}");
            InvestigationReport {
                investigation: inv,
                answer: None,
                error: Some(e.to_string()),
            }
        }
    }
}

pub(crate) fn code_evidence(hits: Vec<(CodeChunk, f32)>) -> impl Iterator<Item = EvidenceItem> {
    hits.into_iter().filter_map(|(chunk, score)| {
        let origin = format!("{}:{}-{}", chunk.path, chunk.start_line, chunk.end_line);
        EvidenceItem::new(EvidenceSource::Code, None, chunk.content, score, origin)
    })
}

pub(crate) fn doc_evidence(hits: Vec<(DocChunk, f32)>) -> impl Iterator<Item = EvidenceItem> {
    hits.into_iter().filter_map(|(chunk, score)| {
        let origin = format!("doc:{}#{}", chunk.doc_id, chunk.chunk_id);
        EvidenceItem::new(EvidenceSource::Doc, Some(chunk.title), chunk.content, score, origin)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let res = bounded(&cancel, Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(res, Err(Interrupted::TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_bounded_refuses_after_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = bounded(&cancel, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(res, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_bounded_cancel_interrupts_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let res = bounded(&cancel, Duration::from_secs(5), tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(res, Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_evidence_origin_refs() {
        let code = CodeChunk::new("app/models/account.rb", 10, 24, "def suspend!; end");
        let items: Vec<_> = code_evidence(vec![(code, 0.8)]).collect();
        assert_eq!(items[0].origin_ref(), "app/models/account.rb:10-24");

        let doc = DocChunk::new("billing/faq.md", 2, "Billing FAQ", "Invoices are monthly");
        let items: Vec<_> = doc_evidence(vec![(doc, 0.5)]).collect();
        assert_eq!(items[0].origin_ref(), "doc:billing/faq.md#2");
        assert_eq!(items[0].identifier(), Some("Billing FAQ"));
    }
}
