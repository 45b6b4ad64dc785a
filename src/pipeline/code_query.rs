//! Code query: retrieve code (and optionally docs) for a free-form question,
//! then synthesize.

use super::{bounded, code_evidence, doc_evidence, Interrupted, Investigator};
use crate::cancel::CancellationToken;
use crate::error::InvestigationError;
use crate::models::{Investigation, Stage, StructuredAnswer};

pub(crate) async fn answer(
    investigator: &Investigator,
    inv: &mut Investigation,
    question: &str,
    cancel: &CancellationToken,
) -> Result<StructuredAnswer, InvestigationError> {
    inv.enter(Stage::RetrievingCode);
    let limit = investigator.config.retrieval_timeout();

    // ── Step 1: Code retrieval (required) ──
    let query = investigator.code_index.query(question, investigator.config.code_top_k, None);
    let hits = match bounded(cancel, limit, query).await {
        Ok(Ok(hits)) => hits,
        Ok(Err(e)) => return Err(InvestigationError::Retrieval(e.to_string())),
        Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
        Err(Interrupted::TimedOut(limit)) => {
            return Err(InvestigationError::Retrieval(format!("timed out after {limit:?}")))
        }
    };
    tracing::info!("Retrieved {} code chunks", hits.len());
    inv.record(code_evidence(hits));

    // ── Step 2: Documentation (best effort) ──
    if let Some(docs) = &investigator.doc_index {
        let query = docs.query(question, investigator.config.doc_top_k, None);
        match bounded(cancel, limit, query).await {
            Ok(Ok(hits)) => {
                tracing::info!("Retrieved {} doc chunks", hits.len());
                inv.record(doc_evidence(hits));
            }
            Ok(Err(e)) => {
                tracing::warn!("Doc retrieval failed: {e}");
                inv.annotate(format!("documentation unavailable: {e}"));
            }
            Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
            Err(Interrupted::TimedOut(limit)) => {
                inv.annotate(format!("documentation retrieval timed out after {limit:?}"));
            }
        }
    }

    // ── Step 3: Synthesize ──
    investigator.synthesize(inv, question, cancel).await
}
