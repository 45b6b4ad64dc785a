//! Ticket analysis: fetch the ticket, pull identifiers from it and its
//! captures, correlate logs, retrieve related code, then synthesize.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;

use super::{bounded, code_evidence, Interrupted, Investigator};
use crate::cancel::CancellationToken;
use crate::correlate::dashboard::{self, DashboardLink, DashboardQuery};
use crate::correlate::extract::{extract_from_capture, extract_from_text};
use crate::correlate::search_window;
use crate::error::{InvestigationError, TicketSourceError};
use crate::models::{
    CorrelationKey, EvidenceSource, Investigation, Stage, StructuredAnswer, Ticket, TimeWindow,
};

/// Log evidence folded into the code retrieval query.
const LOG_SEED_ENTRIES: usize = 3;

pub(crate) async fn analyze(
    investigator: &Investigator,
    inv: &mut Investigation,
    ticket_id: &str,
    cancel: &CancellationToken,
) -> Result<StructuredAnswer, InvestigationError> {
    // ── Step 1: Ingest ticket ──
    inv.enter(Stage::Ingesting);
    let limit = investigator.config.ticket_fetch_timeout();
    let ticket = match bounded(cancel, limit, investigator.tickets.fetch_ticket(ticket_id)).await {
        Ok(result) => result?,
        Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
        Err(Interrupted::TimedOut(limit)) => {
            return Err(TicketSourceError::Transport(format!("timed out after {limit:?}")).into())
        }
    };
    tracing::info!(
        "Fetched ticket {}: {} attachments, {} conversation entries",
        ticket.id,
        ticket.attachments.len(),
        ticket.conversation.len()
    );

    // ── Step 2: Extract identifiers ──
    inv.enter(Stage::Extracting);
    let Extracted { keys, links, window } = extract(investigator, inv, &ticket, cancel).await?;
    tracing::info!(
        "Extracted {} correlation keys and {} dashboard links",
        keys.len(),
        links.len()
    );

    // ── Step 3: Correlate logs ──
    inv.enter(Stage::Correlating);
    let dashboards = resolve_links(investigator, inv, &links, cancel).await?;
    if !keys.is_empty() || !dashboards.is_empty() {
        // Searches run concurrently, each under its own timeout
        let limit = investigator.config.log_search_timeout() * 2;
        let correlation = investigator.correlator.correlate_with(&keys, &dashboards, &window);
        match bounded(cancel, limit, correlation).await {
            Ok(Ok(correlation)) => {
                for (key, reason) in &correlation.failed_keys {
                    inv.annotate(format!("log search for {key} failed: {reason}"));
                }
                for (url, reason) in &correlation.failed_dashboards {
                    inv.annotate(format!("dashboard search {url} failed: {reason}"));
                }
                inv.record(correlation.evidence);
            }
            Ok(Err(e)) => {
                tracing::warn!("Log correlation unavailable: {e}");
                inv.annotate(format!("log evidence unavailable: {e}"));
            }
            Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
            Err(Interrupted::TimedOut(limit)) => {
                inv.annotate(format!("log correlation timed out after {limit:?}"));
            }
        }
    }

    // ── Step 4: Retrieve related code ──
    inv.enter(Stage::RetrievingCode);
    let seed = retrieval_seed(&ticket, inv);
    let limit = investigator.config.retrieval_timeout();
    let query = investigator.code_index.query(&seed, investigator.config.code_top_k, None);
    match bounded(cancel, limit, query).await {
        Ok(Ok(hits)) => {
            tracing::info!("Retrieved {} code chunks", hits.len());
            inv.record(code_evidence(hits));
        }
        Ok(Err(e)) => {
            tracing::warn!("Code retrieval failed: {e}");
            inv.annotate(format!("code evidence unavailable: {e}"));
        }
        Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
        Err(Interrupted::TimedOut(limit)) => {
            inv.annotate(format!("code retrieval timed out after {limit:?}"));
        }
    }

    // ── Step 5: Synthesize ──
    let question = ticket_question(&ticket);
    investigator.synthesize(inv, &question, cancel).await
}

struct Extracted {
    keys: BTreeSet<CorrelationKey>,
    links: Vec<DashboardLink>,
    window: TimeWindow,
}

/// Identifiers and dashboard links from the ticket text, identifiers from
/// every readable capture, and the window to search them in.
async fn extract(
    investigator: &Investigator,
    inv: &mut Investigation,
    ticket: &Ticket,
    cancel: &CancellationToken,
) -> Result<Extracted, InvestigationError> {
    let texts = std::iter::once(&ticket.subject)
        .chain(std::iter::once(&ticket.text))
        .chain(&ticket.conversation);
    let mut keys = BTreeSet::new();
    let mut links: Vec<DashboardLink> = Vec::new();
    for text in texts {
        keys.extend(extract_from_text(text));
        for link in dashboard::links_in(text) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    let limit = investigator.config.capture_load_timeout();
    let mut span: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = None;
    for attachment in ticket.attachments.iter().filter(|a| a.is_capture()) {
        let loaded = match bounded(cancel, limit, investigator.captures.load(attachment)).await {
            Ok(loaded) => loaded,
            Err(Interrupted::Cancelled) => return Err(InvestigationError::Cancelled),
            Err(Interrupted::TimedOut(limit)) => {
                tracing::warn!("Capture {} timed out after {limit:?}", attachment.name);
                inv.annotate(format!("capture {} timed out after {limit:?}", attachment.name));
                continue;
            }
        };
        match loaded {
            Ok(capture) => {
                if capture.malformed > 0 {
                    tracing::debug!("{}: skipped {} malformed records", attachment.name, capture.malformed);
                }
                keys.extend(extract_from_capture(&capture));
                if let Some((earliest, latest)) = capture.time_span() {
                    span = Some(match span {
                        Some((s, e)) => (s.min(earliest), e.max(latest)),
                        None => (earliest, latest),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Capture {} unreadable: {e}", attachment.name);
                inv.annotate(format!("capture {} unreadable: {e}", attachment.name));
            }
        }
    }

    let window = search_window(
        span,
        ticket.created_at,
        ChronoDuration::minutes(investigator.config.window_padding_mins),
        ChronoDuration::hours(investigator.config.window_lookback_hours),
        Utc::now(),
    );
    Ok(Extracted { keys, links, window })
}

/// Dashboard links as searches; unusable links are annotated and dropped.
async fn resolve_links(
    investigator: &Investigator,
    inv: &mut Investigation,
    links: &[DashboardLink],
    cancel: &CancellationToken,
) -> Result<Vec<DashboardQuery>, InvestigationError> {
    if links.is_empty() {
        return Ok(Vec::new());
    }
    let limit = investigator.config.log_search_timeout() * 2;
    match bounded(cancel, limit, investigator.correlator.resolve_links(links, Utc::now())).await {
        Ok((queries, failed)) => {
            for (url, reason) in failed {
                inv.annotate(format!("dashboard link {url} unusable: {reason}"));
            }
            Ok(queries)
        }
        Err(Interrupted::Cancelled) => Err(InvestigationError::Cancelled),
        Err(Interrupted::TimedOut(limit)) => {
            inv.annotate(format!("dashboard links not resolved within {limit:?}"));
            Ok(Vec::new())
        }
    }
}

fn retrieval_seed(ticket: &Ticket, inv: &Investigation) -> String {
    let mut seed = format!("{}\n{}", ticket.subject, ticket.text);
    for item in inv
        .evidence()
        .iter()
        .filter(|e| e.source() == EvidenceSource::Log)
        .take(LOG_SEED_ENTRIES)
    {
        seed.push('\n');
        seed.push_str(item.content());
    }
    seed
}

fn ticket_question(ticket: &Ticket) -> String {
    let mut question = format!(
        "Find the root cause of support ticket #{}.\nSubject: {}\n\n{}",
        ticket.id, ticket.subject, ticket.text
    );
    if !ticket.conversation.is_empty() {
        question.push_str("\n\nConversation:\n");
        for entry in &ticket.conversation {
            question.push_str("- ");
            question.push_str(entry);
            question.push('\n');
        }
    }
    question
}
