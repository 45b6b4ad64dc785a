//! Ticket source and capture store collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::TicketSourceConfig;
use crate::correlate::capture::Capture;
use crate::error::{CaptureError, TicketSourceError};
use crate::models::{Attachment, Ticket};
use crate::retry::RetryPolicy;

#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Fetch a ticket with its conversation and attachment list.
    async fn fetch_ticket(&self, ticket_id: &str) -> Result<Ticket, TicketSourceError>;
}

#[async_trait]
pub trait CaptureStore: Send + Sync {
    async fn load(&self, attachment: &Attachment) -> Result<Capture, CaptureError>;
}

// ─── Freshdesk ───────────────────────────────────────────

/// Freshdesk v2 REST client (basic auth with the API key as user name).
pub struct FreshdeskClient {
    client: reqwest::Client,
    config: TicketSourceConfig,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct FdTicket {
    id: u64,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    description_text: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    attachments: Vec<FdAttachment>,
}

#[derive(Deserialize)]
struct FdConversation {
    #[serde(default)]
    body_text: Option<String>,
    #[serde(default)]
    attachments: Vec<FdAttachment>,
}

#[derive(Deserialize)]
struct FdAttachment {
    name: String,
    #[serde(default)]
    attachment_url: Option<String>,
}

impl FreshdeskClient {
    pub fn new(client: reqwest::Client, config: TicketSourceConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        ticket_id: &str,
    ) -> Result<T, TicketSourceError> {
        let url = format!("{}/api/v2/{path}", self.config.base_url.trim_end_matches('/'));
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let resp = self
            .client
            .get(&url)
            .basic_auth(api_key, Some("X"))
            .send()
            .await
            .map_err(|e| TicketSourceError::Transport(format!("Failed to call Freshdesk API: {e}")))?;

        match resp.status() {
            s if s.is_success() => resp
                .json()
                .await
                .map_err(|e| TicketSourceError::Transport(format!("Failed to parse Freshdesk response: {e}"))),
            StatusCode::NOT_FOUND => Err(TicketSourceError::NotFound(ticket_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TicketSourceError::AccessDenied(ticket_id.to_string()))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(TicketSourceError::Transport(format!(
                    "Freshdesk API returned {status}: {body}"
                )))
            }
        }
    }

    async fn fetch_once(&self, ticket_id: &str) -> Result<Ticket, TicketSourceError> {
        let ticket: FdTicket = self.get_json(&format!("tickets/{ticket_id}"), ticket_id).await?;
        let conversations: Vec<FdConversation> = self
            .get_json(&format!("tickets/{ticket_id}/conversations"), ticket_id)
            .await?;
        Ok(assemble_ticket(ticket, conversations))
    }
}

#[async_trait]
impl TicketSource for FreshdeskClient {
    async fn fetch_ticket(&self, ticket_id: &str) -> Result<Ticket, TicketSourceError> {
        self.retry
            .run(
                "ticket fetch",
                |e| matches!(e, TicketSourceError::Transport(_)),
                move || self.fetch_once(ticket_id),
            )
            .await
    }
}

/// Merge ticket and conversation payloads. Attachments from both are kept
/// once per file name.
fn assemble_ticket(ticket: FdTicket, conversations: Vec<FdConversation>) -> Ticket {
    let mut candidates = ticket.attachments;
    let mut conversation = Vec::new();
    for c in conversations {
        candidates.extend(c.attachments);
        if let Some(body) = c.body_text.filter(|b| !b.trim().is_empty()) {
            conversation.push(body);
        }
    }

    let mut seen = HashSet::new();
    let attachments = candidates
        .into_iter()
        .filter(|a| seen.insert(a.name.clone()))
        .map(|a| Attachment {
            name: a.name,
            url: a.attachment_url,
        })
        .collect();

    Ticket {
        id: ticket.id.to_string(),
        subject: ticket.subject,
        text: ticket.description_text.unwrap_or_default(),
        attachments,
        conversation,
        created_at: ticket.created_at,
    }
}

// ─── Filesystem capture store ────────────────────────────

/// Reads capture attachments that were saved under a local directory,
/// looked up by attachment file name.
pub struct FsCaptureStore {
    dir: PathBuf,
}

impl FsCaptureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CaptureStore for FsCaptureStore {
    async fn load(&self, attachment: &Attachment) -> Result<Capture, CaptureError> {
        // Attachment names come from the ticket; never let them leave the directory
        let name = std::path::Path::new(&attachment.name)
            .file_name()
            .ok_or_else(|| CaptureError::NotFound(attachment.name.clone()))?;
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(CaptureError::NotFound(path.display().to_string()));
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Capture::parse(&raw)
    }
}
