use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::config::LlmConfig;
use crate::error::SynthesisError;
use crate::models::{EvidenceItem, EvidenceSource, StructuredAnswer};
use crate::retry::RetryPolicy;

/// Evidence content longer than this is cut before it goes into the prompt.
const MAX_EVIDENCE_CHARS: usize = 2_000;
/// References filled in from evidence when the model gives none.
const DEFAULT_REFERENCES: usize = 10;

/// Reasoning backend: evidence and a question in, structured answer out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        evidence: &[EvidenceItem],
        question: &str,
    ) -> Result<StructuredAnswer, SynthesisError>;
}

/// Synthesizer backed by the configured chat model.
pub struct LlmSynthesizer {
    client: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl LlmSynthesizer {
    pub fn new(client: reqwest::Client, config: LlmConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        evidence: &[EvidenceItem],
        question: &str,
    ) -> Result<StructuredAnswer, SynthesisError> {
        let messages = build_messages(evidence, question);
        let (client, config, messages) = (&self.client, &self.config, &messages);

        let content = self
            .retry
            .run("synthesis", |_| true, move || call_chat(client, config, messages))
            .await
            .map_err(|e| SynthesisError::Backend(format!("{e:#}")))?;

        let mut answer = parse_answer(&content)
            .ok_or_else(|| SynthesisError::Backend("empty response from model".to_string()))?;
        if answer.references.is_empty() {
            answer.references = evidence
                .iter()
                .take(DEFAULT_REFERENCES)
                .map(|e| e.origin_ref().to_string())
                .collect();
        }
        Ok(answer)
    }
}

// ─── Prompt ──────────────────────────────────────────────

static CHAT_TEMPLATE_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\|[^|<>]{1,40}\|>|\[/?INST\]|<</?SYS>>").expect("static regex")
});

/// Remove chat-template control tokens so retrieved text cannot open or
/// close a turn.
pub fn sanitize_for_prompt(text: &str) -> String {
    CHAT_TEMPLATE_TOKENS.replace_all(text, "").into_owned()
}

fn system_prompt() -> String {
    String::from(
        "You are a support engineer investigating the root cause of a customer issue.\n\
         You are given evidence gathered from the ticket, production logs, the codebase \
         and internal documentation. Base your answer ONLY on that evidence.\n\
         If the evidence is insufficient, say what is missing instead of guessing.\n\
         Respond with ONLY a JSON object with these fields:\n\
         {\"summary\": string, \"root_cause\": string or null, \
         \"next_steps\": [string], \"references\": [string]}\n\
         `references` must quote the [ref] tags of the evidence you relied on.",
    )
}

fn source_label(source: EvidenceSource) -> &'static str {
    match source {
        EvidenceSource::Ticket => "ticket",
        EvidenceSource::Log => "log",
        EvidenceSource::Code => "code",
        EvidenceSource::Doc => "doc",
    }
}

fn build_context_block(evidence: &[EvidenceItem]) -> String {
    let mut ctx = String::from("Evidence:\n\n");
    if evidence.is_empty() {
        ctx.push_str("(No evidence was gathered.)\n");
        return ctx;
    }

    for item in evidence {
        let content = sanitize_for_prompt(&truncate_chars(item.content(), MAX_EVIDENCE_CHARS));
        let _ = write!(
            ctx,
            "--- [{}] {} (score {:.2}){} ---\n{}\n\n",
            item.origin_ref(),
            source_label(item.source()),
            item.relevance_score(),
            item.identifier()
                .map(|i| format!(" keys: {i}"))
                .unwrap_or_default(),
            content
        );
    }
    ctx
}

fn build_messages(evidence: &[EvidenceItem], question: &str) -> Vec<Message> {
    vec![
        Message {
            role: "system".to_string(),
            content: system_prompt(),
        },
        // Evidence goes in the user turn so smaller models attend to it
        Message {
            role: "user".to_string(),
            content: format!(
                "{}---\nQuestion: {}",
                build_context_block(evidence),
                sanitize_for_prompt(question)
            ),
        },
    ]
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ─── Answer parsing ──────────────────────────────────────

#[derive(Deserialize)]
struct RawAnswer {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    root_cause: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    references: Vec<String>,
}

/// Parse the model output: a JSON object, a JSON object embedded in prose or
/// a code fence, or failing both, the raw text as the summary.
fn parse_answer(content: &str) -> Option<StructuredAnswer> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    let embedded = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };
    let parsed = serde_json::from_str::<RawAnswer>(trimmed)
        .ok()
        .or_else(|| embedded.and_then(|j| serde_json::from_str::<RawAnswer>(j).ok()))
        .filter(|raw| !raw.summary.trim().is_empty() || raw.root_cause.is_some());

    Some(match parsed {
        Some(raw) => StructuredAnswer {
            summary: raw.summary,
            root_cause: raw.root_cause.filter(|r| !r.trim().is_empty()),
            next_steps: raw.next_steps,
            references: raw.references,
            partial: false,
        },
        None => {
            tracing::warn!("Model answer was not JSON; using raw text as summary");
            StructuredAnswer {
                summary: trimmed.to_string(),
                ..StructuredAnswer::default()
            }
        }
    })
}

// ─── Chat call ───────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

async fn call_chat(client: &reqwest::Client, config: &LlmConfig, messages: &[Message]) -> Result<String> {
    match config.provider.as_str() {
        "ollama" => call_ollama(client, config, messages).await,
        "openai" => call_openai(client, config, messages).await,
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

async fn call_ollama(client: &reqwest::Client, config: &LlmConfig, messages: &[Message]) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);
    let req = OllamaChatRequest {
        model: &config.chat_model,
        messages,
        stream: false,
        format: "json",
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama chat response")?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

async fn call_openai(client: &reqwest::Client, config: &LlmConfig, messages: &[Message]) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let req = OpenAiChatRequest {
        model: &config.chat_model,
        messages,
        temperature: 0.2,
    };

    let resp = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI chat response")?;
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .context("OpenAI chat response had no content")
}
