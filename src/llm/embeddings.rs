use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::retry::RetryPolicy;

/// Maximum characters to send per text to the embedding API.
/// nomic-embed-text has an 8 192-token context; dense content (JSON blobs,
/// minified JS) can reach ~2.3 tokens/char, so 3 000 chars stays under it.
const MAX_EMBED_CHARS: usize = 3_000;

/// Turns texts into vectors. One call per batch; output is parallel with input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedder backed by Ollama or an OpenAI-compatible API.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: LlmConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (client, config) = (&self.client, &self.config);
        let vectors = self
            .retry
            .run("embedding request", |_| true, move || {
                embed_batch(client, config, texts)
            })
            .await?;
        check_dimensions(&vectors, self.config.embedding_dim)?;
        Ok(vectors)
    }
}

/// Reject vectors whose width differs from the configured model dimension.
/// A dimension of zero disables the check.
fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if expected == 0 {
        return Ok(());
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        anyhow::bail!(
            "Embedding dimension mismatch: expected {expected}, got {}",
            bad.len()
        );
    }
    Ok(())
}

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Generate embeddings for a batch of texts using the configured LLM provider.
pub async fn embed_batch(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let truncated: Vec<String> = texts
        .iter()
        .map(|t| truncate_for_embedding(t).to_string())
        .collect();

    match config.provider.as_str() {
        "ollama" => embed_ollama(client, config, &truncated).await,
        "openai" => embed_openai(client, config, &truncated).await,
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(32) {
        let req = OllamaEmbedRequest {
            model: config.embedding_model.clone(),
            input: chunk.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(64) {
        let req = OpenAiEmbedRequest {
            model: config.embedding_model.clone(),
            input: chunk.to_vec(),
        };

        let resp = client
            .post(&url)
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;

        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}
