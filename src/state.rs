use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, PipelineConfig};
use crate::correlate::logs::HaystackClient;
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::llm::synthesis::LlmSynthesizer;
use crate::models::{CodeChunk, DocChunk};
use crate::pipeline::Investigator;
use crate::retry::RetryPolicy;
use crate::search::index::EmbeddingIndex;
use crate::ticket::{FreshdeskClient, FsCaptureStore};

/// Per-request timeout for collaborator calls other than synthesis.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub code_index: Arc<EmbeddingIndex<CodeChunk>>,
    pub doc_index: Arc<EmbeddingIndex<DocChunk>>,
    pub investigator: Arc<Investigator>,
    pub investigation_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(&config.data_dir)?;

        let http_client = build_client(CLIENT_TIMEOUT)?;
        let synthesis_client = build_client(synthesis_request_timeout(&config.pipeline))?;
        let retry = RetryPolicy::from_config(&config.retry);

        // Each index owns its embedder handle
        let code_embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http_client.clone(),
            config.llm.clone(),
            retry,
        ));
        let doc_embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http_client.clone(),
            config.llm.clone(),
            retry,
        ));
        let code_index: Arc<EmbeddingIndex<CodeChunk>> =
            Arc::new(EmbeddingIndex::open(&config.code_index_path(), code_embedder)?);
        let doc_index: Arc<EmbeddingIndex<DocChunk>> =
            Arc::new(EmbeddingIndex::open(&config.doc_index_path(), doc_embedder)?);
        tracing::info!(
            "Loaded indices: {} code chunks, {} doc chunks",
            code_index.len(),
            doc_index.len()
        );

        let mut investigator = Investigator::new(
            Arc::new(FreshdeskClient::new(
                http_client.clone(),
                config.tickets.clone(),
                retry,
            )),
            Arc::new(FsCaptureStore::new(config.captures_dir.clone())),
            Arc::new(HaystackClient::new(
                http_client.clone(),
                config.logs.clone(),
                retry,
            )),
            code_index.clone(),
            Arc::new(LlmSynthesizer::new(synthesis_client, config.llm.clone(), retry)),
            config.pipeline.clone(),
        );
        if config.docs_dir.is_some() {
            investigator = investigator.with_knowledge(doc_index.clone());
        }

        let max_concurrent = config.pipeline.max_concurrent_investigations.max(1);

        Ok(Self {
            config,
            http_client,
            code_index,
            doc_index,
            investigator: Arc::new(investigator),
            investigation_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        })
    }

    /// Flush both indices and refuse further queries.
    pub fn shutdown(&self) {
        for (name, result) in [
            ("code", self.code_index.close()),
            ("docs", self.doc_index.close()),
        ] {
            if let Err(e) = result {
                tracing::error!("Failed to close {name} index: {e}");
            }
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
}

/// The pipeline bounds synthesis; the client must not cut it short.
fn synthesis_request_timeout(pipeline: &PipelineConfig) -> Duration {
    pipeline.synthesis_timeout().max(CLIENT_TIMEOUT)
}
