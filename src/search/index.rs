//! Embedding index: the {upsert, query} contract over a [`VectorStore`].
//!
//! The same adapter backs the code index (`CodeChunk`, keyed by path and line
//! range) and the knowledge index (`DocChunk`, keyed by document and chunk id).
//! Each instance owns its store file and embedder, so one index going down
//! never affects the other.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::IndexError;
use crate::llm::embeddings::Embedder;
use crate::models::CodeChunk;
use crate::search::vector::{Indexed, VectorStore};

/// Optional narrowing of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Only consider records whose path (or doc id) starts with this.
    pub path_prefix: Option<String>,
}

impl QueryFilter {
    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertStats {
    pub fn mutated(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Nearest-neighbour index over chunks of type `T`.
#[async_trait]
pub trait SemanticIndex<T: Indexed>: Send + Sync {
    /// Embed and store `chunks`, overwriting records with the same key.
    /// Chunks whose content hash is unchanged are skipped entirely.
    async fn upsert(&self, chunks: Vec<T>) -> Result<UpsertStats, IndexError>;

    /// Up to `k` records most similar to `text`, best first.
    /// An empty index or `k == 0` yields an empty result, not an error.
    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<(T, f32)>, IndexError>;
}

pub struct EmbeddingIndex<T: Indexed> {
    store: VectorStore<T>,
    embedder: Arc<dyn Embedder>,
    // Held across the embedding call so two refreshes cannot interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl<T: Indexed> EmbeddingIndex<T> {
    pub fn open(persist_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        Ok(Self {
            store: VectorStore::open_or_create(persist_path)?,
            embedder,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Drop every record whose key is not in `keep`. Returns the number removed.
    pub async fn retain(&self, keep: &HashSet<T::Key>) -> Result<usize, IndexError>
    where
        T::Key: std::hash::Hash,
    {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.store.snapshot()?;
        let stale: Vec<T::Key> = snapshot
            .keys()
            .filter(|k| !keep.contains(*k))
            .cloned()
            .collect();
        self.store.apply(Vec::new(), &stale)?;
        Ok(stale.len())
    }

    pub fn len(&self) -> usize {
        self.store.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    /// Persist and refuse further reads and writes.
    pub fn close(&self) -> Result<(), IndexError> {
        self.store.close()
    }
}

#[async_trait]
impl<T: Indexed> SemanticIndex<T> for EmbeddingIndex<T> {
    async fn upsert(&self, chunks: Vec<T>) -> Result<UpsertStats, IndexError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.store.snapshot()?;

        // Last chunk wins when the batch itself repeats a key.
        let mut batch: BTreeMap<T::Key, T> = BTreeMap::new();
        for chunk in chunks {
            batch.insert(chunk.key(), chunk);
        }

        let mut stats = UpsertStats::default();
        let mut changed = Vec::new();
        for (key, chunk) in batch {
            match snapshot.get(&key) {
                Some(existing)
                    if existing.content_hash() == chunk.content_hash()
                        && existing.embedding().is_some() =>
                {
                    stats.unchanged += 1;
                }
                Some(_) => {
                    stats.updated += 1;
                    changed.push(chunk);
                }
                None => {
                    stats.inserted += 1;
                    changed.push(chunk);
                }
            }
        }

        if changed.is_empty() {
            return Ok(stats);
        }

        let texts: Vec<String> = changed.iter().map(|c| c.embed_text()).collect();
        let embeddings = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IndexError::Unavailable(format!("embedding failed: {e:#}")))?;
        if embeddings.len() != changed.len() {
            return Err(IndexError::EmbeddingMismatch {
                expected: changed.len(),
                actual: embeddings.len(),
            });
        }

        for (chunk, embedding) in changed.iter_mut().zip(embeddings) {
            chunk.set_embedding(embedding);
        }
        self.store.apply(changed, &[])?;

        tracing::debug!(
            "Upsert: {} inserted, {} updated, {} unchanged",
            stats.inserted,
            stats.updated,
            stats.unchanged
        );
        Ok(stats)
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<(T, f32)>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.store.snapshot()?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| IndexError::Unavailable(format!("query embedding failed: {e:#}")))?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Unavailable("no query embedding returned".to_string()))?;

        let prefix = filter.and_then(|f| f.path_prefix.as_deref());
        Ok(snapshot.search(&query_embedding, k, prefix))
    }
}

impl Indexed for CodeChunk {
    type Key = (String, usize, usize);

    fn key(&self) -> Self::Key {
        (self.path.clone(), self.start_line, self.end_line)
    }

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    fn embed_text(&self) -> String {
        // Prepend file path for better embedding context
        format!("File: {}\n{}", self.path, self.content)
    }

    fn scope(&self) -> &str {
        &self.path
    }

    fn position(&self) -> usize {
        self.start_line
    }
}
