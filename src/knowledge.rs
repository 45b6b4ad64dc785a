//! Knowledge retriever: documentation pages split into overlapping windows
//! and served through the same embedding index as code.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::models::{DocChunk, IndexRefreshResponse};
use crate::search::index::{EmbeddingIndex, SemanticIndex};
use crate::search::vector::Indexed;

/// Window size in characters.
pub const CHUNK_SIZE: usize = 1000;
/// Characters shared by consecutive windows.
pub const CHUNK_OVERLAP: usize = 200;
/// Pages shorter than this (trimmed) are not indexed.
const MIN_PAGE_CHARS: usize = 50;
/// A trailing window shorter than this (trimmed) is dropped.
const MIN_TAIL_CHARS: usize = 100;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static HTML_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex")
});
static HTML_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));

/// A documentation page loaded from disk.
#[derive(Debug, Clone)]
pub struct DocPage {
    pub doc_id: String,
    pub title: String,
    pub content: String,
}

impl Indexed for DocChunk {
    type Key = (String, usize);

    fn key(&self) -> Self::Key {
        (self.doc_id.clone(), self.chunk_id)
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
        format!("{}\n{}", self.title, self.content)
    }

    fn scope(&self) -> &str {
        &self.doc_id
    }

    fn position(&self) -> usize {
        self.chunk_id
    }
}

/// Split `content` into windows of `size` characters overlapping by `overlap`.
pub fn split_windows(content: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !windows.is_empty() && window.trim().chars().count() < MIN_TAIL_CHARS {
            break;
        }
        windows.push(window);
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

pub fn chunk_pages(pages: &[DocPage]) -> Vec<DocChunk> {
    pages
        .iter()
        .filter(|p| p.content.trim().chars().count() >= MIN_PAGE_CHARS)
        .flat_map(|page| {
            split_windows(&page.content, CHUNK_SIZE, CHUNK_OVERLAP)
                .into_iter()
                .enumerate()
                .map(|(i, text)| DocChunk::new(&page.doc_id, i, &page.title, text))
        })
        .collect()
}

/// Load `.md`, `.txt` and `.html` pages under `dir`. HTML is reduced to text.
pub fn load_doc_pages(dir: &Path) -> Vec<DocPage> {
    let mut pages = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Ok(raw) = std::fs::read_to_string(path) else {
            continue;
        };
        let doc_id = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| doc_id.clone());

        let (title, content) = match ext.as_str() {
            "md" | "markdown" => (markdown_title(&raw).unwrap_or(stem), raw),
            "txt" => (stem, raw),
            "html" | "htm" => {
                let title = HTML_TITLE
                    .captures(&raw)
                    .map(|c| c[1].trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or(stem);
                (title, html_to_text(&raw))
            }
            _ => continue,
        };
        pages.push(DocPage {
            doc_id,
            title,
            content,
        });
    }

    pages.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    pages
}

/// Reload the documentation directory into the knowledge index.
pub async fn refresh_doc_index(
    index: &EmbeddingIndex<DocChunk>,
    dir: &Path,
) -> Result<IndexRefreshResponse> {
    let walk_dir = dir.to_path_buf();
    let (pages, chunks) = tokio::task::spawn_blocking(move || {
        let pages = load_doc_pages(&walk_dir);
        let chunks = chunk_pages(&pages);
        (pages, chunks)
    })
    .await?;
    tracing::info!(
        "Docs {}: {} pages, {} chunks",
        dir.display(),
        pages.len(),
        chunks.len()
    );

    let keep: HashSet<_> = chunks.iter().map(|c| c.key()).collect();
    let stats = index.upsert(chunks).await?;
    let removed = index.retain(&keep).await?;

    Ok(IndexRefreshResponse {
        files: pages.len(),
        inserted: stats.inserted,
        updated: stats.updated,
        unchanged: stats.unchanged,
        removed,
    })
}

fn markdown_title(raw: &str) -> Option<String> {
    raw.lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn html_to_text(raw: &str) -> String {
    let without_noise = HTML_NOISE.replace_all(raw, " ");
    let text = HTML_TAG.replace_all(&without_noise, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
