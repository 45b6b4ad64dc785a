//! Keeps the code index in step with the codebase on disk.

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::chunking;
use crate::models::{CodeChunk, IndexRefreshResponse};
use crate::search::index::{EmbeddingIndex, SemanticIndex};
use crate::search::vector::Indexed;

/// Files above this size are not indexed.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// A source file read from the codebase.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub content: String,
    pub language: &'static str,
}

/// Walk all indexable text files under `root`.
pub fn walk_source_files(root: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(language) = detect_language(path) else {
            continue;
        };
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        // Non-UTF-8 files are skipped
        if let Ok(content) = std::fs::read_to_string(path) {
            files.push(SourceFile {
                relative_path: relative,
                content,
                language,
            });
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

/// Chunk every file into index records.
pub fn chunk_files(files: &[SourceFile]) -> Vec<CodeChunk> {
    files
        .iter()
        .flat_map(|file| {
            chunking::chunk_code(&file.content, file.language)
                .into_iter()
                .map(|c| CodeChunk::new(&file.relative_path, c.start_line, c.end_line, c.content))
        })
        .collect()
}

/// Re-chunk the codebase, upsert what changed and prune ranges that no
/// longer exist.
pub async fn refresh_code_index(
    index: &EmbeddingIndex<CodeChunk>,
    root: &Path,
) -> Result<IndexRefreshResponse> {
    // ── Step 1: Walk + chunk ──
    let walk_root = root.to_path_buf();
    let (files, chunks) = tokio::task::spawn_blocking(move || {
        let files = walk_source_files(&walk_root);
        let chunks = chunk_files(&files);
        (files, chunks)
    })
    .await?;
    tracing::info!(
        "Codebase {}: {} files, {} chunks",
        root.display(),
        files.len(),
        chunks.len()
    );

    // ── Step 2: Upsert (unchanged chunks are skipped) ──
    let keep: HashSet<_> = chunks.iter().map(|c| c.key()).collect();
    let stats = index.upsert(chunks).await?;

    // ── Step 3: Prune stale ranges ──
    let removed = index.retain(&keep).await?;

    tracing::info!(
        "Code index refreshed: {} inserted, {} updated, {} unchanged, {} removed",
        stats.inserted,
        stats.updated,
        stats.unchanged,
        removed
    );

    Ok(IndexRefreshResponse {
        files: files.len(),
        inserted: stats.inserted,
        updated: stats.updated,
        unchanged: stats.unchanged,
        removed,
    })
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir()
        && matches!(
            name.as_ref(),
            "node_modules"
                | "vendor"
                | "tmp"
                | "log"
                | "coverage"
                | "public"
                | "target"
                | "dist"
                | "build"
                | "__pycache__"
                | "venv"
        )
}

/// Language tag for files worth indexing, or None to skip the file.
fn detect_language(path: &Path) -> Option<&'static str> {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if matches!(filename.as_str(), "rakefile" | "gemfile") {
        return Some("ruby");
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let language = match ext.as_str() {
        "rb" | "rake" => "ruby",
        "py" => "python",
        "yml" | "yaml" => "yaml",
        "js" | "jsx" | "ts" | "tsx" => "javascript",
        "go" => "go",
        "java" => "java",
        "rs" => "rust",
        "sql" => "sql",
        "erb" | "haml" => "template",
        "sh" | "bash" => "shell",
        _ => return None,
    };
    Some(language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_walk_skips_ignored_dirs_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/models/account.rb", "class Account; end\n");
        write(dir.path(), "config/flags.yml", "production:\n  sso: true\n");
        write(dir.path(), "node_modules/left-pad/index.js", "module.exports = 1;\n");
        write(dir.path(), ".git/config", "[core]\n");
        write(dir.path(), "logo.png", "not really a png");

        let files = walk_source_files(dir.path());
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["app/models/account.rb", "config/flags.yml"]);
        assert_eq!(files[0].language, "ruby");
        assert_eq!(files[1].language, "yaml");
    }

    #[test]
    fn test_chunk_files_keeps_relative_paths() {
        let files = vec![SourceFile {
            relative_path: "lib/tasks/cleanup.rake".into(),
            content: "task :cleanup do\n  Session.expired.delete_all\nend\n".into(),
            language: "ruby",
        }];
        let chunks = chunk_files(&files);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, "lib/tasks/cleanup.rake");
        assert_eq!(chunks[0].start_line, 1);
    }
}
