//! Code chunking: definition boundaries for Ruby, Python and YAML, line-based fallback for the rest.

pub mod definitions;
pub mod fallback;

/// Output of the chunking process.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub content: String,
    /// 1-based start line in the original file.
    pub start_line: usize,
    /// 1-based end line in the original file.
    pub end_line: usize,
}

/// Languages with definition-aware chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Ruby,
    Python,
    Yaml,
    Unknown,
}

impl Language {
    /// Map a file extension / language name string to a Language variant.
    pub fn from_str(lang: &str) -> Self {
        match lang.to_lowercase().as_str() {
            "ruby" | "rb" | "rake" => Language::Ruby,
            "python" | "py" => Language::Python,
            "yaml" | "yml" => Language::Yaml,
            _ => Language::Unknown,
        }
    }
}

/// Chunk a source file. Tries definition boundaries first, falls back to
/// line-based when the language is unknown or no boundary is found.
pub fn chunk_code(content: &str, language_str: &str) -> Vec<ChunkOutput> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let language = Language::from_str(language_str);
    if let Some(chunks) = definitions::chunk_by_definitions(content, language) {
        return chunks;
    }

    fallback::chunk_fallback(content)
}
