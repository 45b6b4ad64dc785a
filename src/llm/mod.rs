pub mod embeddings;
pub mod synthesis;
