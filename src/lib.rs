//! # sifra
//!
//! Root-cause investigation for customer support tickets. A request is either
//! a ticket reference or a free-form code question; sifra gathers evidence
//! (correlated log entries, relevant code, documentation) and hands it to a
//! reasoning backend for a structured answer.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │   Request    │
//!                        └──────┬───────┘
//!                               │ router
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!        ┌────────────────┐          ┌────────────────┐
//!        │ Ticket analysis│          │   Code query   │
//!        └───────┬────────┘          └───────┬────────┘
//!                │ fetch ticket + captures   │
//!                ▼                           │
//!        ┌────────────────┐                  │
//!        │ Extract keys   │                  │
//!        │ uuid/acct/url  │                  │
//!        └───────┬────────┘                  │
//!                ▼                           │
//!        ┌────────────────┐                  │
//!        │ Correlate logs │                  │
//!        │ per-key search │                  │
//!        └───────┬────────┘                  │
//!                ▼                           ▼
//!        ┌─────────────────────────────────────────┐
//!        │  Semantic retrieval (code + docs)       │
//!        └────────────────────┬────────────────────┘
//!                             ▼
//!        ┌─────────────────────────────────────────┐
//!        │  Synthesis: summary, root cause, steps  │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, collaborators, and pipeline bounds
//! - [`models`] - Shared data types: `Investigation`, `EvidenceItem`, `CodeChunk`, `CorrelationKey`
//! - [`error`] - Per-collaborator error types and the investigation failure taxonomy
//! - [`pipeline`] - Request routing and the two investigation pipelines
//! - [`correlate`] - Identifier extraction, capture parsing, dashboard links, and log correlation
//! - [`ticket`] - Ticket source and capture store adapters
//! - [`search::vector`] - In-memory vector store with snapshots and disk persistence
//! - [`search::index`] - Embedding index contract shared by code and knowledge indices
//! - [`chunking`] - Definition-aware code chunking with a paragraph fallback
//! - [`codebase`] - Source walking and code index refresh
//! - [`knowledge`] - Documentation windowing and knowledge index refresh
//! - [`llm::embeddings`] - Batch embedding generation via Ollama or OpenAI-compatible APIs
//! - [`llm::synthesis`] - Structured answer generation from evidence
//! - [`retry`] - Bounded exponential backoff for collaborator calls
//! - [`cancel`] - Cooperative cancellation token
//! - [`api`] - Axum HTTP handlers for investigations, index refresh, and health
//! - [`state`] - Shared application state wiring collaborators together

pub mod api;
pub mod cancel;
pub mod chunking;
pub mod codebase;
pub mod config;
pub mod correlate;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod state;
pub mod ticket;
