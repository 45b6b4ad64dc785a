use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub code_chunks: usize,
    pub code_generation: u64,
    pub doc_chunks: usize,
    pub doc_generation: u64,
    pub available_investigation_slots: usize,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        code_chunks: state.code_index.len(),
        code_generation: state.code_index.generation(),
        doc_chunks: state.doc_index.len(),
        doc_generation: state.doc_index.generation(),
        available_investigation_slots: state.investigation_semaphore.available_permits(),
    })
}
