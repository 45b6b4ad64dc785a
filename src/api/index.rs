use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::codebase::refresh_code_index;
use crate::knowledge::refresh_doc_index;
use crate::models::IndexRefreshResponse;
use crate::state::AppState;

/// POST /api/index/code - Re-chunk the configured codebase and refresh the code index.
pub async fn refresh_code(
    State(state): State<AppState>,
) -> Result<Json<IndexRefreshResponse>, (StatusCode, String)> {
    let root = state.config.codebase_dir.clone();
    if !root.is_dir() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Codebase directory {} does not exist", root.display()),
        ));
    }

    let stats = refresh_code_index(&state.code_index, &root)
        .await
        .map_err(|e| {
            tracing::error!("Code index refresh failed: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Code index refresh failed: {e}"))
        })?;

    Ok(Json(stats))
}

/// POST /api/index/docs - Reload documentation pages into the knowledge index.
pub async fn refresh_docs(
    State(state): State<AppState>,
) -> Result<Json<IndexRefreshResponse>, (StatusCode, String)> {
    let Some(dir) = state.config.docs_dir.clone() else {
        return Err((
            StatusCode::BAD_REQUEST,
            "No documentation directory configured".to_string(),
        ));
    };

    let stats = refresh_doc_index(&state.doc_index, &dir)
        .await
        .map_err(|e| {
            tracing::error!("Doc index refresh failed: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Doc index refresh failed: {e}"))
        })?;

    Ok(Json(stats))
}
