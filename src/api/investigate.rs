use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::cancel::CancellationToken;
use crate::models::{InvestigateRequest, InvestigationReport};
use crate::state::AppState;

/// POST /api/investigations - Route a request and run it to completion.
///
/// Failed investigations are still `200 OK`: the report carries the error
/// kind and message for the responder to render.
pub async fn investigate(
    State(state): State<AppState>,
    Json(req): Json<InvestigateRequest>,
) -> Result<Json<InvestigationReport>, (StatusCode, String)> {
    let request = req.request.trim().to_string();
    if request.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Request is required".to_string()));
    }

    let _permit = state
        .investigation_semaphore
        .clone()
        .try_acquire_owned()
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Investigation service at capacity".to_string(),
            )
        })?;

    // The client going away drops this future; the guard then cancels the
    // investigation so no further collaborator calls are made.
    let cancel = CancellationToken::new();
    let _guard = CancelOnDrop(cancel.clone());
    let investigator = state.investigator.clone();
    let handle = tokio::spawn(async move { investigator.investigate(&request, &cancel).await });

    let report = handle.await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Investigation task failed: {e}"),
        )
    })?;
    Ok(Json(report))
}

struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
