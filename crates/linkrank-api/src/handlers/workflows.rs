use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /workflows/:workflow_id`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.service.workflow_status(&workflow_id).await?;
    Ok(Json(status))
}
