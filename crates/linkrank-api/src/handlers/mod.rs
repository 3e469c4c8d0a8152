//! Route handlers.

pub mod links;
pub mod pages;
pub mod workflows;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use linkrank_jobs::WorkflowHandle;

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Body of a 202 response for work handed to the orchestrator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResponse {
    pub status: &'static str,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub deduplicated: bool,
}

impl From<WorkflowHandle> for ProcessingResponse {
    fn from(handle: WorkflowHandle) -> Self {
        Self {
            status: "processing",
            workflow_id: handle.workflow_id,
            run_id: handle.run_id,
            deduplicated: handle.deduplicated,
        }
    }
}

pub(crate) fn accepted(handle: WorkflowHandle) -> Response {
    (StatusCode::ACCEPTED, Json(ProcessingResponse::from(handle))).into_response()
}
