//! Crawl ingestion, page purge and full-site analysis.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use linkrank_core::CrawledPage;
use linkrank_jobs::AnalysisOutcome;

use super::accepted;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CrawlBatch {
    #[serde(default)]
    pub pages: Vec<CrawledPage>,
}

/// `POST /projects/:site_id/pages`
pub async fn ingest_pages(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(batch): Json<CrawlBatch>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.service.ingest(&site_id, &batch.pages).await?;
    Ok(Json(summary))
}

/// `DELETE /projects/:site_id/pages/:page_id`
pub async fn purge_page(
    State(state): State<AppState>,
    Path((site_id, page_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.service.purge_page(&site_id, &page_id).await?;
    info!(subsystem = "api", %site_id, %page_id, "Page purged");
    Ok(Json(summary))
}

/// `POST /projects/:site_id/analysis`
///
/// The body is optional; without one the stored crawl is re-analyzed.
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    batch: Option<Json<CrawlBatch>>,
) -> Result<Response, ApiError> {
    let pages = batch.map(|Json(b)| b.pages).unwrap_or_default();
    match state.service.start_analysis(&site_id, pages).await? {
        AnalysisOutcome::Processing(handle) => Ok(accepted(handle)),
        AnalysisOutcome::Completed(run) => Ok(Json(run).into_response()),
    }
}
