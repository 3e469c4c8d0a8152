//! Suggestion and authority endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use linkrank_jobs::LinksOutcome;

use super::accepted;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LinksQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// `GET /projects/:site_id/links?refresh=`
pub async fn get_links(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Query(query): Query<LinksQuery>,
) -> Result<Response, ApiError> {
    debug!(subsystem = "api", %site_id, refresh = query.refresh, "Link suggestions requested");
    match state.service.get_links(&site_id, query.refresh).await? {
        LinksOutcome::Ready(list) => Ok(Json(list).into_response()),
        LinksOutcome::Processing(handle) => Ok(accepted(handle)),
    }
}

/// `GET /projects/:site_id/authority`
pub async fn get_authority(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.service.authority(&site_id).await?;
    Ok(Json(results))
}
