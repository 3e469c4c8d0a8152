//! # linkrank-api
//!
//! HTTP interface for linkrank: link suggestions, crawl ingestion, page
//! purge, authority listing, full-site analysis and workflow status.
//!
//! The router is built over an [`AppState`] holding an explicitly
//! constructed [`LinkSuggestionService`](linkrank_jobs::LinkSuggestionService),
//! so tests can drive it with in-memory stores.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;
pub mod telemetry;

use axum::http::{header, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

pub use config::{AnalyticsTarget, ServerConfig, StoreBackend};
pub use error::ApiError;
pub use state::AppState;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/projects/:site_id/links", get(handlers::links::get_links))
        .route("/projects/:site_id/authority", get(handlers::links::get_authority))
        .route("/projects/:site_id/pages", post(handlers::pages::ingest_pages))
        .route(
            "/projects/:site_id/pages/:page_id",
            delete(handlers::pages::purge_page),
        )
        .route(
            "/projects/:site_id/analysis",
            post(handlers::pages::start_analysis),
        )
        .route(
            "/workflows/:workflow_id",
            get(handlers::workflows::get_workflow),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(state)
}
