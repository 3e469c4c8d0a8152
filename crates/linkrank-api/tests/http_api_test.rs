//! HTTP tests for the linkrank router.
//!
//! Drives the axum `Router` in-process with `tower::ServiceExt::oneshot`
//! over in-memory stores and a pinned mock embedder, so no database or
//! embedding server is needed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use linkrank_api::{router, AppState};
use linkrank_core::SuggestionStore;
use linkrank_db::Stores;
use linkrank_inference::MockEmbedder;
use linkrank_jobs::{
    DurableOrchestrator, InlineOrchestrator, LinkSuggestionService, Orchestrator, Pipeline,
    PipelineConfig, RetryPolicy,
};

const SITE: &str = "acme";

/// (path, content, vector, links)
const PAGES: &[(&str, &str, [f32; 2], &[&str])] = &[
    ("guide/one", "guide one", [0.0, 0.0], &["guide/two"]),
    ("guide/two", "guide two", [0.1, 0.0], &[]),
    ("guide/three", "guide three", [0.0, 0.2], &["shop/a"]),
    ("shop/a", "shop a", [5.0, 5.0], &["shop/b"]),
    ("shop/b", "shop b", [5.2, 5.0], &[]),
];

fn url(path: &str) -> String {
    format!("https://acme.test/{}", path)
}

fn crawl_body() -> Value {
    let pages: Vec<Value> = PAGES
        .iter()
        .map(|(path, content, _, links)| {
            json!({
                "url": url(path),
                "title": path,
                "content": content,
                "links": links.iter().map(|l| json!({ "url": url(l) })).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "pages": pages })
}

fn app(stores: &Stores, durable: bool) -> Router {
    let embedder = PAGES
        .iter()
        .fold(MockEmbedder::new().with_dimension(2), |m, (_, content, v, _)| {
            m.with_vector(*content, v.to_vec())
        });
    let config = PipelineConfig::default()
        .with_cluster_count(2)
        .with_retry(RetryPolicy::default().with_backoff(1, 5))
        .with_stage_timeout(Duration::from_secs(5));
    let pipeline = Arc::new(Pipeline::new(stores.clone(), Arc::new(embedder), config));

    let orchestrator: Arc<dyn Orchestrator> = if durable {
        Arc::new(DurableOrchestrator::new(stores.runs.clone()))
    } else {
        Arc::new(InlineOrchestrator)
    };
    router(AppState::new(LinkSuggestionService::new(pipeline, orchestrator)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

#[tokio::test]
async fn test_health() {
    let app = app(&Stores::memory(), false);
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = app(&Stores::memory(), false);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = response.headers().get("x-request-id").expect("request id");
    assert_eq!(id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn test_ingest_pages() {
    let stores = Stores::memory();
    let app = app(&stores, false);

    let (status, body) = send(
        &app,
        Method::POST,
        "/projects/acme/pages",
        Some(crawl_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pages"], 5);
    assert_eq!(body["edges"], 3);
}

#[tokio::test]
async fn test_links_before_analysis_is_bad_request() {
    let app = app(&Stores::memory(), false);
    let (status, body) = get(&app, "/projects/acme/links").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Precondition missing"));
}

#[tokio::test]
async fn test_inline_analysis_then_cached_links() {
    let stores = Stores::memory();
    let app = app(&stores, false);

    let (status, run) = send(
        &app,
        Method::POST,
        "/projects/acme/analysis",
        Some(crawl_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["site_id"], SITE);
    assert_eq!(run["stages"].as_array().unwrap().len(), 5);

    let (status, body) = get(&app, "/projects/acme/links").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "cache");
    assert!(body.get("totalGenerated").is_none());
    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 6);
    assert_eq!(suggestions[0]["reason"], "Same Cluster");

    let (status, body) = get(&app, "/projects/acme/links?refresh=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "calculated");
    assert_eq!(body["totalGenerated"], 6);
}

#[tokio::test]
async fn test_durable_links_returns_accepted() {
    let stores = Stores::memory();
    let app = app(&stores, true);

    let (status, body) = get(&app, "/projects/acme/links?refresh=true").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["workflowId"], "link-suggestions-acme");
    assert_eq!(body["deduplicated"], false);

    let (status, again) = get(&app, "/projects/acme/links?refresh=true").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(again["runId"], body["runId"]);
    assert_eq!(again["deduplicated"], true);

    let (status, workflow) = get(&app, "/workflows/link-suggestions-acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workflow["run"]["status"], "pending");
    assert_eq!(workflow["stages"][0]["stage"], "recommend");
}

#[tokio::test]
async fn test_durable_links_cache_miss_is_computed_inline() {
    let stores = Stores::memory();
    let inline = app(&stores, false);
    let durable = app(&stores, true);

    let (status, body) = get(&durable, "/projects/acme/links").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Precondition missing"));

    send(
        &inline,
        Method::POST,
        "/projects/acme/analysis",
        Some(crawl_body()),
    )
    .await;
    stores.suggestions.replace(SITE, &[]).await.unwrap();

    let (status, body) = get(&durable, "/projects/acme/links").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "calculated");
    assert_eq!(body["totalGenerated"], 6);

    let (status, _) = get(&durable, "/workflows/link-suggestions-acme").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_durable_analysis_returns_accepted() {
    let app = app(&Stores::memory(), true);
    let (status, body) = send(&app, Method::POST, "/projects/acme/analysis", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["workflowId"], "site-analysis-acme");
}

#[tokio::test]
async fn test_invalid_refresh_is_rejected() {
    let app = app(&Stores::memory(), false);
    let (status, _) = get(&app, "/projects/acme/links?refresh=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_workflow_and_page_are_not_found() {
    let app = app(&Stores::memory(), false);

    let (status, body) = get(&app, "/workflows/link-suggestions-nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, Method::DELETE, "/projects/acme/pages/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authority_and_purge() {
    let stores = Stores::memory();
    let app = app(&stores, false);
    send(
        &app,
        Method::POST,
        "/projects/acme/analysis",
        Some(crawl_body()),
    )
    .await;

    let (status, authority) = get(&app, "/projects/acme/authority").await;
    assert_eq!(status, StatusCode::OK);
    let rows = authority.as_array().unwrap();
    assert_eq!(rows.len(), 5);
    let first = &rows[0];
    let page_id = first["page_id"].as_str().unwrap().to_string();

    let (status, summary) = send(
        &app,
        Method::DELETE,
        &format!("/projects/acme/pages/{}", page_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["page_removed"], true);

    let (_, authority) = get(&app, "/projects/acme/authority").await;
    assert_eq!(authority.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_analytics_disabled_returns_empty_suggestions() {
    let stores = Stores::memory().without_analytics();
    let app = app(&stores, false);
    send(
        &app,
        Method::POST,
        "/projects/acme/pages",
        Some(crawl_body()),
    )
    .await;

    let (status, body) = get(&app, "/projects/acme/links").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "calculated");
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 0);
    assert_eq!(body["totalGenerated"], 0);
}
