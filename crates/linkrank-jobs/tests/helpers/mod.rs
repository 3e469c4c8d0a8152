//! Test helpers for pipeline, worker and service tests.
//!
//! Provides a small two-topic site fixture with pinned mock embeddings, a
//! fast pipeline configuration, and event waiting utilities.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use linkrank_core::{page_id_for_url, CrawledLink, CrawledPage, PageStatus};
use linkrank_db::Stores;
use linkrank_inference::MockEmbedder;
use linkrank_jobs::{Pipeline, PipelineConfig, RetryPolicy, WorkerEvent};
use tokio::sync::broadcast;

pub const SITE: &str = "site-1";

/// (path, content, vector, outgoing links)
const FIXTURE: &[(&str, &str, [f32; 2], &[&str])] = &[
    ("blog/a", "blog post a", [0.0, 0.0], &["blog/b"]),
    ("blog/b", "blog post b", [0.1, 0.0], &[]),
    ("blog/c", "blog post c", [0.0, 0.2], &["shop/x"]),
    ("shop/x", "shop item x", [5.0, 5.0], &["shop/y"]),
    ("shop/y", "shop item y", [5.2, 5.0], &[]),
];

pub fn url(path: &str) -> String {
    format!("https://example.test/{}", path)
}

pub fn id(path: &str) -> String {
    page_id_for_url(&url(path))
}

pub fn crawled(path: &str, content: &str, links: &[&str]) -> CrawledPage {
    CrawledPage {
        url: url(path),
        title: Some(path.to_string()),
        status: PageStatus::Ok,
        content: Some(content.to_string()),
        word_count: None,
        content_score: Some(0.5),
        links: links
            .iter()
            .map(|target| CrawledLink {
                url: url(target),
                anchor_text: Some((*target).to_string()),
                weight: None,
            })
            .collect(),
    }
}

/// The five-page crawl: a blog topic and a shop topic.
pub fn crawl() -> Vec<CrawledPage> {
    FIXTURE
        .iter()
        .map(|(path, content, _, links)| crawled(path, content, links))
        .collect()
}

/// Existing links of the fixture as (source id, target id).
pub fn existing_links() -> Vec<(String, String)> {
    FIXTURE
        .iter()
        .flat_map(|(path, _, _, links)| links.iter().map(move |t| (id(path), id(t))))
        .collect()
}

/// Mock embedder that maps each fixture text to its pinned vector.
pub fn embedder() -> MockEmbedder {
    FIXTURE
        .iter()
        .fold(MockEmbedder::new().with_dimension(2), |backend, (_, content, v, _)| {
            backend.with_vector(*content, v.to_vec())
        })
}

/// Two clusters and millisecond backoff.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_cluster_count(2)
        .with_retry(fast_retry())
        .with_stage_timeout(Duration::from_secs(5))
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default().with_max_attempts(3).with_backoff(1, 5)
}

pub fn pipeline(stores: &Stores) -> Arc<Pipeline> {
    pipeline_with(stores, embedder())
}

pub fn pipeline_with(stores: &Stores, embedder: MockEmbedder) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(stores.clone(), Arc::new(embedder), fast_config()))
}

/// Ingest the fixture and materialize every stage up to authority.
pub async fn materialize(pipeline: &Pipeline) {
    pipeline.ingest(SITE, &crawl()).await.expect("ingest");
    pipeline.embed(SITE).await.expect("embed");
    pipeline.cluster(SITE).await.expect("cluster");
    pipeline.authority(SITE).await.expect("authority");
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<WorkerEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<WorkerEvent>
where
    F: FnMut(&WorkerEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
