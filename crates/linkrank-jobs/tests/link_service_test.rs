//! Integration tests for the link suggestion service.
//!
//! Covers the cache-or-compute read path, orchestrator deferral and
//! deduplication, the inline fallback, and degradation when the analytics
//! stores are missing or failing.

mod helpers;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use helpers::{existing_links, id, materialize, pipeline, SITE};
use linkrank_core::{
    Error, LinkSuggestion, PageGraphStore, Result, SuggestionSource, SuggestionStore,
};
use linkrank_db::{MemoryStore, Stores};
use linkrank_jobs::{
    DurableOrchestrator, InlineOrchestrator, LinkSuggestionService, LinksOutcome, RunStatus,
    SuggestionList,
};

fn inline_service(stores: &Stores) -> LinkSuggestionService {
    LinkSuggestionService::new(pipeline(stores), Arc::new(InlineOrchestrator))
}

fn durable_service(stores: &Stores) -> LinkSuggestionService {
    LinkSuggestionService::new(
        pipeline(stores),
        Arc::new(DurableOrchestrator::new(stores.runs.clone())),
    )
}

fn ready(outcome: LinksOutcome) -> SuggestionList {
    match outcome {
        LinksOutcome::Ready(list) => list,
        other => panic!("expected ready suggestions, got {:?}", other),
    }
}

fn pairs(suggestions: &[LinkSuggestion]) -> Vec<(String, String)> {
    suggestions
        .iter()
        .map(|s| (s.from_page_id.clone(), s.to_page_id.clone()))
        .collect()
}

/// Suggestion store whose writes always time out.
struct FailingWrites(Arc<MemoryStore>);

#[async_trait]
impl SuggestionStore for FailingWrites {
    async fn get_top(&self, site_id: &str, limit: usize) -> Result<Vec<LinkSuggestion>> {
        self.0.get_top(site_id, limit).await
    }

    async fn replace(&self, _site_id: &str, _suggestions: &[LinkSuggestion]) -> Result<u64> {
        Err(Error::TransientIo("suggestion write timed out".into()))
    }

    async fn count(&self, site_id: &str) -> Result<i64> {
        self.0.count(site_id).await
    }

    async fn delete_for_page(&self, site_id: &str, page_id: &str) -> Result<u64> {
        self.0.delete_for_page(site_id, page_id).await
    }
}

#[tokio::test]
async fn test_inline_compute_returns_ranked_same_cluster_links() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;

    let list = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(list.source, SuggestionSource::Calculated);
    assert_eq!(list.total_generated, Some(6));
    assert_eq!(list.suggestions.len(), 6);

    let existing: HashSet<(String, String)> = existing_links().into_iter().collect();
    let blog: HashSet<String> = ["blog/a", "blog/b", "blog/c"].iter().map(|p| id(p)).collect();
    for s in &list.suggestions {
        assert_ne!(s.from_page_id, s.to_page_id, "self link suggested");
        assert!(
            !existing.contains(&(s.from_page_id.clone(), s.to_page_id.clone())),
            "existing link suggested"
        );
        assert_eq!(
            blog.contains(&s.from_page_id),
            blog.contains(&s.to_page_id),
            "cross-cluster suggestion"
        );
        assert_eq!(s.reason, "Same Cluster");
        assert!(s.similarity > 0.0 && s.similarity <= 1.0);
        assert!((s.score - s.similarity * s.target_authority * 120.0).abs() < 1e-9);
    }

    for window in list.suggestions.windows(2) {
        assert!(window[0].rank_cmp(&window[1]).is_le(), "suggestions not ranked");
    }
}

#[tokio::test]
async fn test_inline_compute_writes_cache() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;

    let computed = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 6);

    let cached = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(cached.source, SuggestionSource::Cache);
    assert_eq!(cached.total_generated, None);
    assert_eq!(cached.suggestions, computed.suggestions);
}

#[tokio::test]
async fn test_cache_is_served_until_refresh() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;
    let first = ready(service.get_links(SITE, false).await.unwrap());

    // Boost the authority of one target behind the cache's back.
    let boosted = id("blog/b");
    let mut authority = stores.graph.get_authority_results(SITE).await.unwrap();
    for row in authority.iter_mut().filter(|a| a.page_id == boosted) {
        row.pr *= 100.0;
        row.tspr = row.tspr.map(|t| t * 100.0);
    }
    stores.graph.write_authority(SITE, &authority).await.unwrap();

    let cached = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(cached.source, SuggestionSource::Cache);
    assert_eq!(cached.suggestions, first.suggestions);

    let refreshed = ready(service.get_links(SITE, true).await.unwrap());
    assert_eq!(refreshed.source, SuggestionSource::Calculated);
    assert_ne!(refreshed.suggestions, first.suggestions);
    assert_eq!(refreshed.suggestions[0].to_page_id, boosted);

    let recached = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(recached.suggestions, refreshed.suggestions);
}

#[tokio::test]
async fn test_response_limit_truncates_but_reports_total() {
    let stores = Stores::memory();
    let service = inline_service(&stores).with_response_limit(2);
    materialize(service.pipeline()).await;

    let list = ready(service.get_links(SITE, true).await.unwrap());
    assert_eq!(list.suggestions.len(), 2);
    assert_eq!(list.total_generated, Some(6));
    // The cache keeps the full persisted set.
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 6);
}

#[tokio::test]
async fn test_durable_orchestrator_defers_refresh_and_deduplicates() {
    let stores = Stores::memory();
    let service = durable_service(&stores);
    materialize(service.pipeline()).await;

    let first = match service.get_links(SITE, true).await.unwrap() {
        LinksOutcome::Processing(handle) => handle,
        other => panic!("expected processing, got {:?}", other),
    };
    assert_eq!(first.workflow_id, "link-suggestions-site-1");
    assert_eq!(first.status, RunStatus::Pending);
    assert!(!first.deduplicated);

    let second = match service.get_links(SITE, true).await.unwrap() {
        LinksOutcome::Processing(handle) => handle,
        other => panic!("expected processing, got {:?}", other),
    };
    assert_eq!(second.run_id, first.run_id);
    assert!(second.deduplicated);

    let status = service.workflow_status(&first.workflow_id).await.unwrap();
    assert_eq!(status.run.id, first.run_id);
    assert_eq!(status.stages.len(), 1);
    assert_eq!(status.stages[0].status, RunStatus::Pending);

    // Nothing was computed in the request.
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_durable_service_computes_cache_miss_inline() {
    let stores = Stores::memory();
    let service = durable_service(&stores);
    materialize(service.pipeline()).await;

    let list = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(list.source, SuggestionSource::Calculated);
    assert_eq!(list.total_generated, Some(6));
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 6);

    let err = service.workflow_status("link-suggestions-site-1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_durable_service_surfaces_missing_authority() {
    let stores = Stores::memory();
    let service = durable_service(&stores);
    let pipeline = service.pipeline();
    pipeline.ingest(SITE, &helpers::crawl()).await.unwrap();
    pipeline.embed(SITE).await.unwrap();
    pipeline.cluster(SITE).await.unwrap();

    let err = service.get_links(SITE, false).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionMissing(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_durable_service_serves_cache_without_starting_workflow() {
    let stores = Stores::memory();
    let service = durable_service(&stores);
    materialize(service.pipeline()).await;
    service.pipeline().recommend(SITE).await.unwrap();

    let list = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(list.source, SuggestionSource::Cache);
    assert_eq!(list.suggestions.len(), 6);

    let err = service.workflow_status("link-suggestions-site-1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_missing_authority_is_precondition_error() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    let pipeline = service.pipeline();
    pipeline.ingest(SITE, &helpers::crawl()).await.unwrap();
    pipeline.embed(SITE).await.unwrap();
    pipeline.cluster(SITE).await.unwrap();

    let err = service.get_links(SITE, false).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionMissing(_)), "got {:?}", err);
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_analytics_store_returns_empty_list() {
    let stores = Stores::memory().without_analytics();
    let service = inline_service(&stores);
    service.ingest(SITE, &helpers::crawl()).await.unwrap();

    let list = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(list.source, SuggestionSource::Calculated);
    assert!(list.suggestions.is_empty());
    assert_eq!(list.total_generated, Some(0));
}

#[tokio::test]
async fn test_failed_cache_write_still_returns_suggestions() {
    let memory = Arc::new(MemoryStore::new());
    let mut stores = Stores::from_memory(memory.clone());
    stores.suggestions = Arc::new(FailingWrites(memory));
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;

    let list = ready(service.get_links(SITE, false).await.unwrap());
    assert_eq!(list.source, SuggestionSource::Calculated);
    assert_eq!(list.suggestions.len(), 6);
    assert_eq!(stores.suggestions.count(SITE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_suggestions_are_deterministic() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let stores = Stores::memory();
        let service = inline_service(&stores);
        materialize(service.pipeline()).await;
        runs.push(ready(service.get_links(SITE, true).await.unwrap()).suggestions);
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_inline_read_matches_recommend_stage() {
    let inline_stores = Stores::memory();
    let service = inline_service(&inline_stores);
    materialize(service.pipeline()).await;
    let inline = ready(service.get_links(SITE, true).await.unwrap()).suggestions;

    let staged_stores = Stores::memory();
    let staged = pipeline(&staged_stores);
    materialize(&staged).await;
    let summary = staged.recommend(SITE).await.unwrap();
    assert_eq!(summary.persisted, 6);
    let cached = staged_stores.suggestions.get_top(SITE, 100).await.unwrap();

    assert_eq!(pairs(&inline), pairs(&cached));
    assert_eq!(inline, cached);
}

#[tokio::test]
async fn test_purge_page_removes_page_and_suggestions() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;
    service.get_links(SITE, false).await.unwrap();

    let target = id("blog/c");
    let summary = service.purge_page(SITE, &target).await.unwrap();
    assert!(summary.page_removed);
    assert!(summary.embedding_removed);
    assert!(summary.suggestions_removed > 0);

    let remaining = stores.suggestions.get_top(SITE, 100).await.unwrap();
    assert!(remaining
        .iter()
        .all(|s| s.from_page_id != target && s.to_page_id != target));

    let err = service.purge_page(SITE, &target).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_authority_listing_is_sorted() {
    let stores = Stores::memory();
    let service = inline_service(&stores);
    materialize(service.pipeline()).await;

    let results = service.authority(SITE).await.unwrap();
    assert_eq!(results.len(), 5);
    for window in results.windows(2) {
        assert!(window[0].target_authority() >= window[1].target_authority());
    }
}
