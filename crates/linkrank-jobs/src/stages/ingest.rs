//! INGEST: upsert crawled pages and their internal links.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use linkrank_core::{
    defaults, page_id_for_url, CrawledPage, Error, IngestSummary, LinkEdge, PageRecord,
    PageStatus, PipelineStage, Result,
};

use super::Pipeline;
use crate::handler::{StageContext, StageHandler, StageResult};

/// One ingest batch, ready to write.
#[derive(Debug, Default)]
struct IngestBatch {
    pages: Vec<PageRecord>,
    pending: Vec<PageRecord>,
    edges: Vec<LinkEdge>,
}

/// Strip the fragment so `page#a` and `page#b` are the same page.
fn canonical_url(url: &str) -> &str {
    let url = url.trim();
    url.split_once('#').map(|(base, _)| base).unwrap_or(url)
}

fn page_record(page: &CrawledPage) -> PageRecord {
    PageRecord {
        page_id: page_id_for_url(&page.url),
        url: canonical_url(&page.url).to_string(),
        title: page.title.clone(),
        status: page.status,
        word_count: page.effective_word_count(),
        content_score: page.content_score.unwrap_or(0.0),
        content: page.content.clone(),
    }
}

/// Build the batch for a slice of crawled pages.
///
/// Links to the same target collapse into one edge whose weight is the sum
/// of the link weights. Self-links and links with unusable weights are
/// dropped. Targets not crawled in this ingest become pending placeholders.
fn build_batch(pages: &[CrawledPage], crawled: &BTreeSet<String>) -> IngestBatch {
    let mut batch = IngestBatch::default();
    let mut weights: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut pending: BTreeMap<String, String> = BTreeMap::new();

    for page in pages {
        let record = page_record(page);
        for link in &page.links {
            if link.url.trim().is_empty() {
                continue;
            }
            let target = page_id_for_url(&link.url);
            if target == record.page_id {
                continue;
            }
            let weight = link.weight.unwrap_or(defaults::DEFAULT_EDGE_WEIGHT);
            if !weight.is_finite() || weight <= 0.0 {
                continue;
            }
            *weights
                .entry((record.page_id.clone(), target.clone()))
                .or_insert(0.0) += weight;
            if !crawled.contains(&target) {
                pending
                    .entry(target)
                    .or_insert_with(|| canonical_url(&link.url).to_string());
            }
        }
        batch.pages.push(record);
    }

    batch.edges = weights
        .into_iter()
        .map(|((source, target), weight)| LinkEdge {
            source,
            target,
            weight,
        })
        .collect();
    batch.pending = pending
        .into_iter()
        .map(|(page_id, url)| PageRecord {
            page_id,
            url,
            title: None,
            status: PageStatus::Pending,
            word_count: 0,
            content_score: 0.0,
            content: None,
        })
        .collect();
    batch
}

/// Counts reported by an explicit page purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub page_removed: bool,
    pub embedding_removed: bool,
    pub suggestions_removed: u64,
}

impl Pipeline {
    /// Upsert a crawl batch. Re-ingesting the same batch updates pages and
    /// edge weights in place.
    #[instrument(skip(self, pages), fields(subsystem = "jobs", component = "ingest", page_count = pages.len()))]
    pub async fn ingest(&self, site_id: &str, pages: &[CrawledPage]) -> Result<IngestSummary> {
        if site_id.trim().is_empty() {
            return Err(Error::InvalidInput("site id must not be empty".to_string()));
        }
        let start = Instant::now();

        // Last occurrence of a URL wins.
        let mut unique: BTreeMap<String, &CrawledPage> = BTreeMap::new();
        for page in pages {
            if page.url.trim().is_empty() {
                warn!(site_id, "Skipping crawled page without URL");
                continue;
            }
            unique.insert(page_id_for_url(&page.url), page);
        }
        let crawled: BTreeSet<String> = unique.keys().cloned().collect();
        let pages: Vec<CrawledPage> = unique.into_values().cloned().collect();

        let batch_size = self.config.ingest_batch_size.max(1);
        let concurrency = self.config.ingest_concurrency.max(1);
        let graph = &self.stores.graph;
        let batches: Vec<IngestBatch> = pages
            .chunks(batch_size)
            .map(|chunk| build_batch(chunk, &crawled))
            .collect();

        let totals = stream::iter(batches)
            .map(|batch: IngestBatch| async move {
                let written = graph.upsert_pages(site_id, &batch.pages).await?;
                let pending = graph.upsert_pages(site_id, &batch.pending).await?;
                let edges = graph.upsert_edges(site_id, &batch.edges).await?;
                debug!(
                    site_id,
                    pages = written,
                    pending_pages = pending,
                    edges,
                    "Ingest batch written"
                );
                Ok::<_, Error>(IngestSummary {
                    pages: written,
                    pending_pages: pending,
                    edges,
                })
            })
            .buffer_unordered(concurrency)
            .try_fold(IngestSummary::default(), |acc, part| async move {
                Ok(IngestSummary {
                    pages: acc.pages + part.pages,
                    pending_pages: acc.pending_pages + part.pending_pages,
                    edges: acc.edges + part.edges,
                })
            })
            .await?;

        info!(
            site_id,
            pages = totals.pages,
            pending_pages = totals.pending_pages,
            edges = totals.edges,
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingest complete"
        );
        Ok(totals)
    }

    /// Remove a page, its edges, its embedding and every suggestion
    /// referencing it. Analytics stores that are not configured are skipped.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "ingest", op = "purge"))]
    pub async fn purge_page(&self, site_id: &str, page_id: &str) -> Result<PurgeSummary> {
        let page_removed = self.stores.graph.purge_page(site_id, page_id).await?;

        let embedding_removed = match self.stores.embeddings.delete_embedding(site_id, page_id).await {
            Ok(removed) => removed,
            Err(Error::StoreUnavailable(_)) => false,
            Err(e) => return Err(e),
        };
        let suggestions_removed = match self.stores.suggestions.delete_for_page(site_id, page_id).await {
            Ok(n) => n,
            Err(Error::StoreUnavailable(_)) => 0,
            Err(e) => return Err(e),
        };

        info!(
            site_id,
            page_id,
            page_removed,
            embedding_removed,
            suggestions_removed,
            "Page purged"
        );
        Ok(PurgeSummary {
            page_removed,
            embedding_removed,
            suggestions_removed,
        })
    }
}

/// Durable handler for the INGEST stage.
pub struct IngestHandler {
    pipeline: Arc<Pipeline>,
}

impl IngestHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StageHandler for IngestHandler {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Ingest
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "ingest", run_id = %ctx.run_id, site_id = %ctx.site_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: StageContext) -> StageResult {
        StageResult::from_outcome(self.pipeline.ingest(&ctx.site_id, &ctx.args.pages).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkrank_core::CrawledLink;

    fn link(url: &str, weight: Option<f64>) -> CrawledLink {
        CrawledLink {
            url: url.to_string(),
            anchor_text: None,
            weight,
        }
    }

    fn crawled(url: &str, links: Vec<CrawledLink>) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            title: Some(url.to_string()),
            status: PageStatus::Ok,
            content: Some("some words here".to_string()),
            word_count: None,
            content_score: None,
            links,
        }
    }

    fn ids(urls: &[&str]) -> BTreeSet<String> {
        urls.iter().map(|u| page_id_for_url(u)).collect()
    }

    #[test]
    fn test_duplicate_links_sum_weights() {
        let pages = [crawled(
            "https://a.test/",
            vec![
                link("https://a.test/b", None),
                link("https://a.test/b#section", Some(2.0)),
            ],
        )];
        let batch = build_batch(&pages, &ids(&["https://a.test/", "https://a.test/b"]));

        assert_eq!(batch.edges.len(), 1);
        assert_eq!(batch.edges[0].weight, 3.0);
        assert!(batch.pending.is_empty());
    }

    #[test]
    fn test_self_links_and_bad_weights_dropped() {
        let pages = [crawled(
            "https://a.test/",
            vec![
                link("https://a.test/#top", None),
                link("https://a.test/c", Some(0.0)),
                link("https://a.test/d", Some(f64::NAN)),
                link("  ", None),
            ],
        )];
        let batch = build_batch(&pages, &ids(&["https://a.test/"]));
        assert!(batch.edges.is_empty());
        assert!(batch.pending.is_empty());
    }

    #[test]
    fn test_uncrawled_targets_become_pending() {
        let pages = [crawled("https://a.test/", vec![link("https://a.test/new", None)])];
        let batch = build_batch(&pages, &ids(&["https://a.test/"]));

        assert_eq!(batch.pending.len(), 1);
        assert_eq!(batch.pending[0].status, PageStatus::Pending);
        assert_eq!(batch.pending[0].url, "https://a.test/new");
        assert_eq!(batch.pending[0].page_id, page_id_for_url("https://a.test/new"));
    }

    #[test]
    fn test_page_record_counts_words() {
        let record = page_record(&crawled("https://a.test/x#frag", vec![]));
        assert_eq!(record.word_count, 3);
        assert_eq!(record.url, "https://a.test/x");
        assert_eq!(record.content_score, 0.0);
    }
}
