//! EMBED: vectorize page text and overwrite stored embeddings.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use linkrank_core::{Error, PageEmbedding, PageText, PipelineStage, Result};

use super::{skip_if_unavailable, Pipeline};
use crate::handler::{StageContext, StageHandler, StageResult};

/// Counts reported by the EMBED stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedSummary {
    pub pages: u64,
    pub batches: u64,
    /// Texts the backend returned an empty vector for.
    pub skipped: u64,
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl Pipeline {
    /// Embed every crawled page with content. Vectors are overwritten; the
    /// previous cluster ids stay until the next CLUSTER run.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "embed"))]
    pub async fn embed(&self, site_id: &str) -> Result<EmbedSummary> {
        skip_if_unavailable(site_id, PipelineStage::Embed, self.embed_pages(site_id).await)
    }

    async fn embed_pages(&self, site_id: &str) -> Result<EmbedSummary> {
        let start = Instant::now();
        let texts = self.stores.graph.pages_for_embedding(site_id).await?;
        if texts.is_empty() {
            info!(site_id, "No page content to embed");
            return Ok(EmbedSummary::default());
        }

        let batch_size = self.config.embed_batch_size.max(1);
        let concurrency = self.config.embed_concurrency.max(1);
        let max_chars = self.config.embed_max_chars;
        let embedder = &self.embedder;
        let embeddings = &self.stores.embeddings;

        let batches: Vec<Vec<PageText>> = texts.chunks(batch_size).map(<[_]>::to_vec).collect();

        let summary = stream::iter(batches)
            .map(|chunk: Vec<PageText>| async move {
                let inputs: Vec<String> = chunk
                    .iter()
                    .map(|p| truncate_chars(&p.text, max_chars).to_string())
                    .collect();
                let vectors = embedder.embed_texts(&inputs).await?;
                if vectors.len() != chunk.len() {
                    return Err(Error::Embedding(format!(
                        "backend returned {} vectors for {} texts",
                        vectors.len(),
                        chunk.len()
                    )));
                }

                let mut rows = Vec::with_capacity(chunk.len());
                let mut skipped = 0u64;
                for (page, vector) in chunk.iter().zip(vectors) {
                    let vector = vector.to_vec();
                    if vector.is_empty() {
                        skipped += 1;
                        continue;
                    }
                    rows.push(PageEmbedding {
                        page_id: page.page_id.clone(),
                        vector,
                        cluster_id: None,
                    });
                }
                let written = embeddings.upsert_embeddings(site_id, &rows).await?;
                debug!(site_id, written, skipped, "Embedding batch written");
                Ok(EmbedSummary {
                    pages: written,
                    batches: 1,
                    skipped,
                })
            })
            .buffer_unordered(concurrency)
            .try_fold(EmbedSummary::default(), |acc, part| async move {
                Ok(EmbedSummary {
                    pages: acc.pages + part.pages,
                    batches: acc.batches + part.batches,
                    skipped: acc.skipped + part.skipped,
                })
            })
            .await?;

        if summary.skipped > 0 {
            warn!(site_id, skipped = summary.skipped, "Backend returned empty vectors");
        }
        info!(
            site_id,
            pages = summary.pages,
            batches = summary.batches,
            model = self.embedder.model_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding complete"
        );
        Ok(summary)
    }
}

/// Durable handler for the EMBED stage.
pub struct EmbedHandler {
    pipeline: Arc<Pipeline>,
}

impl EmbedHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StageHandler for EmbedHandler {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Embed
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "embed", run_id = %ctx.run_id, site_id = %ctx.site_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: StageContext) -> StageResult {
        StageResult::from_outcome(self.pipeline.embed(&ctx.site_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_ascii() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 8000), "abc");
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_chars(text, 2), "éé");
        assert_eq!(truncate_chars(text, 0), "");
    }
}
