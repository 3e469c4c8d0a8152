//! In-process stores.
//!
//! `MemoryStore` implements every store trait over `tokio::sync::RwLock`
//! guarded maps. It backs `STORE_BACKEND=memory` deployments and the test
//! suites, and mirrors the PostgreSQL semantics: wholesale replacement of
//! clusters/authority/suggestions under a single write lock, dedup of active
//! runs per site and workflow, and due-time ordered stage claiming.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use linkrank_core::{
    new_v7, AuthorityResult, ClusterAssignment, EmbeddingStore, Error, LinkEdge, LinkSuggestion,
    NewRun, Page, PageEmbedding, PageGraphStore, PageRecord, PageStatus, PageText, PipelineStage,
    Result, RunRepository, RunStart, RunStatus, StageJob, SuggestionStore, WorkflowRun,
};

type SiteKey = (String, String);

#[derive(Debug, Clone)]
struct PageRow {
    page: Page,
    content: Option<String>,
    pr: Option<f64>,
    tspr: Option<f64>,
    inlinks: i64,
}

#[derive(Debug, Clone)]
struct JobRow {
    job: StageJob,
    task_queue: String,
    seq: u64,
}

#[derive(Default)]
struct MemoryState {
    pages: BTreeMap<SiteKey, PageRow>,
    /// (site, source, target) -> weight
    edges: BTreeMap<(String, String, String), f64>,
    embeddings: BTreeMap<SiteKey, PageEmbedding>,
    suggestions: HashMap<String, Vec<LinkSuggestion>>,
    runs: HashMap<Uuid, WorkflowRun>,
    jobs: Vec<JobRow>,
    next_seq: u64,
}

impl MemoryState {
    fn site_pages<'a>(&'a self, site_id: &'a str) -> impl Iterator<Item = &'a PageRow> + 'a {
        self.pages
            .range((site_id.to_string(), String::new())..)
            .take_while(move |((site, _), _)| site == site_id)
            .map(|(_, row)| row)
    }

    fn site_pages_mut<'a>(
        &'a mut self,
        site_id: &'a str,
    ) -> impl Iterator<Item = &'a mut PageRow> + 'a {
        self.pages
            .range_mut((site_id.to_string(), String::new())..)
            .take_while(move |((site, _), _)| site == site_id)
            .map(|(_, row)| row)
    }

    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut JobRow> {
        self.jobs
            .iter_mut()
            .find(|row| row.job.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("stage job {job_id}")))
    }

    fn push_job(&mut self, run: &WorkflowRun, stage: PipelineStage, max_attempts: i32, now: DateTime<Utc>) {
        self.next_seq += 1;
        self.jobs.push(JobRow {
            job: StageJob {
                id: new_v7(),
                run_id: run.id,
                site_id: run.site_id.clone(),
                workflow_name: run.workflow_name,
                stage,
                status: RunStatus::Pending,
                attempt: 1,
                max_attempts,
                run_after: now,
                args: run.args.clone(),
                error: None,
            },
            task_queue: run.task_queue.clone(),
            seq: self.next_seq,
        });
    }
}

/// In-memory implementation of every linkrank store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageGraphStore for MemoryStore {
    async fn upsert_pages(&self, site_id: &str, pages: &[PageRecord]) -> Result<u64> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut written = 0u64;

        for record in pages {
            let key = (site_id.to_string(), record.page_id.clone());
            match state.pages.get_mut(&key) {
                Some(_) if record.status == PageStatus::Pending => {}
                Some(row) => {
                    row.page.url = record.url.clone();
                    row.page.title = record.title.clone();
                    row.page.status = record.status;
                    row.page.word_count = record.word_count;
                    row.page.content_score = record.content_score;
                    row.page.updated_at = now;
                    row.content = record.content.clone();
                    written += 1;
                }
                None => {
                    state.pages.insert(
                        key,
                        PageRow {
                            page: Page {
                                page_id: record.page_id.clone(),
                                site_id: site_id.to_string(),
                                url: record.url.clone(),
                                title: record.title.clone(),
                                status: record.status,
                                word_count: record.word_count,
                                content_score: record.content_score,
                                cluster_id: None,
                                created_at: now,
                                updated_at: now,
                            },
                            content: record.content.clone(),
                            pr: None,
                            tspr: None,
                            inlinks: 0,
                        },
                    );
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn upsert_edges(&self, site_id: &str, edges: &[LinkEdge]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut written = 0u64;
        for edge in edges.iter().filter(|e| e.source != e.target) {
            state.edges.insert(
                (site_id.to_string(), edge.source.clone(), edge.target.clone()),
                edge.weight,
            );
            written += 1;
        }
        Ok(written)
    }

    async fn list_pages(&self, site_id: &str) -> Result<Vec<Page>> {
        let state = self.state.read().await;
        Ok(state.site_pages(site_id).map(|row| row.page.clone()).collect())
    }

    async fn pages_for_embedding(&self, site_id: &str) -> Result<Vec<PageText>> {
        let state = self.state.read().await;
        Ok(state
            .site_pages(site_id)
            .filter(|row| row.page.status == PageStatus::Ok)
            .filter_map(|row| {
                let text = row.content.as_deref()?;
                (!text.trim().is_empty()).then(|| PageText {
                    page_id: row.page.page_id.clone(),
                    text: text.to_string(),
                })
            })
            .collect())
    }

    async fn get_all_edges(&self, site_id: &str) -> Result<Vec<LinkEdge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|((site, _, _), _)| site == site_id)
            .map(|((_, source, target), weight)| LinkEdge {
                source: source.clone(),
                target: target.clone(),
                weight: *weight,
            })
            .collect())
    }

    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()> {
        let lookup: HashMap<&str, i32> = assignments
            .iter()
            .map(|a| (a.page_id.as_str(), a.cluster_id))
            .collect();
        let mut state = self.state.write().await;
        for row in state.site_pages_mut(site_id) {
            row.page.cluster_id = lookup.get(row.page.page_id.as_str()).copied();
        }
        Ok(())
    }

    async fn write_authority(&self, site_id: &str, scores: &[AuthorityResult]) -> Result<()> {
        let lookup: HashMap<&str, &AuthorityResult> =
            scores.iter().map(|s| (s.page_id.as_str(), s)).collect();
        let mut state = self.state.write().await;
        for row in state.site_pages_mut(site_id) {
            match lookup.get(row.page.page_id.as_str()) {
                Some(score) => {
                    row.pr = Some(score.pr);
                    row.tspr = score.tspr;
                    row.inlinks = score.inlinks;
                }
                None => {
                    row.pr = None;
                    row.tspr = None;
                    row.inlinks = 0;
                }
            }
        }
        Ok(())
    }

    async fn get_authority_results(&self, site_id: &str) -> Result<Vec<AuthorityResult>> {
        let state = self.state.read().await;
        Ok(state
            .site_pages(site_id)
            .filter_map(|row| {
                Some(AuthorityResult {
                    page_id: row.page.page_id.clone(),
                    pr: row.pr?,
                    tspr: row.tspr,
                    cluster: row.page.cluster_id,
                    inlinks: row.inlinks,
                })
            })
            .collect())
    }

    async fn purge_page(&self, site_id: &str, page_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state
            .edges
            .retain(|(site, source, target), _| !(site == site_id && (source == page_id || target == page_id)));
        Ok(state
            .pages
            .remove(&(site_id.to_string(), page_id.to_string()))
            .is_some())
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn upsert_embeddings(&self, site_id: &str, embeddings: &[PageEmbedding]) -> Result<u64> {
        let mut state = self.state.write().await;
        for embedding in embeddings {
            let key = (site_id.to_string(), embedding.page_id.clone());
            let cluster_id = state.embeddings.get(&key).and_then(|e| e.cluster_id);
            state.embeddings.insert(
                key,
                PageEmbedding {
                    page_id: embedding.page_id.clone(),
                    vector: embedding.vector.clone(),
                    cluster_id,
                },
            );
        }
        Ok(embeddings.len() as u64)
    }

    async fn get_embeddings(&self, site_id: &str) -> Result<Vec<PageEmbedding>> {
        let state = self.state.read().await;
        Ok(state
            .embeddings
            .range((site_id.to_string(), String::new())..)
            .take_while(|((site, _), _)| site == site_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()> {
        let lookup: HashMap<&str, i32> = assignments
            .iter()
            .map(|a| (a.page_id.as_str(), a.cluster_id))
            .collect();
        let mut state = self.state.write().await;
        for ((site, page_id), embedding) in state.embeddings.iter_mut() {
            if site == site_id {
                embedding.cluster_id = lookup.get(page_id.as_str()).copied();
            }
        }
        Ok(())
    }

    async fn delete_embedding(&self, site_id: &str, page_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .embeddings
            .remove(&(site_id.to_string(), page_id.to_string()))
            .is_some())
    }
}

#[async_trait]
impl SuggestionStore for MemoryStore {
    async fn get_top(&self, site_id: &str, limit: usize) -> Result<Vec<LinkSuggestion>> {
        let state = self.state.read().await;
        Ok(state
            .suggestions
            .get(site_id)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn replace(&self, site_id: &str, suggestions: &[LinkSuggestion]) -> Result<u64> {
        let mut ranked = suggestions.to_vec();
        ranked.sort_by(|a, b| a.rank_cmp(b));
        let mut state = self.state.write().await;
        state.suggestions.insert(site_id.to_string(), ranked);
        Ok(suggestions.len() as u64)
    }

    async fn count(&self, site_id: &str) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.suggestions.get(site_id).map_or(0, |list| list.len() as i64))
    }

    async fn delete_for_page(&self, site_id: &str, page_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(list) = state.suggestions.get_mut(site_id) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|s| s.from_page_id != page_id && s.to_page_id != page_id);
        Ok((before - list.len()) as u64)
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn create_run(&self, req: NewRun) -> Result<RunStart> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .runs
            .values()
            .filter(|r| {
                r.site_id == req.site_id
                    && r.workflow_name == req.workflow_name
                    && r.status.is_active()
            })
            .max_by_key(|r| r.created_at)
        {
            return Ok(RunStart {
                run: existing.clone(),
                deduplicated: true,
            });
        }

        let run = WorkflowRun {
            id: new_v7(),
            workflow_id: req.workflow_id,
            workflow_name: req.workflow_name,
            site_id: req.site_id,
            task_queue: req.task_queue,
            stage: req.workflow_name.first_stage(),
            status: RunStatus::Pending,
            args: req.args,
            error: None,
            created_at: now,
            updated_at: now,
        };
        state.push_job(&run, run.stage, req.max_attempts, now);
        state.runs.insert(run.id, run.clone());

        Ok(RunStart {
            run,
            deduplicated: false,
        })
    }

    async fn claim_next_stage(&self, task_queue: &str) -> Result<Option<StageJob>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let Some(idx) = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.task_queue == task_queue
                    && row.job.status == RunStatus::Pending
                    && row.job.run_after <= now
            })
            .min_by_key(|(_, row)| (row.job.run_after, row.seq))
            .map(|(idx, _)| idx)
        else {
            return Ok(None);
        };

        let job = {
            let row = &mut state.jobs[idx];
            row.job.status = RunStatus::Running;
            row.job.clone()
        };
        if let Some(run) = state.runs.get_mut(&job.run_id) {
            run.status = RunStatus::Running;
            run.stage = job.stage;
            run.updated_at = now;
        }
        Ok(Some(job))
    }

    async fn complete_stage(&self, job_id: Uuid, next: Option<PipelineStage>) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let (run_id, max_attempts) = {
            let row = state.job_mut(job_id)?;
            row.job.status = RunStatus::Done;
            row.job.error = None;
            (row.job.run_id, row.job.max_attempts)
        };
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))?;
        run.updated_at = now;
        run.error = None;
        match next {
            Some(stage) => {
                run.stage = stage;
                let run = run.clone();
                state.push_job(&run, stage, max_attempts, now);
            }
            None => run.status = RunStatus::Done,
        }
        Ok(())
    }

    async fn retry_stage(&self, job_id: Uuid, error: &str, run_after: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let run_id = {
            let row = state.job_mut(job_id)?;
            row.job.status = RunStatus::Pending;
            row.job.attempt += 1;
            row.job.error = Some(error.to_string());
            row.job.run_after = run_after;
            row.job.run_id
        };
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.error = Some(error.to_string());
            run.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_stage(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let run_id = {
            let row = state.job_mut(job_id)?;
            row.job.status = RunStatus::Failed;
            row.job.error = Some(error.to_string());
            row.job.run_id
        };
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.status = RunStatus::Failed;
            run.error = Some(error.to_string());
            run.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let state = self.state.read().await;
        Ok(state.runs.get(&run_id).cloned())
    }

    async fn latest_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn list_stage_jobs(&self, run_id: Uuid) -> Result<Vec<StageJob>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|row| row.job.run_id == run_id)
            .map(|row| row.job.clone())
            .collect())
    }
}

/// Store used when the analytics database is disabled.
///
/// Every operation fails with `StoreUnavailable`; callers treat that as a
/// configuration state and degrade to empty results.
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn unavailable<T>() -> Result<T> {
        Err(Error::StoreUnavailable(
            "analytics store is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl EmbeddingStore for UnavailableStore {
    async fn upsert_embeddings(&self, _site_id: &str, _embeddings: &[PageEmbedding]) -> Result<u64> {
        Self::unavailable()
    }

    async fn get_embeddings(&self, _site_id: &str) -> Result<Vec<PageEmbedding>> {
        Self::unavailable()
    }

    async fn set_clusters(&self, _site_id: &str, _assignments: &[ClusterAssignment]) -> Result<()> {
        Self::unavailable()
    }

    async fn delete_embedding(&self, _site_id: &str, _page_id: &str) -> Result<bool> {
        Self::unavailable()
    }
}

#[async_trait]
impl SuggestionStore for UnavailableStore {
    async fn get_top(&self, _site_id: &str, _limit: usize) -> Result<Vec<LinkSuggestion>> {
        Self::unavailable()
    }

    async fn replace(&self, _site_id: &str, _suggestions: &[LinkSuggestion]) -> Result<u64> {
        Self::unavailable()
    }

    async fn count(&self, _site_id: &str) -> Result<i64> {
        Self::unavailable()
    }

    async fn delete_for_page(&self, _site_id: &str, _page_id: &str) -> Result<u64> {
        Self::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkrank_core::WorkflowName;

    fn record(id: &str, status: PageStatus) -> PageRecord {
        PageRecord {
            page_id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: Some(id.to_uppercase()),
            status,
            word_count: 10,
            content_score: 0.5,
            content: (status == PageStatus::Ok).then(|| format!("content of {id}")),
        }
    }

    #[tokio::test]
    async fn test_pending_record_does_not_overwrite_crawled_page() {
        let store = MemoryStore::new();
        store
            .upsert_pages("s", &[record("a", PageStatus::Ok)])
            .await
            .unwrap();
        let written = store
            .upsert_pages("s", &[record("a", PageStatus::Pending)])
            .await
            .unwrap();

        assert_eq!(written, 0);
        let pages = store.list_pages("s").await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].status, PageStatus::Ok);
    }

    #[tokio::test]
    async fn test_sites_are_isolated() {
        let store = MemoryStore::new();
        store
            .upsert_pages("s1", &[record("a", PageStatus::Ok)])
            .await
            .unwrap();
        store
            .upsert_pages("s10", &[record("b", PageStatus::Ok)])
            .await
            .unwrap();

        let s1 = store.list_pages("s1").await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].page_id, "a");
    }

    #[tokio::test]
    async fn test_self_edges_are_dropped() {
        let store = MemoryStore::new();
        let edges = vec![
            LinkEdge {
                source: "a".into(),
                target: "a".into(),
                weight: 1.0,
            },
            LinkEdge {
                source: "a".into(),
                target: "b".into(),
                weight: 1.0,
            },
        ];
        assert_eq!(store.upsert_edges("s", &edges).await.unwrap(), 1);
        assert_eq!(store.get_all_edges("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_re_embedding_keeps_cluster_until_reclustered() {
        let store = MemoryStore::new();
        let emb = PageEmbedding {
            page_id: "a".into(),
            vector: vec![0.1, 0.2],
            cluster_id: None,
        };
        store.upsert_embeddings("s", &[emb.clone()]).await.unwrap();
        EmbeddingStore::set_clusters(
            &store,
            "s",
            &[ClusterAssignment {
                page_id: "a".into(),
                cluster_id: 3,
            }],
        )
        .await
        .unwrap();
        store
            .upsert_embeddings(
                "s",
                &[PageEmbedding {
                    vector: vec![0.3, 0.4],
                    ..emb
                }],
            )
            .await
            .unwrap();

        let stored = store.get_embeddings("s").await.unwrap();
        assert_eq!(stored[0].vector, vec![0.3, 0.4]);
        assert_eq!(stored[0].cluster_id, Some(3));
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_store_unavailable() {
        let store = UnavailableStore;
        let err = store.get_top("s", 10).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_claim_skips_jobs_not_yet_due() {
        let store = MemoryStore::new();
        let start = store
            .create_run(NewRun::new(
                WorkflowName::GenerateLinkSuggestions,
                "s",
                "wf",
                serde_json::json!({"site_id": "s"}),
            ))
            .await
            .unwrap();
        let job = store
            .claim_next_stage(linkrank_core::defaults::TASK_QUEUE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.run_id, start.run.id);

        store
            .retry_stage(job.id, "boom", Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert!(store
            .claim_next_stage(linkrank_core::defaults::TASK_QUEUE)
            .await
            .unwrap()
            .is_none());
    }
}
