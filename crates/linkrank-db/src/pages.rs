//! Page graph store: pages, internal links, cluster ids and authority.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use linkrank_core::{
    AuthorityResult, ClusterAssignment, Error, LinkEdge, Page, PageGraphStore, PageRecord,
    PageStatus, PageText, Result,
};

/// PostgreSQL implementation of [`PageGraphStore`].
#[derive(Clone)]
pub struct PgPageGraphStore {
    pool: Pool<Postgres>,
}

impl PgPageGraphStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_page_row(row: sqlx::postgres::PgRow) -> Result<Page> {
        let status: String = row.get("status");
        Ok(Page {
            page_id: row.get("page_id"),
            site_id: row.get("site_id"),
            url: row.get("url"),
            title: row.get("title"),
            status: status.parse::<PageStatus>().map_err(Error::Internal)?,
            word_count: row.get("word_count"),
            content_score: row.get("content_score"),
            cluster_id: row.get("cluster_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl PageGraphStore for PgPageGraphStore {
    async fn upsert_pages(&self, site_id: &str, pages: &[PageRecord]) -> Result<u64> {
        if pages.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut written = 0u64;

        for page in pages {
            // Placeholders for uncrawled link targets must not clobber real pages.
            let sql = if page.status == PageStatus::Pending {
                "INSERT INTO page (site_id, page_id, url, title, status, word_count, content_score,
                                   content, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                 ON CONFLICT (site_id, page_id) DO NOTHING"
            } else {
                "INSERT INTO page (site_id, page_id, url, title, status, word_count, content_score,
                                   content, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                 ON CONFLICT (site_id, page_id) DO UPDATE
                 SET url = EXCLUDED.url, title = EXCLUDED.title, status = EXCLUDED.status,
                     word_count = EXCLUDED.word_count, content_score = EXCLUDED.content_score,
                     content = EXCLUDED.content, updated_at = EXCLUDED.updated_at"
            };
            let result = sqlx::query(sql)
                .bind(site_id)
                .bind(&page.page_id)
                .bind(&page.url)
                .bind(&page.title)
                .bind(page.status.as_str())
                .bind(page.word_count)
                .bind(page.content_score)
                .bind(&page.content)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        debug!(
            subsystem = "database",
            component = "pages",
            op = "upsert_pages",
            site_id,
            requested = pages.len(),
            written,
            "Upserted pages"
        );
        Ok(written)
    }

    async fn upsert_edges(&self, site_id: &str, edges: &[LinkEdge]) -> Result<u64> {
        if edges.is_empty() {
            return Ok(0);
        }
        let sources: Vec<&str> = edges.iter().map(|e| e.source.as_str()).collect();
        let targets: Vec<&str> = edges.iter().map(|e| e.target.as_str()).collect();
        let weights: Vec<f64> = edges.iter().map(|e| e.weight).collect();

        let result = sqlx::query(
            "INSERT INTO page_link (site_id, source_id, target_id, weight, updated_at)
             SELECT $1, e.source_id, e.target_id, e.weight, $5
             FROM UNNEST($2::text[], $3::text[], $4::float8[]) AS e(source_id, target_id, weight)
             WHERE e.source_id <> e.target_id
             ON CONFLICT (site_id, source_id, target_id) DO UPDATE
             SET weight = EXCLUDED.weight, updated_at = EXCLUDED.updated_at",
        )
        .bind(site_id)
        .bind(&sources)
        .bind(&targets)
        .bind(&weights)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn list_pages(&self, site_id: &str) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            "SELECT site_id, page_id, url, title, status, word_count, content_score, cluster_id,
                    created_at, updated_at
             FROM page
             WHERE site_id = $1
             ORDER BY page_id COLLATE \"C\"",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_page_row).collect()
    }

    async fn pages_for_embedding(&self, site_id: &str) -> Result<Vec<PageText>> {
        let rows = sqlx::query(
            "SELECT page_id, content FROM page
             WHERE site_id = $1 AND status = 'ok'
               AND content IS NOT NULL AND length(btrim(content)) > 0
             ORDER BY page_id COLLATE \"C\"",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| PageText {
                page_id: row.get("page_id"),
                text: row.get("content"),
            })
            .collect())
    }

    async fn get_all_edges(&self, site_id: &str) -> Result<Vec<LinkEdge>> {
        let rows = sqlx::query(
            "SELECT source_id, target_id, weight FROM page_link
             WHERE site_id = $1
             ORDER BY source_id COLLATE \"C\", target_id COLLATE \"C\"",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| LinkEdge {
                source: row.get("source_id"),
                target: row.get("target_id"),
                weight: row.get("weight"),
            })
            .collect())
    }

    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()> {
        let page_ids: Vec<&str> = assignments.iter().map(|a| a.page_id.as_str()).collect();
        let cluster_ids: Vec<i32> = assignments.iter().map(|a| a.cluster_id).collect();
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "UPDATE page SET cluster_id = NULL, updated_at = $2
             WHERE site_id = $1 AND cluster_id IS NOT NULL",
        )
        .bind(site_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE page p SET cluster_id = a.cluster_id, updated_at = $4
             FROM UNNEST($2::text[], $3::int4[]) AS a(page_id, cluster_id)
             WHERE p.site_id = $1 AND p.page_id = a.page_id",
        )
        .bind(site_id)
        .bind(&page_ids)
        .bind(&cluster_ids)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn write_authority(&self, site_id: &str, scores: &[AuthorityResult]) -> Result<()> {
        let page_ids: Vec<&str> = scores.iter().map(|s| s.page_id.as_str()).collect();
        let prs: Vec<f64> = scores.iter().map(|s| s.pr).collect();
        let tsprs: Vec<Option<f64>> = scores.iter().map(|s| s.tspr).collect();
        let inlinks: Vec<i64> = scores.iter().map(|s| s.inlinks).collect();
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "UPDATE page SET pr = NULL, tspr = NULL, inlinks = 0, updated_at = $2
             WHERE site_id = $1",
        )
        .bind(site_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE page p SET pr = a.pr, tspr = a.tspr, inlinks = a.inlinks, updated_at = $6
             FROM UNNEST($2::text[], $3::float8[], $4::float8[], $5::int8[])
                  AS a(page_id, pr, tspr, inlinks)
             WHERE p.site_id = $1 AND p.page_id = a.page_id",
        )
        .bind(site_id)
        .bind(&page_ids)
        .bind(&prs)
        .bind(&tsprs)
        .bind(&inlinks)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn get_authority_results(&self, site_id: &str) -> Result<Vec<AuthorityResult>> {
        let rows = sqlx::query(
            "SELECT page_id, pr, tspr, cluster_id, inlinks FROM page
             WHERE site_id = $1 AND pr IS NOT NULL
             ORDER BY page_id COLLATE \"C\"",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| AuthorityResult {
                page_id: row.get("page_id"),
                pr: row.get("pr"),
                tspr: row.get("tspr"),
                cluster: row.get("cluster_id"),
                inlinks: row.get("inlinks"),
            })
            .collect())
    }

    async fn purge_page(&self, site_id: &str, page_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "DELETE FROM page_link WHERE site_id = $1 AND (source_id = $2 OR target_id = $2)",
        )
        .bind(site_id)
        .bind(page_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let result = sqlx::query("DELETE FROM page WHERE site_id = $1 AND page_id = $2")
            .bind(site_id)
            .bind(page_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
