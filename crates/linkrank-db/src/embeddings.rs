//! Embedding store backed by pgvector.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};

use linkrank_core::{ClusterAssignment, EmbeddingStore, Error, PageEmbedding, Result};

/// PostgreSQL implementation of [`EmbeddingStore`].
#[derive(Clone)]
pub struct PgEmbeddingStore {
    pool: Pool<Postgres>,
}

impl PgEmbeddingStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingStore for PgEmbeddingStore {
    async fn upsert_embeddings(&self, site_id: &str, embeddings: &[PageEmbedding]) -> Result<u64> {
        if embeddings.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut written = 0u64;

        for embedding in embeddings {
            let vector = Vector::from(embedding.vector.clone());
            let result = sqlx::query(
                "INSERT INTO page_embedding (site_id, page_id, embedding, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (site_id, page_id) DO UPDATE
                 SET embedding = EXCLUDED.embedding, updated_at = EXCLUDED.updated_at",
            )
            .bind(site_id)
            .bind(&embedding.page_id)
            .bind(&vector)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(written)
    }

    async fn get_embeddings(&self, site_id: &str) -> Result<Vec<PageEmbedding>> {
        let rows = sqlx::query(
            "SELECT page_id, embedding, cluster_id FROM page_embedding
             WHERE site_id = $1
             ORDER BY page_id COLLATE \"C\"",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let vector: Vector = row.get("embedding");
                PageEmbedding {
                    page_id: row.get("page_id"),
                    vector: vector.to_vec(),
                    cluster_id: row.get("cluster_id"),
                }
            })
            .collect())
    }

    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()> {
        let page_ids: Vec<&str> = assignments.iter().map(|a| a.page_id.as_str()).collect();
        let cluster_ids: Vec<i32> = assignments.iter().map(|a| a.cluster_id).collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("UPDATE page_embedding SET cluster_id = NULL WHERE site_id = $1")
            .bind(site_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE page_embedding e SET cluster_id = a.cluster_id
             FROM UNNEST($2::text[], $3::int4[]) AS a(page_id, cluster_id)
             WHERE e.site_id = $1 AND e.page_id = a.page_id",
        )
        .bind(site_id)
        .bind(&page_ids)
        .bind(&cluster_ids)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_embedding(&self, site_id: &str, page_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM page_embedding WHERE site_id = $1 AND page_id = $2")
            .bind(site_id)
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
