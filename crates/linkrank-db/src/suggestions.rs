//! Suggestion cache.
//!
//! `replace` swaps a site's whole set inside one transaction, so concurrent
//! readers observe either the previous set or the new one.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use linkrank_core::{Error, LinkSuggestion, Result, SuggestionStore};

/// PostgreSQL implementation of [`SuggestionStore`].
#[derive(Clone)]
pub struct PgSuggestionStore {
    pool: Pool<Postgres>,
}

impl PgSuggestionStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuggestionStore for PgSuggestionStore {
    async fn get_top(&self, site_id: &str, limit: usize) -> Result<Vec<LinkSuggestion>> {
        let rows = sqlx::query(
            "SELECT site_id, from_page_id, to_page_id, similarity, target_authority, score, reason
             FROM link_suggestion
             WHERE site_id = $1
             ORDER BY score DESC, from_page_id COLLATE \"C\", to_page_id COLLATE \"C\"
             LIMIT $2",
        )
        .bind(site_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| LinkSuggestion {
                site_id: row.get("site_id"),
                from_page_id: row.get("from_page_id"),
                to_page_id: row.get("to_page_id"),
                similarity: row.get("similarity"),
                target_authority: row.get("target_authority"),
                score: row.get("score"),
                reason: row.get("reason"),
            })
            .collect())
    }

    async fn replace(&self, site_id: &str, suggestions: &[LinkSuggestion]) -> Result<u64> {
        let from: Vec<&str> = suggestions.iter().map(|s| s.from_page_id.as_str()).collect();
        let to: Vec<&str> = suggestions.iter().map(|s| s.to_page_id.as_str()).collect();
        let similarity: Vec<f64> = suggestions.iter().map(|s| s.similarity).collect();
        let authority: Vec<f64> = suggestions.iter().map(|s| s.target_authority).collect();
        let score: Vec<f64> = suggestions.iter().map(|s| s.score).collect();
        let reason: Vec<&str> = suggestions.iter().map(|s| s.reason.as_str()).collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let deleted = sqlx::query("DELETE FROM link_suggestion WHERE site_id = $1")
            .bind(site_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let inserted = sqlx::query(
            "INSERT INTO link_suggestion
                 (site_id, from_page_id, to_page_id, similarity, target_authority, score, reason,
                  created_at)
             SELECT $1, s.from_id, s.to_id, s.similarity, s.authority, s.score, s.reason, $8
             FROM UNNEST($2::text[], $3::text[], $4::float8[], $5::float8[], $6::float8[],
                         $7::text[])
                  AS s(from_id, to_id, similarity, authority, score, reason)",
        )
        .bind(site_id)
        .bind(&from)
        .bind(&to)
        .bind(&similarity)
        .bind(&authority)
        .bind(&score)
        .bind(&reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "suggestions",
            op = "replace",
            site_id,
            deleted,
            inserted,
            "Replaced suggestion cache"
        );
        Ok(inserted)
    }

    async fn count(&self, site_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM link_suggestion WHERE site_id = $1")
            .bind(site_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn delete_for_page(&self, site_id: &str, page_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM link_suggestion
             WHERE site_id = $1 AND (from_page_id = $2 OR to_page_id = $2)",
        )
        .bind(site_id)
        .bind(page_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
