//! SQLite-backed [`KnowledgeStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs next to the name of the
//! model that produced them; similarity is computed in Rust over the rows
//! of the requested model. Metadata is stored as JSON text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Platform, SearchFilter, SimilarityMatch, StoredBestPractice};

use super::{rank_by_priority, rank_matches, KnowledgeStats, KnowledgeStore};

const SELECT_COLUMNS: &str = "id, title, platform, category, goal, description, example_text, \
     source_type, source_url, embedding, embedding_model, metadata_json, quality_score, \
     priority_score, is_active, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Rows matching the SQL-expressible part of `filter`.
    ///
    /// Platform is matched in Rust because `multi` means a NULL column.
    async fn fetch_filtered(
        &self,
        filter: &SearchFilter,
        model: Option<&str>,
    ) -> Result<Vec<StoredBestPractice>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM best_practices
            WHERE (? IS NULL OR embedding_model = ?)
              AND (? = 0 OR is_active = 1)
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR goal = ?)
            "#
        );
        let category = filter.category.map(|c| c.as_str());
        let goal = filter.goal.map(|g| g.as_str());

        let rows = sqlx::query(&sql)
            .bind(model)
            .bind(model)
            .bind(filter.active_only)
            .bind(category)
            .bind(category)
            .bind(goal)
            .bind(goal)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    raw.parse::<T>().map_err(anyhow::Error::msg)
}

fn row_to_record(row: &SqliteRow) -> Result<StoredBestPractice> {
    let id: String = row.get("id");
    let platform: Option<String> = row.get("platform");
    let platform = platform
        .map(|p| p.parse::<Platform>().map_err(anyhow::Error::msg))
        .transpose()?;
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata for best practice {}", id))?;
    let blob: Vec<u8> = row.get("embedding");
    let is_active: i64 = row.get("is_active");

    Ok(StoredBestPractice {
        title: row.get("title"),
        platform,
        category: parse_column(row, "category")?,
        goal: parse_column(row, "goal")?,
        description: row.get("description"),
        example_text: row.get("example_text"),
        source_type: parse_column(row, "source_type")?,
        source_url: row.get("source_url"),
        embedding: blob_to_vec(&blob),
        embedding_model: row.get("embedding_model"),
        metadata,
        quality_score: row.get("quality_score"),
        priority_score: row.get("priority_score"),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        id,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn insert_best_practice(&self, record: &StoredBestPractice) -> Result<()> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO best_practices (id, title, platform, category, goal, description,
                                        example_text, source_type, source_url, embedding,
                                        embedding_model, metadata_json, quality_score,
                                        priority_score, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(record.platform.map(|p| p.as_str()))
        .bind(record.category.as_str())
        .bind(record.goal.as_str())
        .bind(&record.description)
        .bind(&record.example_text)
        .bind(record.source_type.as_str())
        .bind(&record.source_url)
        .bind(vec_to_blob(&record.embedding))
        .bind(&record.embedding_model)
        .bind(&metadata_json)
        .bind(record.quality_score)
        .bind(record.priority_score)
        .bind(record.is_active)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_best_practice(&self, record: &StoredBestPractice) -> Result<bool> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE best_practices SET
                title = ?, platform = ?, category = ?, goal = ?, description = ?,
                example_text = ?, source_type = ?, source_url = ?, embedding = ?,
                embedding_model = ?, metadata_json = ?, quality_score = ?,
                priority_score = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.title)
        .bind(record.platform.map(|p| p.as_str()))
        .bind(record.category.as_str())
        .bind(record.goal.as_str())
        .bind(&record.description)
        .bind(&record.example_text)
        .bind(record.source_type.as_str())
        .bind(&record.source_url)
        .bind(vec_to_blob(&record.embedding))
        .bind(&record.embedding_model)
        .bind(&metadata_json)
        .bind(record.quality_score)
        .bind(record.priority_score)
        .bind(record.is_active)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_best_practice(&self, id: &str) -> Result<Option<StoredBestPractice>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM best_practices WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SimilarityMatch>> {
        let matches = self
            .fetch_filtered(filter, Some(model))
            .await?
            .into_iter()
            .map(|record| SimilarityMatch {
                similarity: cosine_similarity(query, &record.embedding) as f64,
                record,
            })
            .collect();
        Ok(rank_matches(matches, limit))
    }

    async fn list_best_practices(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<StoredBestPractice>> {
        let records = self.fetch_filtered(filter, None).await?;
        Ok(rank_by_priority(records, limit))
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM best_practices")
            .fetch_one(&self.pool)
            .await?;
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM best_practices WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;
        let cached_embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS n
            FROM best_practices
            WHERE is_active = 1
            GROUP BY category
            ORDER BY n DESC, category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let by_category = rows
            .iter()
            .map(|row| (row.get::<String, _>("category"), row.get::<i64, _>("n")))
            .collect();

        Ok(KnowledgeStats {
            total,
            active,
            cached_embeddings,
            by_category,
        })
    }

    async fn cached_embedding(&self, text: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT embedding FROM embedding_cache WHERE input_text = ? AND model = ?",
        )
        .bind(text)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(blob.map(|b| blob_to_vec(&b)))
    }

    async fn cache_embedding(&self, text: &str, model: &str, vector: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        // Identical text yields an identical vector, so last writer wins.
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (input_text, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(input_text, model) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(text)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
