//! Storage abstraction for the knowledge base.
//!
//! The [`KnowledgeStore`] trait defines every persistence operation the
//! pipeline and the retrieval surface need, so the agents can run against
//! SQLite in production and [`InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_best_practice`](KnowledgeStore::insert_best_practice) | Create a new row |
//! | [`update_best_practice`](KnowledgeStore::update_best_practice) | Overwrite a duplicate row in place |
//! | [`get_best_practice`](KnowledgeStore::get_best_practice) | Fetch one row by id |
//! | [`similarity_search`](KnowledgeStore::similarity_search) | Cosine nearest neighbours within one embedding model |
//! | [`list_best_practices`](KnowledgeStore::list_best_practices) | Filtered rows ordered by priority |
//! | [`stats`](KnowledgeStore::stats) | Row and cache counts |
//! | [`cached_embedding`](KnowledgeStore::cached_embedding) | Persistent embedding-cache lookup |
//! | [`cache_embedding`](KnowledgeStore::cache_embedding) | Persistent embedding-cache write |

pub mod memory;
pub mod sqlite;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{SearchFilter, SimilarityMatch, StoredBestPractice};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Aggregate counts reported by `adkb stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeStats {
    pub total: i64,
    pub active: i64,
    pub cached_embeddings: i64,
    /// `(category, active row count)`, largest first.
    pub by_category: Vec<(String, i64)>,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert_best_practice(&self, record: &StoredBestPractice) -> Result<()>;

    /// Overwrite every mutable column of an existing row, keeping its
    /// `created_at`. Returns `false` if no row has `record.id`.
    async fn update_best_practice(&self, record: &StoredBestPractice) -> Result<bool>;

    async fn get_best_practice(&self, id: &str) -> Result<Option<StoredBestPractice>>;

    /// Rank rows embedded with `model` by cosine similarity to `query`.
    ///
    /// Rows from other embedding models are never compared.
    async fn similarity_search(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SimilarityMatch>>;

    /// Filtered rows ordered by priority score (descending), then id.
    async fn list_best_practices(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<StoredBestPractice>>;

    async fn stats(&self) -> Result<KnowledgeStats>;

    async fn cached_embedding(&self, text: &str, model: &str) -> Result<Option<Vec<f32>>>;

    async fn cache_embedding(&self, text: &str, model: &str, vector: &[f32]) -> Result<()>;
}

/// Order matches by similarity, breaking ties by priority then id, and
/// keep the first `limit`.
pub(crate) fn rank_matches(mut matches: Vec<SimilarityMatch>, limit: usize) -> Vec<SimilarityMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.record
                    .priority_score
                    .partial_cmp(&a.record.priority_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    matches.truncate(limit);
    matches
}

pub(crate) fn rank_by_priority(mut records: Vec<StoredBestPractice>, limit: usize) -> Vec<StoredBestPractice> {
    records.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    records.truncate(limit);
    records
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::*;

    /// A minimal valid record for store tests.
    pub fn record(id: &str, embedding: Vec<f32>, priority: f64) -> StoredBestPractice {
        StoredBestPractice {
            id: id.to_string(),
            title: format!("Practice {id}"),
            platform: Some(Platform::Meta),
            category: Category::Shipping,
            goal: Goal::Conversions,
            description: "Offer free shipping above a threshold".to_string(),
            example_text: None,
            source_type: DerivedSource::Public,
            source_url: None,
            embedding,
            embedding_model: "test-model".to_string(),
            metadata: BestPracticeMetadata {
                tags: vec!["shipping".to_string()],
                key_insights: vec!["Free shipping lifts conversion".to_string()],
                actionable_takeaways: vec![],
                example_quotes: vec![],
                ingested_as: SourceType::Text,
                request_id: "req-1".to_string(),
                extraction: ExtractionProvenance {
                    method: ExtractionMethod::PassThrough,
                    confidence: 1.0,
                    word_count: 6,
                    file_format: None,
                },
                analysis: AnalysisProvenance {
                    model: "fake".to_string(),
                    difficulty_level: DifficultyLevel::Beginner,
                },
                quality: QualityProvenance {
                    overall_score: 7.0,
                    scores: QualityScores {
                        specificity: 7.0,
                        actionability: 7.0,
                        consistency: 7.0,
                        completeness: 7.0,
                        substance: 7.0,
                    },
                    issues: vec![],
                    is_approved: true,
                    duplicate_similarity: None,
                },
                transcription: None,
                original_filename: None,
                source_author: None,
                duplicate_check_hash: "0123456789abcdef".to_string(),
            },
            quality_score: 7.0,
            priority_score: priority,
            is_active: true,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn ties_break_on_priority_then_id() {
        let matches = vec![
            SimilarityMatch { record: record("b", vec![], 5.0), similarity: 0.8 },
            SimilarityMatch { record: record("a", vec![], 5.0), similarity: 0.8 },
            SimilarityMatch { record: record("c", vec![], 9.0), similarity: 0.8 },
            SimilarityMatch { record: record("d", vec![], 1.0), similarity: 0.95 },
        ];
        let ranked = rank_matches(matches, 3);
        let ids: Vec<_> = ranked.iter().map(|m| m.record.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a"]);
    }
}
