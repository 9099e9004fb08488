//! Retrieval over the knowledge base.
//!
//! This is the query surface the ad generator consumes: nearest
//! neighbours of a query vector or query text, restricted to active rows,
//! with optional platform/category/goal filters. Results are ordered by
//! cosine similarity, ties broken by priority score and then id. Without a
//! query, [`Retriever::list_top_priority`] returns the best-ranked rows.
//!
//! Query text goes through the same [`EmbeddingCache`] the pipeline uses,
//! so repeated queries cost one embedding call.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding_cache::EmbeddingCache;
use crate::models::{Category, Goal, Platform, SearchFilter, StoredBestPractice};
use crate::store::KnowledgeStore;

/// Optional filters for a retrieval query. Inactive rows are always excluded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalFilter {
    /// `Platform::Multi` selects cross-platform practices.
    pub platform: Option<Platform>,
    pub category: Option<Category>,
    pub goal: Option<Goal>,
}

impl RetrievalFilter {
    fn to_search_filter(self) -> SearchFilter {
        SearchFilter {
            platform: self.platform,
            category: self.category,
            goal: self.goal,
            active_only: true,
        }
    }
}

/// A single retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Cosine similarity to the query, absent for priority listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(flatten)]
    pub record: StoredBestPractice,
}

pub struct Retriever {
    store: Arc<dyn KnowledgeStore>,
    cache: Arc<EmbeddingCache>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        cache: Arc<EmbeddingCache>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config: config.clone(),
        }
    }

    /// `0` means the configured default; anything above the maximum is capped.
    fn effective_limit(&self, limit: usize) -> usize {
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };
        limit.min(self.config.max_limit)
    }

    /// Top-K active rows nearest to `query`, compared only against rows
    /// embedded with the cache's model.
    pub async fn search_by_vector(
        &self,
        query: &[f32],
        filter: RetrievalFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            bail!("query vector is empty");
        }
        let limit = self.effective_limit(limit);
        let matches = self
            .store
            .similarity_search(
                query,
                self.cache.model_name(),
                limit,
                &filter.to_search_filter(),
            )
            .await?;

        debug!(hits = matches.len(), limit, "vector search");
        Ok(matches
            .into_iter()
            .map(|m| SearchHit {
                similarity: Some(m.similarity),
                record: m.record,
            })
            .collect())
    }

    /// Embed `query` (through the cache) and search by the resulting vector.
    pub async fn search_by_text(
        &self,
        query: &str,
        filter: RetrievalFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let embedded = self.cache.get_or_embed(query).await?;
        self.search_by_vector(&embedded.vector, filter, limit).await
    }

    /// Active rows matching `filter`, highest priority first.
    pub async fn list_top_priority(
        &self,
        filter: RetrievalFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let limit = self.effective_limit(limit);
        let records = self
            .store
            .list_best_practices(&filter.to_search_filter(), limit)
            .await?;
        Ok(records
            .into_iter()
            .map(|record| SearchHit {
                similarity: None,
                record,
            })
            .collect())
    }
}
