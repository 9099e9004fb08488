//! In-memory [`KnowledgeStore`] for tests and embedding hosts.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine similarity over every row of the requested model.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{SearchFilter, SimilarityMatch, StoredBestPractice};

use super::{rank_by_priority, rank_matches, KnowledgeStats, KnowledgeStore};

/// In-memory store; contents are lost when it is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, StoredBestPractice>>,
    embeddings: RwLock<HashMap<(String, String), Vec<f32>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredBestPractice>>> {
        self.records.read().map_err(|_| anyhow!("record lock poisoned"))
    }

    fn records_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredBestPractice>>> {
        self.records.write().map_err(|_| anyhow!("record lock poisoned"))
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn insert_best_practice(&self, record: &StoredBestPractice) -> Result<()> {
        let mut records = self.records_mut()?;
        if records.contains_key(&record.id) {
            bail!("best practice {} already exists", record.id);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_best_practice(&self, record: &StoredBestPractice) -> Result<bool> {
        let mut records = self.records_mut()?;
        match records.get_mut(&record.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = record.clone();
                existing.created_at = created_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_best_practice(&self, id: &str) -> Result<Option<StoredBestPractice>> {
        Ok(self.records()?.get(id).cloned())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SimilarityMatch>> {
        let matches = self
            .records()?
            .values()
            .filter(|r| r.embedding_model == model && filter.matches(r))
            .map(|r| SimilarityMatch {
                similarity: cosine_similarity(query, &r.embedding) as f64,
                record: r.clone(),
            })
            .collect();
        Ok(rank_matches(matches, limit))
    }

    async fn list_best_practices(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<StoredBestPractice>> {
        let records = self
            .records()?
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(rank_by_priority(records, limit))
    }

    async fn stats(&self) -> Result<KnowledgeStats> {
        let records = self.records()?;
        let mut by_category: HashMap<String, i64> = HashMap::new();
        let mut active = 0;
        for r in records.values().filter(|r| r.is_active) {
            active += 1;
            *by_category.entry(r.category.to_string()).or_default() += 1;
        }
        let mut by_category: Vec<_> = by_category.into_iter().collect();
        by_category.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let cached_embeddings = self
            .embeddings
            .read()
            .map_err(|_| anyhow!("embedding lock poisoned"))?
            .len() as i64;

        Ok(KnowledgeStats {
            total: records.len() as i64,
            active,
            cached_embeddings,
            by_category,
        })
    }

    async fn cached_embedding(&self, text: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let cache = self
            .embeddings
            .read()
            .map_err(|_| anyhow!("embedding lock poisoned"))?;
        Ok(cache.get(&(text.to_string(), model.to_string())).cloned())
    }

    async fn cache_embedding(&self, text: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.embeddings
            .write()
            .map_err(|_| anyhow!("embedding lock poisoned"))?
            .insert((text.to_string(), model.to_string()), vector.to_vec());
        Ok(())
    }
}
