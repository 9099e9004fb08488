//! Lookup-or-generate cache in front of the embedding provider.
//!
//! Two tiers: a process-wide map and the store's persistent
//! `embedding_cache` table, both keyed by the exact input text (and, in the
//! table, the model name). Concurrent callers asking for the same text share
//! one in-flight generation, so identical text is paid for once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::store::KnowledgeStore;

/// An embedding and whether it was served without calling the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub vector: Vec<f32>,
    pub from_cache: bool,
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    memory: RwLock<HashMap<String, Vec<f32>>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Vec<f32>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            provider,
            store,
            memory: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The single embedding model shared by duplicate detection and storage.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Return the vector for `text`, generating it only if neither tier has it.
    pub async fn get_or_embed(&self, text: &str) -> Result<CachedEmbedding> {
        if let Some(vector) = self.memory_get(text)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(CachedEmbedding {
                vector,
                from_cache: true,
            });
        }

        let cell = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
            inflight
                .entry(text.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let generated = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| {
                let generated = &generated;
                async move {
                    let (vector, fresh) = self.load_or_generate(text).await?;
                    generated.store(fresh, Ordering::Relaxed);
                    Ok::<_, anyhow::Error>(vector)
                }
            })
            .await
            .cloned();

        // Publish to the memory tier before retiring the cell, so a caller
        // arriving in between finds the vector instead of a fresh cell.
        let published = match &result {
            Ok(vector) => self.memory_put(text, vector),
            Err(_) => Ok(()),
        };
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(text);
        }

        let vector = result?;
        published?;

        let from_cache = !generated.load(Ordering::Relaxed);
        if from_cache {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(CachedEmbedding { vector, from_cache })
    }

    fn memory_put(&self, text: &str, vector: &[f32]) -> Result<()> {
        self.memory
            .write()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?
            .insert(text.to_string(), vector.to_vec());
        Ok(())
    }

    fn memory_get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let memory = self
            .memory
            .read()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
        Ok(memory.get(text).cloned())
    }

    /// Persistent lookup, then the provider. Returns `true` when generated.
    async fn load_or_generate(&self, text: &str) -> Result<(Vec<f32>, bool)> {
        let model = self.provider.model_name();

        match self.store.cached_embedding(text, model).await {
            Ok(Some(vector)) => {
                debug!(model, "embedding served from persistent cache");
                return Ok((vector, false));
            }
            Ok(None) => {}
            Err(e) => warn!(model, error = %e, "embedding cache lookup failed"),
        }

        let vector = embed_one(self.provider.as_ref(), text).await?;

        if let Err(e) = self.store.cache_embedding(text, model, &vector).await {
            warn!(model, error = %e, "failed to persist embedding to cache");
        }
        Ok((vector, true))
    }
}
