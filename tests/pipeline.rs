//! End-to-end pipeline tests with deterministic providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use adkb::config::Config;
use adkb::embedding::EmbeddingProvider;
use adkb::fetch::{FetchedPage, UrlFetcher};
use adkb::llm::{DisabledLlm, LlmProvider};
use adkb::models::{
    DerivedSource, Outcome, Platform, ProcessOptions, ProcessRequest, SearchFilter, Severity,
    SimilarityMatch, Stage, StoredBestPractice, WriteKind,
};
use adkb::parse::BuiltinParser;
use adkb::pipeline::{Pipeline, PipelineDeps};
use adkb::progress::{PipelineProgressEvent, PipelineProgressReporter};
use adkb::search::{RetrievalFilter, Retriever};
use adkb::store::{InMemoryStore, KnowledgeStats, KnowledgeStore, SqliteStore};

const SCENARIO: &str =
    "Free shipping drives a 23% lift in conversion for boutique apparel stores";

/// Builds an analysis straight from the material, so scores are predictable.
struct EchoAnalyst {
    delay: Option<Duration>,
}

#[async_trait]
impl LlmProvider for EchoAnalyst {
    fn model_name(&self) -> &str {
        "echo-analyst"
    }

    async fn complete_json(&self, _system: &str, user: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let material = user
            .split_once("Material:\n")
            .map(|(_, m)| m)
            .unwrap_or(user)
            .trim();
        let lower = material.to_lowercase();
        let words: Vec<&str> = material.split_whitespace().collect();
        let title = words.iter().take(6).copied().collect::<Vec<_>>().join(" ");

        let mut tags: Vec<String> = Vec::new();
        for w in &words {
            let w = w.to_lowercase();
            if w.len() >= 4 && !tags.contains(&w) && tags.len() < 3 {
                tags.push(w);
            }
        }
        let platform = if lower.contains("tiktok") { "tiktok" } else { "multi" };
        let category = if lower.contains("shipping") { "shipping" } else { "creative" };

        Ok(serde_json::json!({
            "title": title,
            "description": format!("{}.", material),
            "platform": platform,
            "category": category,
            "goal": "conversions",
            "key_insights": [material],
            "tags": tags,
            "example_quotes": [material],
            "actionable_takeaways": [format!("Apply this: {}", title), "Track results weekly"],
            "difficulty_level": "beginner"
        })
        .to_string())
    }
}

/// Hashed bag-of-words vectors: identical text gives identical vectors,
/// unrelated vocabularies are nearly orthogonal.
struct BagOfWords {
    calls: Mutex<usize>,
}

const DIMS: usize = 256;

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for word in t.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Same model as [`BagOfWords`] but the service is unreachable, so only
/// previously cached vectors are available.
struct DownEmbedder {
    stall: Option<Duration>,
}

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        bail!("embedding service unavailable")
    }
}

/// Reads and the embedding cache work; row writes fail.
struct ReadOnlyStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl KnowledgeStore for ReadOnlyStore {
    async fn insert_best_practice(&self, _record: &StoredBestPractice) -> Result<()> {
        bail!("attempt to write a readonly database")
    }
    async fn update_best_practice(&self, _record: &StoredBestPractice) -> Result<bool> {
        bail!("attempt to write a readonly database")
    }
    async fn get_best_practice(&self, id: &str) -> Result<Option<StoredBestPractice>> {
        self.inner.get_best_practice(id).await
    }
    async fn similarity_search(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SimilarityMatch>> {
        self.inner.similarity_search(query, model, limit, filter).await
    }
    async fn list_best_practices(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<StoredBestPractice>> {
        self.inner.list_best_practices(filter, limit).await
    }
    async fn stats(&self) -> Result<KnowledgeStats> {
        self.inner.stats().await
    }
    async fn cached_embedding(&self, text: &str, model: &str) -> Result<Option<Vec<f32>>> {
        self.inner.cached_embedding(text, model).await
    }
    async fn cache_embedding(&self, text: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.inner.cache_embedding(text, model, vector).await
    }
}

struct StaticFetcher;

#[async_trait]
impl UrlFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Ok(FetchedPage {
            url: url.to_string(),
            title: Some("Shipping guide".to_string()),
            text: "Free shipping thresholds just above average order value raise basket size \
                   for most online stores"
                .to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<PipelineProgressEvent>>,
}

impl PipelineProgressReporter for RecordingProgress {
    fn report(&self, event: PipelineProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn test_config() -> Config {
    let mut config = Config::with_db_path("unused.sqlite");
    config.pipeline.batch_delay_ms = 0;
    config.pipeline.analysis_retry_backoff_ms = 1;
    config
}

fn deps(store: Arc<dyn KnowledgeStore>, llm: EchoAnalyst) -> PipelineDeps {
    let embedder = BagOfWords {
        calls: Mutex::new(0),
    };
    deps_with(store, llm, Arc::new(embedder))
}

fn deps_with(
    store: Arc<dyn KnowledgeStore>,
    llm: EchoAnalyst,
    embedder: Arc<dyn EmbeddingProvider>,
) -> PipelineDeps {
    PipelineDeps {
        store,
        llm: Arc::new(llm),
        embedder,
        parser: Arc::new(BuiltinParser::new(Arc::new(DisabledLlm))),
        fetcher: Arc::new(StaticFetcher),
        transcriber: Arc::new(DisabledLlm),
    }
}

fn memory_pipeline(config: &Config) -> (Pipeline, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), config);
    (pipeline, store)
}

async fn sqlite_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let config = Config::with_db_path(dir.path().join("kb.sqlite"));
    let pool = adkb::db::connect(&config).await.unwrap();
    adkb::migrate::apply(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

#[tokio::test]
async fn scenario_text_is_analyzed_scored_and_stored() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);

    let response = pipeline.process(ProcessRequest::text(SCENARIO)).await;

    assert!(response.success, "errors: {:?}", response.errors);
    assert_eq!(response.outcome, Outcome::Stored);
    assert_eq!(response.stage, Stage::Completed);
    assert_eq!(response.progress, 100);

    let metadata = response.metadata.as_ref().unwrap();
    assert_eq!(metadata.platform, Platform::Multi);
    assert_eq!(metadata.quality_score, Some(7.98));
    assert_eq!(metadata.priority_score, Some(6.19));

    let storage = response.storage.as_ref().unwrap();
    assert_eq!(storage.write, WriteKind::Inserted);
    assert!(storage.vector_indexed);

    let id = response.best_practice_id.as_deref().unwrap();
    let record = store.get_best_practice(id).await.unwrap().unwrap();
    assert!(record.is_active);
    assert_eq!(record.platform, None);
    assert_eq!(record.source_type, DerivedSource::Public);
    assert_eq!(record.embedding_model, "bag-of-words");
    assert_eq!(record.metadata.analysis.model, "echo-analyst");
    assert_eq!(record.embedding.len(), DIMS);
    assert_eq!(record.metadata.extraction.word_count, 12);
    assert_eq!(record.metadata.duplicate_check_hash.len(), 16);
}

#[tokio::test]
async fn progress_reports_every_checkpoint_in_order() {
    let config = test_config();
    let progress = Arc::new(RecordingProgress::default());
    let (pipeline, _store) = memory_pipeline(&config);
    let pipeline = pipeline.with_progress(progress.clone());

    pipeline.process(ProcessRequest::text(SCENARIO)).await;

    let events = progress.events.lock().unwrap();
    let percents: Vec<u8> = events
        .iter()
        .map(|e| match e {
            PipelineProgressEvent::StageEntered { percent, .. } => *percent,
            PipelineProgressEvent::Finished { percent, .. } => *percent,
            PipelineProgressEvent::BatchItem { .. } => 0,
        })
        .collect();
    assert_eq!(percents, vec![10, 35, 60, 85, 100]);
    assert!(matches!(
        events.last(),
        Some(PipelineProgressEvent::Finished {
            outcome: Outcome::Stored,
            ..
        })
    ));
}

#[tokio::test]
async fn resubmission_updates_existing_row_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let config = test_config();
    let pipeline = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), &config);

    let first = pipeline.process(ProcessRequest::text(SCENARIO)).await;
    let second = pipeline.process(ProcessRequest::text(SCENARIO)).await;

    assert!(first.success && second.success);
    assert_eq!(second.best_practice_id, first.best_practice_id);
    assert_eq!(second.storage.as_ref().unwrap().write, WriteKind::UpdatedExisting);
    assert!(second
        .issues
        .iter()
        .any(|i| i.severity == Severity::Info && i.message.contains("near-duplicate")));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.active, 1);
}

#[tokio::test]
async fn batch_failure_is_isolated_to_its_item() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);

    let texts = [
        "Short vertical videos with captions outperform landscape clips on every mobile placement tested",
        "Retarget cart abandoners within seventy two hours using dynamic product carousels and urgency",
        "   ",
        "Bidding caps should sit slightly above historical cost per acquisition during learning phases",
        "Landing pages loading under two seconds keep bounce rates noticeably lower across campaigns",
    ];
    let requests = texts.iter().map(|t| ProcessRequest::text(*t)).collect();

    let responses = pipeline.process_batch(requests).await;

    assert_eq!(responses.len(), 5);
    for (index, response) in responses.iter().enumerate() {
        if index == 2 {
            assert!(!response.success);
            assert_eq!(response.outcome, Outcome::Failed);
            assert_eq!(response.stage, Stage::Failed);
            assert!(response.best_practice_id.is_none());
            assert!(response.errors[0].contains("batch item 2"));
            assert!(response.errors[0].contains("extraction failed"));
        } else {
            assert!(response.success, "item {index}: {:?}", response.errors);
            assert_eq!(response.storage.as_ref().unwrap().write, WriteKind::Inserted);
        }
    }
    assert_eq!(store.stats().await.unwrap().total, 4);
}

#[tokio::test]
async fn rejected_content_is_not_stored() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);

    let response = pipeline.process(ProcessRequest::text("Buy now today ok")).await;

    assert!(!response.success);
    assert_eq!(response.outcome, Outcome::Rejected);
    assert_eq!(response.stage, Stage::Completed);
    assert!(response.best_practice_id.is_none());
    assert!(response.storage.is_none());
    assert!(response.metadata.is_some());
    assert!(response
        .issues
        .iter()
        .any(|i| i.severity == Severity::Critical));
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn skip_quality_check_stores_rejected_content_inactive() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);
    let request = ProcessRequest::text("Buy now today ok").with_options(ProcessOptions {
        skip_quality_check: true,
        ..Default::default()
    });

    let response = pipeline.process(request).await;

    assert!(response.success);
    assert_eq!(response.outcome, Outcome::Stored);
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("quality check bypassed")));
    let id = response.best_practice_id.unwrap();
    let record = store.get_best_practice(&id).await.unwrap().unwrap();
    assert!(!record.is_active);
}

#[tokio::test]
async fn priority_override_replaces_computed_score() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);
    let request = ProcessRequest::text(SCENARIO).with_options(ProcessOptions {
        priority_override: Some(9.5),
        source_name: Some("Jane, Growth Consultant".to_string()),
        ..Default::default()
    });

    let response = pipeline.process(request).await;

    assert!(response.success);
    let metadata = response.metadata.unwrap();
    assert_eq!(metadata.priority_score, Some(9.5));
    assert_eq!(metadata.source_author.as_deref(), Some("Jane, Growth Consultant"));
    let record = store
        .get_best_practice(&response.best_practice_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.priority_score, 9.5);
    assert_eq!(record.source_type, DerivedSource::Expert);
}

#[tokio::test]
async fn out_of_range_override_fails_before_extraction() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);
    let request = ProcessRequest::text(SCENARIO).with_options(ProcessOptions {
        priority_override: Some(11.0),
        ..Default::default()
    });

    let response = pipeline.process(request).await;

    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(response.stage, Stage::Failed);
    assert_eq!(response.progress, 0);
    assert!(response.errors[0].contains("invalid request"));
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn slow_stage_times_out() {
    let mut config = test_config();
    config.pipeline.stage_timeout_secs = 1;
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(
        deps(
            store,
            EchoAnalyst {
                delay: Some(Duration::from_secs(5)),
            },
        ),
        &config,
    );

    let response = pipeline.process(ProcessRequest::text(SCENARIO)).await;

    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(response.progress, 35);
    assert!(response.errors[0].contains("analysis stage timed out after 1s"));
}

#[tokio::test]
async fn url_and_file_sources_flow_through_extraction() {
    let config = test_config();
    let (pipeline, store) = memory_pipeline(&config);

    let from_url = pipeline
        .process(ProcessRequest::url("https://example.com/shipping"))
        .await;
    assert!(from_url.success, "errors: {:?}", from_url.errors);
    let record = store
        .get_best_practice(from_url.best_practice_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.source_url.as_deref(), Some("https://example.com/shipping"));

    let from_file = pipeline
        .process(ProcessRequest::file(
            "notes.md",
            b"# Creative notes\n\nUser generated testimonials filmed on phones convert better than studio footage"
                .to_vec(),
        ))
        .await;
    assert!(from_file.success, "errors: {:?}", from_file.errors);
    let record = store
        .get_best_practice(from_file.best_practice_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.source_type, DerivedSource::Internal);
}

#[tokio::test]
async fn retrieval_filters_by_platform_and_skips_inactive() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let config = test_config();
    let pipeline = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), &config);

    let multi = pipeline.process(ProcessRequest::text(SCENARIO)).await;
    let tiktok = pipeline
        .process(ProcessRequest::text(
            "TikTok creators filming native unboxing clips beat polished studio spots for apparel",
        ))
        .await;
    let inactive = pipeline
        .process(
            ProcessRequest::text("Shipping free now ok").with_options(ProcessOptions {
                skip_quality_check: true,
                ..Default::default()
            }),
        )
        .await;
    assert!(multi.success && tiktok.success && inactive.success);

    let store: Arc<dyn KnowledgeStore> = store;
    let retriever = Retriever::new(
        store,
        pipeline.embedding_cache().clone(),
        &config.retrieval,
    );

    let hits = retriever
        .search_by_text("free shipping", RetrievalFilter::default(), 10)
        .await
        .unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.record.id.clone()).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], multi.best_practice_id.clone().unwrap());
    assert!(!ids.contains(&inactive.best_practice_id.clone().unwrap()));

    let only_multi = retriever
        .search_by_text(
            "apparel",
            RetrievalFilter {
                platform: Some(Platform::Multi),
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(only_multi.len(), 1);
    assert_eq!(only_multi[0].record.id, multi.best_practice_id.unwrap());

    let only_tiktok = retriever
        .list_top_priority(
            RetrievalFilter {
                platform: Some(Platform::Tiktok),
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(only_tiktok.len(), 1);
    assert_eq!(only_tiktok[0].record.id, tiktok.best_practice_id.unwrap());
}

#[tokio::test]
async fn forced_rejection_never_replaces_active_duplicate() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let pipeline = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), &config);
    let original = pipeline.process(ProcessRequest::text(SCENARIO)).await;
    assert!(original.success, "errors: {:?}", original.errors);
    let original_id = original.best_practice_id.unwrap();

    let mut strict = test_config();
    strict.quality.approval_threshold = 9.5;
    let strict_pipeline = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), &strict);
    let forced = strict_pipeline
        .process(ProcessRequest::text(SCENARIO).with_options(ProcessOptions {
            skip_quality_check: true,
            ..Default::default()
        }))
        .await;

    assert!(forced.success, "errors: {:?}", forced.errors);
    assert_eq!(forced.storage.as_ref().unwrap().write, WriteKind::Inserted);
    let forced_id = forced.best_practice_id.unwrap();
    assert_ne!(forced_id, original_id);
    assert!(forced
        .warnings
        .iter()
        .any(|w| w.contains("stored separately as inactive")));

    let kept = store.get_best_practice(&original_id).await.unwrap().unwrap();
    assert!(kept.is_active);
    let forced_row = store.get_best_practice(&forced_id).await.unwrap().unwrap();
    assert!(!forced_row.is_active);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
}

#[tokio::test]
async fn stalled_duplicate_search_degrades_within_stage_budget() {
    let mut config = test_config();
    config.pipeline.stage_timeout_secs = 3;
    config.quality.dedup_timeout_secs = 1;
    config.quality.approval_threshold = 9.5;
    let store = Arc::new(InMemoryStore::new());
    let embedder = DownEmbedder {
        stall: Some(Duration::from_secs(5)),
    };
    let pipeline = Pipeline::new(
        deps_with(store.clone(), EchoAnalyst { delay: None }, Arc::new(embedder)),
        &config,
    );

    let response = pipeline.process(ProcessRequest::text(SCENARIO)).await;

    assert_eq!(response.outcome, Outcome::Rejected, "errors: {:?}", response.errors);
    assert_eq!(response.stage, Stage::Completed);
    assert!(response.errors.is_empty());
    assert!(response.metadata.is_some());
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("timed out after 1s")));
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn storage_fails_when_embedding_is_unavailable() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(
        deps_with(
            store.clone(),
            EchoAnalyst { delay: None },
            Arc::new(DownEmbedder { stall: None }),
        ),
        &config,
    );

    let response = pipeline.process(ProcessRequest::text(SCENARIO)).await;

    assert!(!response.success);
    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(response.progress, 85);
    assert!(response.best_practice_id.is_none());
    let error = &response.errors[0];
    assert!(error.contains("persistence failed during storage (record: new)"), "{error}");
    assert!(error.contains("embedding generation failed"), "{error}");
    assert!(error.contains("embedding service unavailable"), "{error}");
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn cached_embedding_survives_provider_outage() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let warm = Pipeline::new(deps(store.clone(), EchoAnalyst { delay: None }), &config);
    let first = warm.process(ProcessRequest::text(SCENARIO)).await;
    assert!(first.success, "errors: {:?}", first.errors);

    // Fresh pipeline: empty memory tier, only the persisted vectors remain.
    let offline = Pipeline::new(
        deps_with(
            store.clone(),
            EchoAnalyst { delay: None },
            Arc::new(DownEmbedder { stall: None }),
        ),
        &config,
    );
    let second = offline.process(ProcessRequest::text(SCENARIO)).await;

    assert!(second.success, "errors: {:?}", second.errors);
    let storage = second.storage.as_ref().unwrap();
    assert!(storage.embedding_cached);
    assert_eq!(storage.write, WriteKind::UpdatedExisting);
    assert_eq!(second.best_practice_id, first.best_practice_id);
    assert_eq!(store.stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn failed_store_write_is_fatal_and_names_the_record() {
    let inner = Arc::new(InMemoryStore::new());
    let config = test_config();
    let seeded = Pipeline::new(deps(inner.clone(), EchoAnalyst { delay: None }), &config)
        .process(ProcessRequest::text(SCENARIO))
        .await;
    let existing_id = seeded.best_practice_id.unwrap();

    let readonly = Arc::new(ReadOnlyStore {
        inner: inner.clone(),
    });
    let pipeline = Pipeline::new(deps(readonly, EchoAnalyst { delay: None }), &config);

    let update = pipeline.process(ProcessRequest::text(SCENARIO)).await;
    assert_eq!(update.outcome, Outcome::Failed);
    assert_eq!(update.stage, Stage::Failed);
    assert!(update.best_practice_id.is_none());
    let error = &update.errors[0];
    assert!(
        error.contains(&format!("persistence failed during storage (record: {existing_id})")),
        "{error}"
    );
    assert!(error.contains("readonly database"), "{error}");

    let insert = pipeline
        .process(ProcessRequest::text(
            "Retarget cart abandoners within seventy two hours using dynamic product carousels and urgency",
        ))
        .await;
    assert_eq!(insert.outcome, Outcome::Failed);
    let error = &insert.errors[0];
    assert!(error.contains("persistence failed during storage (record: "), "{error}");
    assert!(!error.contains("(record: new)"), "{error}");
    assert_eq!(inner.stats().await.unwrap().total, 1);
}
