//! The orchestrator: runs one request through extraction, analysis,
//! quality and (conditionally) storage.
//!
//! ```text
//! extraction(10) → analysis(35) → quality(60) → storage(85) → completed(100)
//!        └──────────────┴──────────────┴─────────────┴──→ failed
//! ```
//!
//! Every stage runs inside [`Pipeline::intercept`], which opens a `stage`
//! tracing span, enforces the per-stage timeout and logs the duration, so
//! agents contain no logging or timing code of their own. A quality
//! rejection ends the workflow normally without touching the store; any
//! stage error ends it as `failed`. The orchestrator never retries a stage.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, info_span, warn, Instrument};

use crate::agents::storage::StoredItem;
use crate::agents::{AnalysisAgent, ExtractionAgent, QualityAgent, StorageAgent};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::embedding_cache::EmbeddingCache;
use crate::error::PipelineError;
use crate::fetch::{HttpFetcher, UrlFetcher};
use crate::llm::{LlmProvider, MediaTranscriber};
use crate::models::{
    AgentContext, AnalysisResult, Outcome, ProcessOptions, ProcessRequest, ProcessResponse,
    QualityAssessment, ResponseMetadata, Stage,
};
use crate::parse::{BuiltinParser, DocumentParser};
use crate::progress::{NoProgress, PipelineProgressEvent, PipelineProgressReporter};
use crate::store::{KnowledgeStore, SqliteStore};

/// External capabilities injected into the pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn KnowledgeStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub parser: Arc<dyn DocumentParser>,
    pub fetcher: Arc<dyn UrlFetcher>,
    pub transcriber: Arc<dyn MediaTranscriber>,
}

impl PipelineDeps {
    /// Production dependencies: SQLite store (migrated), configured
    /// providers, built-in parser and HTTP fetcher.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply(&pool).await?;

        let transcriber = crate::llm::create_transcriber(&config.llm)?;
        Ok(Self {
            store: Arc::new(SqliteStore::new(pool)),
            llm: crate::llm::create_llm(&config.llm)?,
            embedder: crate::embedding::create_provider(&config.embedding)?,
            parser: Arc::new(BuiltinParser::new(transcriber.clone())),
            fetcher: Arc::new(HttpFetcher::new(
                config.fetch.timeout_secs,
                config.fetch.max_retries,
            )?),
            transcriber,
        })
    }
}

/// How a workflow that did not fail ended.
enum Finished {
    Stored {
        analysis: AnalysisResult,
        quality: QualityAssessment,
        stored: StoredItem,
    },
    Rejected {
        analysis: AnalysisResult,
        quality: QualityAssessment,
    },
}

pub struct Pipeline {
    extraction: ExtractionAgent,
    analysis: AnalysisAgent,
    quality: QualityAgent,
    storage: StorageAgent,
    cache: Arc<EmbeddingCache>,
    store: Arc<dyn KnowledgeStore>,
    stage_timeout: Duration,
    batch_delay: Duration,
    progress: Arc<dyn PipelineProgressReporter>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, config: &Config) -> Self {
        // One cache, hence one embedding model, for quality and storage.
        let cache = Arc::new(EmbeddingCache::new(deps.embedder, deps.store.clone()));
        let analysis = AnalysisAgent::new(deps.llm, &config.pipeline);
        let analysis_model = analysis.model_name().to_string();

        Self {
            extraction: ExtractionAgent::new(deps.parser, deps.fetcher, deps.transcriber),
            analysis,
            quality: QualityAgent::new(
                cache.clone(),
                deps.store.clone(),
                &config.quality,
                &config.storage,
            ),
            storage: StorageAgent::new(
                cache.clone(),
                deps.store.clone(),
                &config.storage,
                analysis_model,
            ),
            cache,
            store: deps.store,
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            batch_delay: Duration::from_millis(config.pipeline.batch_delay_ms),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, reporter: Arc<dyn PipelineProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    pub fn embedding_cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Process one request to a terminal state. Never returns an error:
    /// failures are reported in the response.
    pub async fn process(&self, request: ProcessRequest) -> ProcessResponse {
        self.execute(request, None).await
    }

    /// Process requests one at a time with a pause between them.
    ///
    /// Always returns one response per request, in order; a failed item
    /// carries a batch-item error and never affects its siblings.
    pub async fn process_batch(&self, requests: Vec<ProcessRequest>) -> Vec<ProcessResponse> {
        let total = requests.len();
        let mut responses = Vec::with_capacity(total);

        for (index, request) in requests.into_iter().enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            self.progress.report(PipelineProgressEvent::BatchItem {
                n: index as u64 + 1,
                total: total as u64,
            });
            responses.push(self.execute(request, Some(index)).await);
        }

        let stored = responses.iter().filter(|r| r.outcome == Outcome::Stored).count();
        let failed = responses.iter().filter(|r| r.outcome == Outcome::Failed).count();
        info!(total, stored, failed, "batch finished");
        responses
    }

    async fn execute(&self, request: ProcessRequest, batch_index: Option<usize>) -> ProcessResponse {
        let mut ctx = AgentContext::new(request);
        let span = info_span!(
            "request",
            request_id = %ctx.request_id(),
            source_type = %ctx.source_type(),
        );

        let result = self.run(&mut ctx).instrument(span).await;

        let outcome = match &result {
            Ok(Finished::Stored { .. }) => Outcome::Stored,
            Ok(Finished::Rejected { .. }) => Outcome::Rejected,
            Err(_) => Outcome::Failed,
        };
        self.progress.report(PipelineProgressEvent::Finished {
            request_id: ctx.request_id().to_string(),
            outcome,
            percent: ctx.progress(),
        });

        match result {
            Ok(finished) => respond(ctx, finished),
            Err(e) => {
                let e = match batch_index {
                    Some(index) => e.in_batch(index),
                    None => e,
                };
                warn!(request_id = %ctx.request_id(), kind = e.kind(), error = %e, "request failed");
                ctx.advance(Stage::Failed);
                ctx.error(e.to_string());
                respond_failure(ctx)
            }
        }
    }

    async fn run(&self, ctx: &mut AgentContext) -> Result<Finished, PipelineError> {
        validate_options(ctx.options())?;
        let request_id = ctx.request_id().to_string();

        self.enter(ctx, Stage::Extraction);
        let extraction = self
            .intercept(Stage::Extraction, &request_id, self.extraction.extract(ctx))
            .await?;

        self.enter(ctx, Stage::Analysis);
        let analysis = self
            .intercept(
                Stage::Analysis,
                &request_id,
                self.analysis.analyze(&extraction, ctx),
            )
            .await?;

        self.enter(ctx, Stage::Quality);
        let quality = self
            .intercept(
                Stage::Quality,
                &request_id,
                self.quality.assess(&extraction, &analysis, ctx),
            )
            .await?;

        if !quality.is_approved {
            if !ctx.options().skip_quality_check {
                info!(
                    overall_score = quality.overall_score,
                    "rejected by quality gate; storage skipped"
                );
                ctx.advance(Stage::Completed);
                return Ok(Finished::Rejected { analysis, quality });
            }
            ctx.warn("quality check bypassed: stored as inactive despite rejection");
        }

        self.enter(ctx, Stage::Storage);
        let stored = self
            .intercept(
                Stage::Storage,
                &request_id,
                self.storage.store(&extraction, &analysis, &quality, ctx),
            )
            .await?;

        ctx.advance(Stage::Completed);
        Ok(Finished::Stored {
            analysis,
            quality,
            stored,
        })
    }

    fn enter(&self, ctx: &mut AgentContext, stage: Stage) {
        if ctx.advance(stage) {
            self.progress.report(PipelineProgressEvent::StageEntered {
                request_id: ctx.request_id().to_string(),
                stage,
                percent: ctx.progress(),
            });
        }
    }

    /// Run one stage inside its span, under the stage timeout.
    async fn intercept<T, F>(
        &self,
        stage: Stage,
        request_id: &str,
        stage_future: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        let span = info_span!("stage", %request_id, stage = %stage);
        let timeout = self.stage_timeout;

        async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, stage_future).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout {
                    stage,
                    seconds: timeout.as_secs(),
                }),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => info!(elapsed_ms, "stage completed"),
                Err(e) => warn!(elapsed_ms, error = %e, "stage failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

fn validate_options(options: &ProcessOptions) -> Result<(), PipelineError> {
    if let Some(p) = options.priority_override {
        if !p.is_finite() || !(1.0..=10.0).contains(&p) {
            return Err(PipelineError::InvalidRequest(format!(
                "priority_override must be within 1-10, got {}",
                p
            )));
        }
    }
    Ok(())
}

fn metadata(
    analysis: &AnalysisResult,
    quality: &QualityAssessment,
    priority_score: Option<f64>,
    options: &ProcessOptions,
) -> ResponseMetadata {
    ResponseMetadata {
        title: analysis.title.clone(),
        platform: analysis.platform,
        category: analysis.category,
        goal: analysis.goal,
        description: analysis.description.clone(),
        quality_score: Some(quality.overall_score),
        priority_score,
        extracted_insights: analysis.key_insights.clone(),
        tags: analysis.tags.clone(),
        example_quotes: analysis.example_quotes.clone(),
        source_author: options.source_name.clone(),
    }
}

fn respond(ctx: AgentContext, finished: Finished) -> ProcessResponse {
    let request_id = ctx.request_id().to_string();
    let (stage, progress) = (ctx.stage(), ctx.progress());
    let options = ctx.options().clone();
    let (warnings, errors) = ctx.into_logs();

    match finished {
        Finished::Stored {
            analysis,
            quality,
            stored,
        } => ProcessResponse {
            request_id,
            success: true,
            outcome: Outcome::Stored,
            best_practice_id: Some(stored.result.best_practice_id.clone()),
            metadata: Some(metadata(
                &analysis,
                &quality,
                Some(stored.record.priority_score),
                &options,
            )),
            issues: quality.issues,
            storage: Some(stored.result),
            stage,
            progress,
            warnings,
            errors,
        },
        Finished::Rejected { analysis, quality } => ProcessResponse {
            request_id,
            success: false,
            outcome: Outcome::Rejected,
            best_practice_id: None,
            metadata: Some(metadata(&analysis, &quality, None, &options)),
            issues: quality.issues,
            storage: None,
            stage,
            progress,
            warnings,
            errors,
        },
    }
}

fn respond_failure(ctx: AgentContext) -> ProcessResponse {
    let request_id = ctx.request_id().to_string();
    let (stage, progress) = (ctx.stage(), ctx.progress());
    let (warnings, errors) = ctx.into_logs();
    ProcessResponse {
        request_id,
        success: false,
        outcome: Outcome::Failed,
        best_practice_id: None,
        metadata: None,
        issues: Vec::new(),
        storage: None,
        stage,
        progress,
        warnings,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_override_must_be_in_range() {
        let mut options = ProcessOptions::default();
        assert!(validate_options(&options).is_ok());
        options.priority_override = Some(10.0);
        assert!(validate_options(&options).is_ok());
        options.priority_override = Some(10.5);
        assert!(matches!(
            validate_options(&options),
            Err(PipelineError::InvalidRequest(_))
        ));
        options.priority_override = Some(f64::NAN);
        assert!(validate_options(&options).is_err());
    }
}
