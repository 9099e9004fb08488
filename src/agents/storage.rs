//! Stage 4: embed, rank and persist.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::embedding_cache::EmbeddingCache;
use crate::error::PipelineError;
use crate::models::{
    AgentContext, AnalysisProvenance, AnalysisResult, BestPracticeMetadata, DerivedSource,
    DifficultyLevel, ExtractionMethod, ExtractionProvenance, ExtractionResult, Platform,
    ProcessOptions, QualityAssessment, QualityProvenance, SourceContent, SourceType, Stage,
    StorageResult, StoredBestPractice, WriteKind,
};
use crate::store::KnowledgeStore;

/// The persisted row together with the stage result.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub result: StorageResult,
    pub record: StoredBestPractice,
}

pub struct StorageAgent {
    cache: Arc<EmbeddingCache>,
    store: Arc<dyn KnowledgeStore>,
    config: StorageConfig,
    analysis_model: String,
}

impl StorageAgent {
    pub fn new(
        cache: Arc<EmbeddingCache>,
        store: Arc<dyn KnowledgeStore>,
        config: &StorageConfig,
        analysis_model: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            store,
            config: config.clone(),
            analysis_model: analysis_model.into(),
        }
    }

    pub async fn store(
        &self,
        extraction: &ExtractionResult,
        analysis: &AnalysisResult,
        quality: &QualityAssessment,
        ctx: &mut AgentContext,
    ) -> Result<StoredItem, PipelineError> {
        // A force-stored rejection never replaces the live entry of its cluster.
        let duplicate_id = match &quality.duplicate {
            Some(dup) if !quality.is_approved && dup.target_active => {
                ctx.warn(format!(
                    "near-duplicate of active entry {}; stored separately as inactive",
                    dup.id
                ));
                None
            }
            Some(dup) => Some(dup.id.as_str()),
            None => None,
        };
        let text = build_embedding_text(analysis, extraction, self.config.embedding_text_max_chars);

        let embedding = self.cache.get_or_embed(&text).await.map_err(|e| {
            PipelineError::persistence(
                Stage::Storage,
                duplicate_id,
                format!("embedding generation failed: {:#}", e),
            )
        })?;

        let options = ctx.options().clone();
        let source_type = derive_source_type(
            &options,
            ctx.source_type(),
            &self.config.expert_sources,
        );
        let priority = priority_score(quality.overall_score, source_type, analysis, &options);
        let now = chrono::Utc::now().timestamp();

        let mut record = StoredBestPractice {
            id: duplicate_id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: analysis.title.clone(),
            platform: match analysis.platform {
                Platform::Multi => None,
                p => Some(p),
            },
            category: analysis.category,
            goal: analysis.goal,
            description: analysis.description.clone(),
            example_text: analysis.example_quotes.first().cloned(),
            source_type,
            source_url: options.source_url.clone().or_else(|| match &ctx.input().content {
                SourceContent::Url { url } => Some(url.clone()),
                _ => None,
            }),
            embedding: embedding.vector,
            embedding_model: self.cache.model_name().to_string(),
            metadata: self.metadata(extraction, analysis, quality, ctx),
            quality_score: quality.overall_score,
            priority_score: priority,
            is_active: quality.is_approved,
            created_at: now,
            updated_at: now,
        };

        let mut write = WriteKind::Inserted;
        if let Some(id) = duplicate_id {
            let updated = self
                .store
                .update_best_practice(&record)
                .await
                .map_err(|e| PipelineError::persistence(Stage::Storage, Some(id), format!("{:#}", e)))?;
            if updated {
                write = WriteKind::UpdatedExisting;
            } else {
                ctx.warn(format!(
                    "duplicate {} no longer exists; storing as a new entry",
                    id
                ));
                record.id = uuid::Uuid::new_v4().to_string();
            }
        }

        if write == WriteKind::Inserted {
            self.store
                .insert_best_practice(&record)
                .await
                .map_err(|e| {
                    PipelineError::persistence(Stage::Storage, Some(record.id.as_str()), format!("{:#}", e))
                })?;
        }

        info!(
            id = %record.id,
            ?write,
            priority = record.priority_score,
            active = record.is_active,
            "best practice stored"
        );

        Ok(StoredItem {
            result: StorageResult {
                best_practice_id: record.id.clone(),
                embedding_generated: !record.embedding.is_empty(),
                embedding_cached: embedding.from_cache,
                write,
                vector_indexed: !record.embedding.is_empty(),
            },
            record,
        })
    }

    fn metadata(
        &self,
        extraction: &ExtractionResult,
        analysis: &AnalysisResult,
        quality: &QualityAssessment,
        ctx: &AgentContext,
    ) -> BestPracticeMetadata {
        BestPracticeMetadata {
            tags: analysis.tags.clone(),
            key_insights: analysis.key_insights.clone(),
            actionable_takeaways: analysis.actionable_takeaways.clone(),
            example_quotes: analysis.example_quotes.clone(),
            ingested_as: ctx.source_type(),
            request_id: ctx.request_id().to_string(),
            extraction: ExtractionProvenance {
                method: extraction.extraction_method,
                confidence: extraction.confidence_score,
                word_count: extraction.word_count,
                file_format: extraction.file_format,
            },
            analysis: AnalysisProvenance {
                model: self.analysis_model.clone(),
                difficulty_level: analysis.difficulty_level,
            },
            quality: QualityProvenance {
                overall_score: quality.overall_score,
                scores: quality.scores,
                issues: quality.issues.clone(),
                is_approved: quality.is_approved,
                duplicate_similarity: quality.duplicate_similarity(),
            },
            transcription: (extraction.extraction_method == ExtractionMethod::AudioTranscription)
                .then(|| extraction.extracted_text.clone()),
            original_filename: ctx.input().content.filename().map(str::to_string),
            source_author: ctx.options().source_name.clone(),
            duplicate_check_hash: duplicate_check_hash(&extraction.extracted_text),
        }
    }
}

/// Text embedded for both duplicate detection and storage.
///
/// Title, description, insights, tags, a bounded prefix of the raw text,
/// then quotes and takeaways when present, one part per line.
pub fn build_embedding_text(
    analysis: &AnalysisResult,
    extraction: &ExtractionResult,
    max_raw_chars: usize,
) -> String {
    let raw: String = extraction
        .extracted_text
        .trim()
        .chars()
        .take(max_raw_chars)
        .collect();
    let parts = [
        analysis.title.clone(),
        analysis.description.clone(),
        analysis.key_insights.join(" "),
        analysis.tags.join(", "),
        raw,
        analysis.example_quotes.join(" "),
        analysis.actionable_takeaways.join(" "),
    ];
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Provenance class of a record.
///
/// A contributor name matching an expert pattern wins; otherwise direct
/// uploads are internal and everything else is public.
pub fn derive_source_type(
    options: &ProcessOptions,
    arrived_as: SourceType,
    expert_patterns: &[String],
) -> DerivedSource {
    let is_expert = options.source_name.as_deref().is_some_and(|name| {
        let name = name.to_lowercase();
        expert_patterns
            .iter()
            .any(|p| !p.trim().is_empty() && name.contains(&p.trim().to_lowercase()))
    });
    if is_expert {
        return DerivedSource::Expert;
    }
    match arrived_as {
        SourceType::File | SourceType::Audio => DerivedSource::Internal,
        SourceType::Text | SourceType::Url => DerivedSource::Public,
    }
}

/// Priority on a 1-10 scale.
///
/// The weights are tunable constants: base 5, `(quality - 5) * 0.3`,
/// +2 expert / +1 internal, +1 for five or more takeaways, +0.5 for a named
/// platform, +0.5 advanced / +0.3 beginner. An override replaces the result.
pub fn priority_score(
    quality_score: f64,
    source: DerivedSource,
    analysis: &AnalysisResult,
    options: &ProcessOptions,
) -> f64 {
    if let Some(value) = options.priority_override {
        return value;
    }

    let mut score = 5.0 + (quality_score - 5.0) * 0.3;
    score += match source {
        DerivedSource::Expert => 2.0,
        DerivedSource::Internal => 1.0,
        DerivedSource::Public => 0.0,
    };
    if analysis.actionable_takeaways.len() >= 5 {
        score += 1.0;
    }
    if analysis.platform != Platform::Multi {
        score += 0.5;
    }
    score += match analysis.difficulty_level {
        DifficultyLevel::Advanced => 0.5,
        DifficultyLevel::Beginner => 0.3,
        DifficultyLevel::Intermediate => 0.0,
    };
    let score = score.clamp(1.0, 10.0);
    debug!(score, "priority computed");
    (score * 100.0).round() / 100.0
}

/// First 16 hex chars of SHA-256 over the normalized text. Provenance only.
pub fn duplicate_check_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}
