//! Stage 3: score the analysis, gate approval, and find near-duplicates.
//!
//! Axes (each 1-10):
//!
//! | Axis | Signal |
//! |------|--------|
//! | specificity | numbers, percentages, detailed insights, tags, a concrete category |
//! | actionability | number of takeaways and insights |
//! | consistency | share of title/description terms found in the source text |
//! | completeness | populated fields |
//! | substance | source length |
//!
//! `overall_score` is the mean. Duplicate search embeds the same text the
//! storage stage persists, through the same cache and model, so both
//! similarity computations live in one embedding space.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::agents::storage::build_embedding_text;
use crate::config::{QualityConfig, StorageConfig};
use crate::embedding_cache::EmbeddingCache;
use crate::error::PipelineError;
use crate::models::{
    AgentContext, AnalysisResult, Category, DuplicateMatch, ExtractionResult, QualityAssessment,
    QualityIssue, QualityScores, SearchFilter, Severity,
};
use crate::store::KnowledgeStore;

/// Axes under this score raise a warning even above the hard floor.
const AXIS_WARNING: f64 = 5.0;

pub struct QualityAgent {
    cache: Arc<EmbeddingCache>,
    store: Arc<dyn KnowledgeStore>,
    config: QualityConfig,
    embedding_text_max_chars: usize,
}

impl QualityAgent {
    pub fn new(
        cache: Arc<EmbeddingCache>,
        store: Arc<dyn KnowledgeStore>,
        config: &QualityConfig,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config: config.clone(),
            embedding_text_max_chars: storage.embedding_text_max_chars,
        }
    }

    pub async fn assess(
        &self,
        extraction: &ExtractionResult,
        analysis: &AnalysisResult,
        ctx: &mut AgentContext,
    ) -> Result<QualityAssessment, PipelineError> {
        let scores = score_axes(extraction, analysis);
        let mut issues = axis_issues(&scores, self.config.axis_floor);

        if extraction.word_count < self.config.min_word_count {
            issues.push(QualityIssue {
                severity: Severity::Critical,
                axis: None,
                message: format!(
                    "content has {} words; at least {} are required",
                    extraction.word_count, self.config.min_word_count
                ),
            });
        }

        let overall_score = round2(
            scores.axes().iter().map(|(_, s)| s).sum::<f64>() / scores.axes().len() as f64,
        );
        if overall_score < self.config.approval_threshold {
            issues.push(QualityIssue {
                severity: Severity::Warning,
                axis: None,
                message: format!(
                    "overall score {:.2} is below the approval threshold {:.1}",
                    overall_score, self.config.approval_threshold
                ),
            });
        }

        let budget = Duration::from_secs(self.config.dedup_timeout_secs);
        let search = tokio::time::timeout(budget, self.find_duplicate(extraction, analysis)).await;
        let search = match search {
            Ok(result) => result,
            Err(_) => Err(PipelineError::QualityServiceDegraded(format!(
                "duplicate search timed out after {}s",
                budget.as_secs()
            ))),
        };
        let (duplicate, dedup_checked) = match search {
            Ok(found) => (found, true),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "duplicate detection skipped");
                ctx.warn(e.to_string());
                issues.push(QualityIssue {
                    severity: Severity::Warning,
                    axis: None,
                    message: "duplicate detection unavailable; stored without dedup check"
                        .to_string(),
                });
                (None, false)
            }
        };
        if let Some(dup) = &duplicate {
            issues.push(QualityIssue {
                severity: Severity::Info,
                axis: None,
                message: format!(
                    "near-duplicate of {} (similarity {:.3})",
                    dup.id, dup.similarity
                ),
            });
        }

        // Approval ignores duplicate status: an approved duplicate updates in place.
        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let is_approved = !has_critical && overall_score >= self.config.approval_threshold;

        debug!(overall_score, is_approved, dedup_checked, "quality assessed");
        Ok(QualityAssessment {
            overall_score,
            scores,
            issues,
            is_approved,
            duplicate,
            dedup_checked,
        })
    }

    async fn find_duplicate(
        &self,
        extraction: &ExtractionResult,
        analysis: &AnalysisResult,
    ) -> Result<Option<DuplicateMatch>, PipelineError> {
        let text = build_embedding_text(analysis, extraction, self.embedding_text_max_chars);
        let embedding = self
            .cache
            .get_or_embed(&text)
            .await
            .map_err(|e| PipelineError::QualityServiceDegraded(format!("{:#}", e)))?;

        let nearest = self
            .store
            .similarity_search(
                &embedding.vector,
                self.cache.model_name(),
                1,
                &SearchFilter::default(),
            )
            .await
            .map_err(|e| PipelineError::QualityServiceDegraded(format!("{:#}", e)))?;

        Ok(nearest
            .into_iter()
            .next()
            .filter(|m| m.similarity >= self.config.duplicate_threshold)
            .map(|m| DuplicateMatch {
                id: m.record.id,
                similarity: m.similarity.min(1.0),
                target_active: m.record.is_active,
            }))
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn clamp_score(x: f64) -> f64 {
    round2(x.clamp(1.0, 10.0))
}

/// Lowercase alphanumeric terms of at least four characters.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 4)
        .map(|t| t.to_lowercase())
        .collect()
}

pub(crate) fn score_axes(extraction: &ExtractionResult, analysis: &AnalysisResult) -> QualityScores {
    let insights_text = analysis.key_insights.join(" ");

    let mut specificity: f64 = 4.0;
    let has_digit = |s: &str| s.chars().any(|c| c.is_ascii_digit());
    if has_digit(&extraction.extracted_text) || has_digit(&insights_text) {
        specificity += 2.0;
    }
    if extraction.extracted_text.contains(['%', '$']) || insights_text.contains(['%', '$']) {
        specificity += 1.0;
    }
    let avg_insight_words = crate::models::word_count(&insights_text) as f64
        / analysis.key_insights.len().max(1) as f64;
    if avg_insight_words >= 6.0 {
        specificity += 1.0;
    }
    if analysis.tags.len() >= 3 {
        specificity += 1.0;
    }
    if analysis.category != Category::General {
        specificity += 1.0;
    }

    let actionability = 2.0
        + analysis.actionable_takeaways.len().min(5) as f64 * 1.2
        + analysis.key_insights.len().min(3) as f64 * 0.5;

    let summary_terms = terms(&format!("{} {}", analysis.title, analysis.description));
    let source_terms = terms(&extraction.extracted_text);
    let consistency = if summary_terms.is_empty() {
        5.0
    } else {
        let shared = summary_terms.intersection(&source_terms).count() as f64;
        2.0 + 8.0 * shared / summary_terms.len() as f64
    };

    let checks = [
        !analysis.title.is_empty(),
        !analysis.description.is_empty(),
        !analysis.key_insights.is_empty(),
        !analysis.tags.is_empty(),
        !analysis.example_quotes.is_empty(),
        !analysis.actionable_takeaways.is_empty(),
        crate::models::word_count(&analysis.description) >= 10,
    ];
    let populated = checks.iter().filter(|c| **c).count() as f64;
    let completeness = 1.0 + 9.0 * populated / checks.len() as f64;

    let substance = match extraction.word_count {
        n if n < 5 => 1.0,
        n if n < 20 => 5.0,
        n if n < 50 => 7.0,
        _ => 9.0,
    };

    QualityScores {
        specificity: clamp_score(specificity),
        actionability: clamp_score(actionability),
        consistency: clamp_score(consistency),
        completeness: clamp_score(completeness),
        substance: clamp_score(substance),
    }
}

fn axis_issues(scores: &QualityScores, floor: f64) -> Vec<QualityIssue> {
    scores
        .axes()
        .iter()
        .filter_map(|&(axis, score)| {
            let severity = if score < floor {
                Severity::Critical
            } else if score < AXIS_WARNING {
                Severity::Warning
            } else {
                return None;
            };
            Some(QualityIssue {
                severity,
                axis: Some(axis.to_string()),
                message: format!("{} score {:.1} is low", axis, score),
            })
        })
        .collect()
}
