//! Stage 2: LLM classification and summarisation under a fixed schema.
//!
//! The LLM's answer is the trust boundary between free text and the closed
//! vocabularies the store filters on, so every field is validated and a
//! schema violation is retried with a corrective note rather than passed on.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::LlmProvider;
use crate::models::{AgentContext, AnalysisResult, ExtractionResult};
use crate::prompts;

pub struct AnalysisAgent {
    llm: Arc<dyn LlmProvider>,
    max_attempts: u32,
    retry_backoff: Duration,
    max_input_chars: usize,
}

impl AnalysisAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &PipelineConfig) -> Self {
        Self {
            llm,
            max_attempts: config.analysis_max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.analysis_retry_backoff_ms),
            max_input_chars: config.max_input_text_chars,
        }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub async fn analyze(
        &self,
        extraction: &ExtractionResult,
        ctx: &mut AgentContext,
    ) -> Result<AnalysisResult, PipelineError> {
        let text = truncate_chars(&extraction.extracted_text, self.max_input_chars);
        if text.len() < extraction.extracted_text.len() {
            ctx.warn(format!(
                "analysis input truncated to {} characters",
                self.max_input_chars
            ));
        }

        let system = prompts::analysis_system_prompt();
        let base_prompt =
            prompts::analysis_user_prompt(text, ctx.options().source_name.as_deref());

        let mut last_problem = String::new();
        // Only schema violations are fed back to the model.
        let mut correction: Option<String> = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.retry_backoff * (1 << (attempt - 2).min(5));
                tokio::time::sleep(delay).await;
            }

            let user = match &correction {
                Some(problem) => format!("{}{}", base_prompt, prompts::analysis_correction(problem)),
                None => base_prompt.clone(),
            };

            let raw = match self.llm.complete_json(&system, &user).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(attempt, error = %e, "analysis call failed");
                    last_problem = format!("LLM call failed: {:#}", e);
                    continue;
                }
            };

            match parse_analysis(&raw) {
                Ok(result) => {
                    if attempt > 1 {
                        ctx.warn(format!("analysis succeeded on attempt {}", attempt));
                    }
                    debug!(
                        platform = %result.platform,
                        category = %result.category,
                        insights = result.key_insights.len(),
                        "analysis accepted"
                    );
                    return Ok(result);
                }
                Err(problem) => {
                    warn!(attempt, %problem, "analysis response rejected");
                    correction = Some(problem.clone());
                    last_problem = problem;
                }
            }
        }

        Err(PipelineError::Analysis {
            attempts: self.max_attempts,
            message: last_problem,
        })
    }
}

/// Longest prefix of `text` with at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The LLM's answer before validation. Every field is optional so a
/// missing key is reported by name instead of as a serde error.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    title: Option<String>,
    description: Option<String>,
    platform: Option<String>,
    category: Option<String>,
    goal: Option<String>,
    #[serde(default)]
    key_insights: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    example_quotes: Vec<String>,
    #[serde(default)]
    actionable_takeaways: Vec<String>,
    difficulty_level: Option<String>,
}

/// Strip an optional Markdown code fence around a JSON answer.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing or empty field '{}'", field))
}

fn enum_field<T: std::str::FromStr<Err = String>>(
    value: Option<String>,
    field: &str,
) -> Result<T, String> {
    required(value, field)?
        .parse()
        .map_err(|e| format!("field '{}': {}", field, e))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Validate an LLM answer against the analysis schema.
pub(crate) fn parse_analysis(raw: &str) -> Result<AnalysisResult, String> {
    let body = strip_code_fence(raw);
    let parsed: RawAnalysis =
        serde_json::from_str(body).map_err(|e| format!("response is not valid JSON: {}", e))?;

    let key_insights = clean_list(parsed.key_insights);
    if key_insights.is_empty() {
        return Err("key_insights must contain at least one item".to_string());
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in clean_list(parsed.tags) {
        let tag = tag.to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(AnalysisResult {
        title: required(parsed.title, "title")?,
        description: required(parsed.description, "description")?,
        platform: enum_field(parsed.platform, "platform")?,
        category: enum_field(parsed.category, "category")?,
        goal: enum_field(parsed.goal, "goal")?,
        key_insights,
        tags,
        example_quotes: clean_list(parsed.example_quotes),
        actionable_takeaways: clean_list(parsed.actionable_takeaways),
        difficulty_level: enum_field(parsed.difficulty_level, "difficulty_level")?,
    })
}
