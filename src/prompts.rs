//! Prompt templates for the analysis agent.

use crate::models::{Category, DifficultyLevel, Goal, Platform};

fn joined<T: Copy>(values: &[T], as_str: fn(&T) -> &'static str) -> String {
    values.iter().map(as_str).collect::<Vec<_>>().join(", ")
}

/// System prompt fixing the output schema and the closed vocabularies.
pub fn analysis_system_prompt() -> String {
    format!(
        r#"You are an advertising strategist curating a knowledge base of marketing best practices.
Read the supplied material and distil the single best practice it teaches.

Respond with ONE JSON object and nothing else, using exactly these keys:
{{
  "title": "short imperative title (max 12 words)",
  "description": "2-4 sentence explanation of the practice and why it works",
  "platform": one of [{platforms}],
  "category": one of [{categories}],
  "goal": one of [{goals}],
  "key_insights": ["concrete insight, with numbers when the source has them", ...],
  "tags": ["lowercase keyword", ...],
  "example_quotes": ["verbatim quote from the material", ...],
  "actionable_takeaways": ["step an advertiser can apply today", ...],
  "difficulty_level": one of [{difficulties}]
}}

Rules:
- Use "multi" when the practice applies across platforms or none is named.
- Never invent statistics that are not in the material.
- key_insights must contain at least one item; the other arrays may be empty."#,
        platforms = joined(Platform::ALL, Platform::as_str),
        categories = joined(Category::ALL, Category::as_str),
        goals = joined(Goal::ALL, Goal::as_str),
        difficulties = joined(DifficultyLevel::ALL, DifficultyLevel::as_str),
    )
}

/// User prompt carrying the extracted material.
pub fn analysis_user_prompt(text: &str, source_name: Option<&str>) -> String {
    match source_name {
        Some(name) => format!("Source: {name}\n\nMaterial:\n{text}"),
        None => format!("Material:\n{text}"),
    }
}

/// Appended on retry after a schema violation.
pub fn analysis_correction(problem: &str) -> String {
    format!(
        "\n\nYour previous answer was rejected: {problem}. \
Return a single JSON object that follows the schema exactly."
    )
}
