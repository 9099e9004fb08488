//! Stage 1: turn any source into plain text.

use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::fetch::{page_confidence, UrlFetcher};
use crate::llm::MediaTranscriber;
use crate::models::{
    AgentContext, ExtractionMethod, ExtractionResult, FileFormat, SourceContent,
};
use crate::parse::DocumentParser;

/// Extractions below this confidence are flagged for review.
const LOW_CONFIDENCE: f64 = 0.6;

pub struct ExtractionAgent {
    parser: Arc<dyn DocumentParser>,
    fetcher: Arc<dyn UrlFetcher>,
    transcriber: Arc<dyn MediaTranscriber>,
}

impl ExtractionAgent {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        fetcher: Arc<dyn UrlFetcher>,
        transcriber: Arc<dyn MediaTranscriber>,
    ) -> Self {
        Self {
            parser,
            fetcher,
            transcriber,
        }
    }

    pub async fn extract(&self, ctx: &mut AgentContext) -> Result<ExtractionResult, PipelineError> {
        let result = self.extract_content(&ctx.input().content).await?;

        if result.extracted_text.trim().is_empty() {
            return Err(PipelineError::Extraction(format!(
                "no text could be extracted from {} input",
                ctx.source_type()
            )));
        }
        if result.confidence_score < LOW_CONFIDENCE {
            ctx.warn(format!(
                "low extraction confidence ({:.2}) via {}",
                result.confidence_score, result.extraction_method
            ));
        }
        debug!(
            method = %result.extraction_method,
            words = result.word_count,
            confidence = result.confidence_score,
            "extracted text"
        );
        Ok(result)
    }

    async fn extract_content(
        &self,
        content: &SourceContent,
    ) -> Result<ExtractionResult, PipelineError> {
        match content {
            SourceContent::Text { text } => Ok(ExtractionResult::new(
                text.clone(),
                ExtractionMethod::PassThrough,
                1.0,
                None,
            )),

            SourceContent::File {
                filename,
                bytes,
                format,
            } => {
                let format = resolve_format(filename, *format)?;
                if bytes.is_empty() {
                    return Err(PipelineError::Extraction(format!("{} is empty", filename)));
                }
                let parsed = self
                    .parser
                    .parse(bytes, format)
                    .await
                    .map_err(|e| PipelineError::Extraction(format!("{}: {}", filename, e)))?;
                Ok(ExtractionResult::new(
                    parsed.text,
                    parsed.method,
                    parsed.confidence,
                    Some(format),
                ))
            }

            SourceContent::Audio {
                filename,
                bytes,
                format,
            } => {
                let format = resolve_format(filename, *format)?;
                if !format.is_audio() {
                    return Err(PipelineError::Extraction(format!(
                        "{} is not an audio format ({})",
                        filename, format
                    )));
                }
                if bytes.is_empty() {
                    return Err(PipelineError::Extraction(format!("{} is empty", filename)));
                }
                let text = self
                    .transcriber
                    .transcribe_audio(bytes, format)
                    .await
                    .map_err(|e| {
                        PipelineError::Extraction(format!("transcription of {} failed: {}", filename, e))
                    })?;
                Ok(ExtractionResult::new(
                    text,
                    ExtractionMethod::AudioTranscription,
                    0.9,
                    Some(format),
                ))
            }

            SourceContent::Url { url } => {
                let page = self
                    .fetcher
                    .fetch(url)
                    .await
                    .map_err(|e| PipelineError::Extraction(format!("fetching {}: {:#}", url, e)))?;
                let confidence = page_confidence(&page.text);
                let text = match page.title {
                    Some(title) if !page.text.starts_with(&title) => {
                        format!("{}\n\n{}", title, page.text)
                    }
                    _ => page.text,
                };
                Ok(ExtractionResult::new(
                    text,
                    ExtractionMethod::WebScrape,
                    confidence,
                    None,
                ))
            }
        }
    }
}

/// Declared format wins; otherwise the filename extension decides.
fn resolve_format(filename: &str, declared: Option<FileFormat>) -> Result<FileFormat, PipelineError> {
    declared
        .or_else(|| FileFormat::from_filename(filename))
        .ok_or_else(|| {
            PipelineError::Extraction(format!("cannot determine the format of {}", filename))
        })
}
