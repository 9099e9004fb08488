//! Core data models that flow through the ingestion pipeline.
//!
//! Requests enter as [`ProcessRequest`], each stage produces a typed result
//! ([`ExtractionResult`], [`AnalysisResult`], [`QualityAssessment`],
//! [`StorageResult`]) and the knowledge base persists a
//! [`StoredBestPractice`]. Closed vocabularies (platform, category, goal,
//! difficulty) are enums so storage and filtering never see free text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declares a closed string vocabulary with `as_str`, `FromStr`, `Display`
/// and string (de)serialization. Extra aliases are accepted when parsing.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident => $text:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let key = s.trim().to_lowercase().replace([' ', '-'], "_");
                match key.as_str() {
                    $( $text $(| $alias)* => Ok($name::$variant), )+
                    _ => Err(format!(
                        "'{}' is not a valid {} (expected one of: {})",
                        s,
                        stringify!($name),
                        $name::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum! {
    /// How the content arrived at the pipeline.
    pub enum SourceType {
        Text => "text",
        File => "file",
        Url => "url",
        Audio => "audio",
    }
}

string_enum! {
    /// Advertising platform a best practice applies to. `Multi` marks a
    /// cross-platform practice and is stored as a NULL platform column.
    pub enum Platform {
        Meta => "meta",
        Facebook => "facebook" | "fb",
        Instagram => "instagram" | "ig",
        Tiktok => "tiktok",
        Google => "google" | "google_ads",
        Youtube => "youtube",
        Pinterest => "pinterest",
        Snapchat => "snapchat",
        Linkedin => "linkedin",
        X => "x" | "twitter",
        Email => "email",
        Multi => "multi" | "all" | "cross_platform",
    }
}

string_enum! {
    /// Topic of a best practice.
    pub enum Category {
        AdCopy => "ad_copy" | "copy" | "copywriting",
        Creative => "creative" | "visuals",
        Targeting => "targeting" | "audience",
        Bidding => "bidding",
        Budget => "budget" | "budgeting",
        LandingPage => "landing_page",
        Offer => "offer" | "offers" | "promotion",
        Pricing => "pricing",
        Shipping => "shipping",
        Retargeting => "retargeting" | "remarketing",
        Testing => "testing" | "ab_testing",
        Analytics => "analytics" | "measurement",
        Funnel => "funnel",
        General => "general" | "other",
    }
}

string_enum! {
    /// Campaign objective a best practice serves.
    pub enum Goal {
        Awareness => "awareness" | "brand_awareness",
        Traffic => "traffic",
        Engagement => "engagement",
        Leads => "leads" | "lead_generation",
        Conversions => "conversions" | "conversion",
        Sales => "sales",
        Retention => "retention" | "loyalty",
        AppInstalls => "app_installs",
    }
}

string_enum! {
    pub enum DifficultyLevel {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced" | "expert",
    }
}

string_enum! {
    /// Provenance class of a stored record, derived from who supplied it.
    pub enum DerivedSource {
        Expert => "expert",
        Internal => "internal",
        Public => "public",
    }
}

string_enum! {
    /// Declared or detected format of an uploaded file.
    pub enum FileFormat {
        Pdf => "pdf",
        Docx => "docx",
        Pptx => "pptx",
        Xlsx => "xlsx",
        Csv => "csv",
        Text => "txt" | "text",
        Markdown => "md" | "markdown",
        Png => "png",
        Jpeg => "jpeg" | "jpg",
        Webp => "webp",
        Mp3 => "mp3" | "mpeg",
        Wav => "wav",
        M4a => "m4a",
        Ogg => "ogg",
        Webm => "webm",
    }
}

impl FileFormat {
    /// Detect a format from a filename's extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileFormat::Png | FileFormat::Jpeg | FileFormat::Webp)
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            FileFormat::Mp3 | FileFormat::Wav | FileFormat::M4a | FileFormat::Ogg | FileFormat::Webm
        )
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileFormat::Pdf => "application/pdf",
            FileFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            FileFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileFormat::Csv => "text/csv",
            FileFormat::Text => "text/plain",
            FileFormat::Markdown => "text/markdown",
            FileFormat::Png => "image/png",
            FileFormat::Jpeg => "image/jpeg",
            FileFormat::Webp => "image/webp",
            FileFormat::Mp3 => "audio/mpeg",
            FileFormat::Wav => "audio/wav",
            FileFormat::M4a => "audio/mp4",
            FileFormat::Ogg => "audio/ogg",
            FileFormat::Webm => "audio/webm",
        }
    }
}

// ============ Requests ============

/// Raw content of a request, one variant per [`SourceType`].
#[derive(Debug, Clone)]
pub enum SourceContent {
    Text {
        text: String,
    },
    File {
        filename: String,
        bytes: Vec<u8>,
        format: Option<FileFormat>,
    },
    Url {
        url: String,
    },
    Audio {
        filename: String,
        bytes: Vec<u8>,
        format: Option<FileFormat>,
    },
}

impl SourceContent {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceContent::Text { .. } => SourceType::Text,
            SourceContent::File { .. } => SourceType::File,
            SourceContent::Url { .. } => SourceType::Url,
            SourceContent::Audio { .. } => SourceType::Audio,
        }
    }

    /// Original filename for uploads.
    pub fn filename(&self) -> Option<&str> {
        match self {
            SourceContent::File { filename, .. } | SourceContent::Audio { filename, .. } => {
                Some(filename)
            }
            _ => None,
        }
    }
}

/// Caller-supplied options that accompany a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Author or contributor name; drives the expert source derivation.
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Replaces the computed priority score entirely. Must lie in `1..=10`.
    #[serde(default)]
    pub priority_override: Option<f64>,
    /// Store the item even when quality rejects it.
    #[serde(default)]
    pub skip_quality_check: bool,
}

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub content: SourceContent,
    pub options: ProcessOptions,
}

impl ProcessRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: SourceContent::Text { text: text.into() },
            options: ProcessOptions::default(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            content: SourceContent::Url { url: url.into() },
            options: ProcessOptions::default(),
        }
    }

    pub fn file(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content: SourceContent::File {
                filename: filename.into(),
                bytes,
                format: None,
            },
            options: ProcessOptions::default(),
        }
    }

    pub fn audio(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content: SourceContent::Audio {
                filename: filename.into(),
                bytes,
                format: None,
            },
            options: ProcessOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source_type(&self) -> SourceType {
        self.content.source_type()
    }
}

// ============ Workflow state ============

string_enum! {
    /// Pipeline stage. Advances monotonically; `Failed` is reachable from any stage.
    pub enum Stage {
        Extraction => "extraction",
        Analysis => "analysis",
        Quality => "quality",
        Storage => "storage",
        Completed => "completed",
        Failed => "failed",
    }
}

impl Stage {
    fn ordinal(&self) -> u8 {
        match self {
            Stage::Extraction => 0,
            Stage::Analysis => 1,
            Stage::Quality => 2,
            Stage::Storage => 3,
            Stage::Completed | Stage::Failed => 4,
        }
    }

    /// Fixed progress checkpoint reported when the stage is entered.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Stage::Extraction => 10,
            Stage::Analysis => 35,
            Stage::Quality => 60,
            Stage::Storage => 85,
            Stage::Completed => 100,
            Stage::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

/// Per-request state threaded through every stage.
///
/// Only the orchestrator moves `stage`; agents may append to the warning
/// and error logs but never clear them.
#[derive(Debug)]
pub struct AgentContext {
    request_id: String,
    source_type: SourceType,
    original_input: ProcessRequest,
    stage: Stage,
    progress: u8,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl AgentContext {
    pub fn new(request: ProcessRequest) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            source_type: request.source_type(),
            original_input: request,
            stage: Stage::Extraction,
            progress: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn input(&self) -> &ProcessRequest {
        &self.original_input
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.original_input.options
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Move to `next`. Backward moves are ignored; progress never decreases.
    pub(crate) fn advance(&mut self, next: Stage) -> bool {
        if self.stage.is_terminal() || next.ordinal() < self.stage.ordinal() {
            return false;
        }
        self.stage = next;
        self.progress = self.progress.max(next.checkpoint());
        true
    }

    pub(crate) fn into_logs(self) -> (Vec<String>, Vec<String>) {
        (self.warnings, self.errors)
    }
}

// ============ Stage results ============

string_enum! {
    /// How the extracted text was obtained.
    pub enum ExtractionMethod {
        PassThrough => "pass_through",
        PdfText => "pdf_text",
        OfficeXml => "office_xml",
        Delimited => "delimited",
        PlainText => "plain_text",
        ImageDescription => "image_description",
        AudioTranscription => "audio_transcription",
        WebScrape => "web_scrape",
    }
}

/// Count whitespace-separated tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Output of the extraction stage.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub extracted_text: String,
    pub extraction_method: ExtractionMethod,
    pub confidence_score: f64,
    pub word_count: usize,
    pub file_format: Option<FileFormat>,
}

impl ExtractionResult {
    /// Build a result with `word_count` derived from the text. Empty text
    /// always carries zero confidence.
    pub fn new(
        text: String,
        method: ExtractionMethod,
        confidence: f64,
        file_format: Option<FileFormat>,
    ) -> Self {
        let word_count = word_count(&text);
        let confidence_score = if text.trim().is_empty() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            extracted_text: text,
            extraction_method: method,
            confidence_score,
            word_count,
            file_format,
        }
    }
}

/// Output of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub title: String,
    pub description: String,
    pub platform: Platform,
    pub category: Category,
    pub goal: Goal,
    pub key_insights: Vec<String>,
    pub tags: Vec<String>,
    pub example_quotes: Vec<String>,
    pub actionable_takeaways: Vec<String>,
    pub difficulty_level: DifficultyLevel,
}

string_enum! {
    pub enum Severity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    /// Axis that raised the issue, if any.
    pub axis: Option<String>,
    pub message: String,
}

/// Per-axis quality scores, each on a 1-10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub specificity: f64,
    pub actionability: f64,
    pub consistency: f64,
    pub completeness: f64,
    pub substance: f64,
}

impl QualityScores {
    pub fn axes(&self) -> [(&'static str, f64); 5] {
        [
            ("specificity", self.specificity),
            ("actionability", self.actionability),
            ("consistency", self.consistency),
            ("completeness", self.completeness),
            ("substance", self.substance),
        ]
    }
}

/// Nearest existing record whose similarity cleared the duplicate threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub id: String,
    pub similarity: f64,
    /// Whether the matched row is currently served by retrieval.
    pub target_active: bool,
}

/// Output of the quality stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub scores: QualityScores,
    pub issues: Vec<QualityIssue>,
    pub is_approved: bool,
    pub duplicate: Option<DuplicateMatch>,
    /// False when the duplicate search could not run.
    pub dedup_checked: bool,
}

impl QualityAssessment {
    pub fn duplicate_of(&self) -> Option<&str> {
        self.duplicate.as_ref().map(|d| d.id.as_str())
    }

    pub fn duplicate_similarity(&self) -> Option<f64> {
        self.duplicate.as_ref().map(|d| d.similarity)
    }

    pub fn has_critical_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

// ============ Persistence ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionProvenance {
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<FileFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisProvenance {
    pub model: String,
    pub difficulty_level: DifficultyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProvenance {
    pub overall_score: f64,
    pub scores: QualityScores,
    pub issues: Vec<QualityIssue>,
    pub is_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_similarity: Option<f64>,
}

/// Structured metadata stored alongside each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPracticeMetadata {
    pub tags: Vec<String>,
    pub key_insights: Vec<String>,
    pub actionable_takeaways: Vec<String>,
    pub example_quotes: Vec<String>,
    pub ingested_as: SourceType,
    pub request_id: String,
    pub extraction: ExtractionProvenance,
    pub analysis: AnalysisProvenance,
    pub quality: QualityProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_author: Option<String>,
    /// Provenance fingerprint of the extracted text; not used for dedup.
    pub duplicate_check_hash: String,
}

/// A knowledge-base row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBestPractice {
    pub id: String,
    pub title: String,
    /// `None` for cross-platform practices.
    pub platform: Option<Platform>,
    pub category: Category,
    pub goal: Goal,
    pub description: String,
    pub example_text: Option<String>,
    pub source_type: DerivedSource,
    pub source_url: Option<String>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub metadata: BestPracticeMetadata,
    pub quality_score: f64,
    pub priority_score: f64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Whether storage created a row or overwrote a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Inserted,
    UpdatedExisting,
}

/// Output of the storage stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    pub best_practice_id: String,
    pub embedding_generated: bool,
    /// The vector came from the embedding cache rather than a fresh call.
    pub embedding_cached: bool,
    pub write: WriteKind,
    pub vector_indexed: bool,
}

impl StorageResult {
    pub fn inserted(&self) -> bool {
        self.write == WriteKind::Inserted
    }

    pub fn updated_existing(&self) -> bool {
        self.write == WriteKind::UpdatedExisting
    }
}

// ============ Responses ============

/// Terminal outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Stored,
    Rejected,
    Failed,
}

/// Display metadata returned to callers, populated whenever analysis ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub title: String,
    pub platform: Platform,
    pub category: Category,
    pub goal: Goal,
    pub description: String,
    pub quality_score: Option<f64>,
    pub priority_score: Option<f64>,
    pub extracted_insights: Vec<String>,
    pub tags: Vec<String>,
    pub example_quotes: Vec<String>,
    pub source_author: Option<String>,
}

/// Result of processing one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub request_id: String,
    pub success: bool,
    pub outcome: Outcome,
    pub best_practice_id: Option<String>,
    pub metadata: Option<ResponseMetadata>,
    /// Quality issues, so rejected content can be fixed and resubmitted.
    pub issues: Vec<QualityIssue>,
    pub storage: Option<StorageResult>,
    pub stage: Stage,
    pub progress: u8,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

// ============ Retrieval ============

/// Filters applied to knowledge-base queries.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// `Some(Platform::Multi)` matches cross-platform rows (NULL platform).
    pub platform: Option<Platform>,
    pub category: Option<Category>,
    pub goal: Option<Goal>,
    pub active_only: bool,
}

impl SearchFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &StoredBestPractice) -> bool {
        if self.active_only && !record.is_active {
            return false;
        }
        if let Some(platform) = self.platform {
            let wanted = if platform == Platform::Multi {
                None
            } else {
                Some(platform)
            };
            if record.platform != wanted {
                return false;
            }
        }
        if self.category.is_some_and(|c| c != record.category) {
            return false;
        }
        if self.goal.is_some_and(|g| g != record.goal) {
            return false;
        }
        true
    }
}

/// A record returned from similarity search.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    pub record: StoredBestPractice,
    pub similarity: f64,
}
