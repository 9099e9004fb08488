use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Configuration with every section at its default and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            pipeline: PipelineConfig::default(),
            quality: QualityConfig::default(),
            storage: StorageConfig::default(),
            retrieval: RetrievalConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            transcription_model: default_transcription_model(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Pause between batch items, to stay under provider rate limits.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_analysis_max_attempts")]
    pub analysis_max_attempts: u32,
    #[serde(default = "default_analysis_retry_backoff_ms")]
    pub analysis_retry_backoff_ms: u64,
    /// Cap on extracted text sent to the LLM.
    #[serde(default = "default_max_input_text_chars")]
    pub max_input_text_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            batch_delay_ms: default_batch_delay_ms(),
            analysis_max_attempts: default_analysis_max_attempts(),
            analysis_retry_backoff_ms: default_analysis_retry_backoff_ms(),
            max_input_text_chars: default_max_input_text_chars(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_analysis_max_attempts() -> u32 {
    3
}
fn default_analysis_retry_backoff_ms() -> u64 {
    500
}
fn default_max_input_text_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    /// Minimum overall score (1-10) for approval.
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,
    /// Any axis below this floor raises a critical issue.
    #[serde(default = "default_axis_floor")]
    pub axis_floor: f64,
    /// Cosine similarity at or above which two items are the same practice.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default = "default_min_word_count")]
    pub min_word_count: usize,
    /// Budget for the duplicate search inside the quality stage. When it
    /// runs out the item continues without dedup information.
    #[serde(default = "default_dedup_timeout_secs")]
    pub dedup_timeout_secs: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            approval_threshold: default_approval_threshold(),
            axis_floor: default_axis_floor(),
            duplicate_threshold: default_duplicate_threshold(),
            min_word_count: default_min_word_count(),
            dedup_timeout_secs: default_dedup_timeout_secs(),
        }
    }
}

fn default_approval_threshold() -> f64 {
    6.0
}
fn default_axis_floor() -> f64 {
    3.0
}
fn default_duplicate_threshold() -> f64 {
    0.90
}
fn default_min_word_count() -> usize {
    5
}
fn default_dedup_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Raw-text prefix included in the embedding text, in characters.
    #[serde(default = "default_embedding_text_max_chars")]
    pub embedding_text_max_chars: usize,
    /// Contributor name patterns (case-insensitive substrings) treated as experts.
    #[serde(default = "default_expert_sources")]
    pub expert_sources: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            embedding_text_max_chars: default_embedding_text_max_chars(),
            expert_sources: default_expert_sources(),
        }
    }
}

fn default_embedding_text_max_chars() -> usize {
    1000
}
fn default_expert_sources() -> Vec<String> {
    vec![
        "expert".to_string(),
        "consultant".to_string(),
        "strategist".to_string(),
        "agency".to_string(),
        "coach".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    50
}

/// Web page fetching for `url` sources. Independent of `[llm]`.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_max_retries")]
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_fetch_max_retries(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_fetch_max_retries() -> u32 {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate quality gates
    let q = &config.quality;
    if !(1.0..=10.0).contains(&q.approval_threshold) {
        bail!("quality.approval_threshold must be in [1.0, 10.0]");
    }
    if !(1.0..=10.0).contains(&q.axis_floor) {
        bail!("quality.axis_floor must be in [1.0, 10.0]");
    }
    if !(0.0..=1.0).contains(&q.duplicate_threshold) || q.duplicate_threshold == 0.0 {
        bail!("quality.duplicate_threshold must be in (0.0, 1.0]");
    }

    // Validate pipeline
    if config.pipeline.analysis_max_attempts == 0 {
        bail!("pipeline.analysis_max_attempts must be >= 1");
    }
    if config.pipeline.stage_timeout_secs == 0 {
        bail!("pipeline.stage_timeout_secs must be > 0");
    }
    if q.dedup_timeout_secs == 0 || q.dedup_timeout_secs >= config.pipeline.stage_timeout_secs {
        bail!("quality.dedup_timeout_secs must be in [1, pipeline.stage_timeout_secs)");
    }
    if config.fetch.timeout_secs == 0 {
        bail!("fetch.timeout_secs must be > 0");
    }

    // Validate retrieval
    if config.retrieval.default_limit == 0
        || config.retrieval.default_limit > config.retrieval.max_limit
    {
        bail!("retrieval.default_limit must be in [1, retrieval.max_limit]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.llm.is_enabled() && config.llm.model.is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/adkb.sqlite\"\n").unwrap();
        assert_eq!(config.quality.approval_threshold, 6.0);
        assert_eq!(config.quality.duplicate_threshold, 0.90);
        assert_eq!(config.pipeline.analysis_max_attempts, 3);
        assert_eq!(config.storage.embedding_text_max_chars, 1000);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn enabled_embedding_requires_dims_and_model() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[llm]\nprovider = \"palm\"\nmodel = \"m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/adkb.example.toml")).unwrap();
        assert_eq!(config.embedding.dims, Some(1536));
        assert_eq!(config.storage.expert_sources.len(), 5);
        assert_eq!(config.fetch.timeout_secs, 20);
    }

    #[test]
    fn dedup_timeout_must_fit_inside_stage_timeout() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[pipeline]\nstage_timeout_secs = 10\n[quality]\ndedup_timeout_secs = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("dedup_timeout_secs"));

        let config = parse("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert!(config.quality.dedup_timeout_secs < config.pipeline.stage_timeout_secs);
    }

    #[test]
    fn duplicate_threshold_out_of_range_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[quality]\nduplicate_threshold = 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("duplicate_threshold"));
    }
}
