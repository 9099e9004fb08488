//! # adkb CLI
//!
//! The `adkb` binary drives the ingestion pipeline and queries the
//! knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! adkb --config ./config/adkb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `adkb init` | Create the SQLite database and run schema migrations |
//! | `adkb ingest <text\|file\|url\|audio>` | Run one item through the pipeline |
//! | `adkb batch <file.json>` | Run a JSON array of items through the pipeline |
//! | `adkb search [query]` | Similarity search, or top-priority listing without a query |
//! | `adkb get <id>` | Print one stored best practice |
//! | `adkb stats` | Row, category and cache counts |
//! | `adkb completions <shell>` | Print a shell completion script |
//!
//! Pipeline responses are printed to stdout as JSON; logs and progress go
//! to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use adkb::config::{self, Config};
use adkb::embedding_cache::EmbeddingCache;
use adkb::models::{
    Category, FileFormat, Goal, Outcome, Platform, ProcessOptions, ProcessRequest, SourceContent,
    SourceType,
};
use adkb::pipeline::{Pipeline, PipelineDeps};
use adkb::progress::ProgressMode;
use adkb::search::{RetrievalFilter, Retriever};
use adkb::store::{KnowledgeStore, SqliteStore};
use adkb::{db, migrate};

/// adkb: ingest advertising best practices into a searchable knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/adkb.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "adkb", version, about = "Ad intelligence best-practice knowledge base")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/adkb.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run a single item through the ingestion pipeline.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Run a JSON array of items through the pipeline, one at a time.
    ///
    /// Each entry has a `source_type` (`text`, `file`, `url`, `audio`), the
    /// matching `text`, `path` or `url` field, an optional `format`, and the
    /// optional `source_name`, `source_url`, `priority_override` and
    /// `skip_quality_check` fields. Relative paths resolve against the
    /// batch file's directory.
    Batch {
        path: PathBuf,
    },

    /// Search active best practices.
    ///
    /// With a query, results are ordered by similarity (requires an
    /// embedding provider). Without one, the highest-priority practices
    /// matching the filters are listed.
    Search {
        query: Option<String>,

        /// Platform filter; `multi` selects cross-platform practices.
        #[arg(long)]
        platform: Option<Platform>,

        #[arg(long)]
        category: Option<Category>,

        #[arg(long)]
        goal: Option<Goal>,

        /// Maximum number of results (capped by `retrieval.max_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a stored best practice by id.
    Get {
        id: String,
    },

    /// Show knowledge-base statistics.
    Stats,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum IngestSource {
    /// Pasted text. Use `-` to read from stdin.
    Text {
        text: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// A document or image file.
    File {
        path: PathBuf,
        /// Override format detection from the file extension.
        #[arg(long)]
        format: Option<FileFormat>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// A web page.
    Url {
        url: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// An audio recording to transcribe.
    Audio {
        path: PathBuf,
        #[arg(long)]
        format: Option<FileFormat>,
        #[command(flatten)]
        options: OptionArgs,
    },
}

#[derive(clap::Args)]
struct OptionArgs {
    /// Author or contributor of the material.
    #[arg(long)]
    source_name: Option<String>,

    /// Where the material came from.
    #[arg(long)]
    source_url: Option<String>,

    /// Fixed priority score (1-10) replacing the computed one.
    #[arg(long)]
    priority: Option<f64>,

    /// Store the item even if quality review rejects it (stored inactive).
    #[arg(long)]
    skip_quality_check: bool,
}

impl From<OptionArgs> for ProcessOptions {
    fn from(args: OptionArgs) -> Self {
        ProcessOptions {
            source_name: args.source_name,
            source_url: args.source_url,
            priority_override: args.priority,
            skip_quality_check: args.skip_quality_check,
        }
    }
}

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    source_type: SourceType,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    format: Option<FileFormat>,
    #[serde(flatten)]
    options: ProcessOptions,
}

impl BatchEntry {
    async fn into_request(self, base_dir: &Path) -> Result<ProcessRequest> {
        let content = match self.source_type {
            SourceType::Text => SourceContent::Text {
                text: self.text.context("text entry needs a `text` field")?,
            },
            SourceType::Url => SourceContent::Url {
                url: self.url.context("url entry needs a `url` field")?,
            },
            SourceType::File | SourceType::Audio => {
                let path = self.path.context("file and audio entries need a `path` field")?;
                let path = base_dir.join(path);
                let (filename, bytes) = read_upload(&path).await?;
                if self.source_type == SourceType::File {
                    SourceContent::File {
                        filename,
                        bytes,
                        format: self.format,
                    }
                } else {
                    SourceContent::Audio {
                        filename,
                        bytes,
                        format: self.format,
                    }
                }
            }
        };
        Ok(ProcessRequest {
            content,
            options: self.options,
        })
    }
}

async fn read_upload(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((filename, bytes))
}

async fn ingest_request(source: IngestSource) -> Result<ProcessRequest> {
    let (content, options) = match source {
        IngestSource::Text { text, options } => {
            let text = if text == "-" {
                let mut buf = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
                    .context("Failed to read stdin")?;
                buf
            } else {
                text
            };
            (SourceContent::Text { text }, options)
        }
        IngestSource::Url { url, options } => (SourceContent::Url { url }, options),
        IngestSource::File {
            path,
            format,
            options,
        } => {
            let (filename, bytes) = read_upload(&path).await?;
            (
                SourceContent::File {
                    filename,
                    bytes,
                    format,
                },
                options,
            )
        }
        IngestSource::Audio {
            path,
            format,
            options,
        } => {
            let (filename, bytes) = read_upload(&path).await?;
            (
                SourceContent::Audio {
                    filename,
                    bytes,
                    format,
                },
                options,
            )
        }
    };
    Ok(ProcessRequest {
        content,
        options: options.into(),
    })
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn KnowledgeStore>> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "adkb", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { source } => {
            let request = ingest_request(source).await?;
            let pipeline =
                Pipeline::new(PipelineDeps::from_config(&cfg).await?, &cfg)
                    .with_progress(progress.reporter());
            let response = pipeline.process(request).await;
            print_json(&response)?;
            if response.outcome == Outcome::Failed {
                bail!("ingestion failed: {}", response.errors.join("; "));
            }
        }
        Commands::Batch { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
            let entries: Vec<BatchEntry> =
                serde_json::from_str(&raw).with_context(|| "Failed to parse batch file")?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

            let mut requests = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                let request = entry
                    .into_request(base_dir)
                    .await
                    .with_context(|| format!("batch entry {}", index))?;
                requests.push(request);
            }

            let pipeline =
                Pipeline::new(PipelineDeps::from_config(&cfg).await?, &cfg)
                    .with_progress(progress.reporter());
            let responses = pipeline.process_batch(requests).await;
            print_json(&responses)?;
        }
        Commands::Search {
            query,
            platform,
            category,
            goal,
            limit,
        } => {
            let filter = RetrievalFilter {
                platform,
                category,
                goal,
            };
            let limit = limit.unwrap_or(0);
            let store = open_store(&cfg).await?;
            let embedder = adkb::embedding::create_provider(&cfg.embedding)?;
            let cache = Arc::new(EmbeddingCache::new(embedder, store.clone()));
            let retriever = Retriever::new(store, cache, &cfg.retrieval);

            let hits = match query.as_deref().map(str::trim) {
                Some(q) if !q.is_empty() => {
                    if !cfg.embedding.is_enabled() {
                        bail!("Similarity search requires embeddings. Set [embedding] provider in config.");
                    }
                    retriever.search_by_text(q, filter, limit).await?
                }
                _ => retriever.list_top_priority(filter, limit).await?,
            };
            if hits.is_empty() {
                eprintln!("No results.");
            }
            print_json(&hits)?;
        }
        Commands::Get { id } => {
            let store = open_store(&cfg).await?;
            match store.get_best_practice(&id).await? {
                Some(record) => print_json(&record)?,
                None => bail!("No best practice found with id: {}", id),
            }
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            print_json(&store.stats().await?)?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
