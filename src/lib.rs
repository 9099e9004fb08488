//! # adkb
//!
//! Best-practice ingestion and retrieval for an ad intelligence knowledge
//! base.
//!
//! Raw marketing material (pasted text, uploaded documents, audio, web
//! pages) goes through a four-stage pipeline: text extraction, LLM
//! analysis into a structured and classified practice, quality scoring
//! with embedding-based duplicate detection, and storage with a priority
//! ranking. Stored practices are retrieved by vector similarity to supply
//! context to ad generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────────────────────────┐   ┌──────────┐
//! │  Request    │──▶│ Extraction → Analysis → Quality →  │──▶│  SQLite  │
//! │ text/file/  │   │                        Storage     │   │ BLOB vec │
//! │ url/audio   │   └──────────────┬─────────────────────┘   └────┬─────┘
//! └─────────────┘                  │ embedding cache              │
//!                                  ▼                              ▼
//!                           ┌──────────────┐              ┌──────────────┐
//!                           │ LLM/embedder │              │  Retrieval   │
//!                           └──────────────┘              └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! adkb init
//! adkb ingest text "Free shipping drives a 23% lift in conversion ..."
//! adkb ingest url https://example.com/guide --source-name "Growth Agency"
//! adkb search "shipping threshold" --platform meta
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Requests, stage results, stored records |
//! | [`error`] | Pipeline error taxonomy |
//! | [`pipeline`] | Orchestrator and batch processing |
//! | [`agents`] | Extraction, analysis, quality and storage stages |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embedding_cache`] | Two-tier single-flight embedding cache |
//! | [`llm`] | LLM and media transcription providers |
//! | [`parse`] | Document parsing (PDF, OOXML, CSV, text) |
//! | [`fetch`] | URL fetching and markup stripping |
//! | [`store`] | Knowledge-base persistence |
//! | [`search`] | Similarity and priority retrieval |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agents;
pub mod config;
pub mod db;
pub mod embedding;
pub mod embedding_cache;
pub mod error;
pub mod fetch;
mod http;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod progress;
mod prompts;
pub mod search;
pub mod store;
