//! The four pipeline stages.
//!
//! Each agent is a function of its typed inputs plus the shared
//! [`AgentContext`](crate::models::AgentContext); agents append warnings and
//! errors to the context but never move its stage. Only
//! [`Pipeline`](crate::pipeline::Pipeline) knows all four exist.

pub mod analysis;
pub mod extraction;
pub mod quality;
pub mod storage;

pub use analysis::AnalysisAgent;
pub use extraction::ExtractionAgent;
pub use quality::QualityAgent;
pub use storage::{build_embedding_text, derive_source_type, priority_score, StorageAgent};
