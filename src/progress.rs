//! Pipeline progress reporting.
//!
//! Each request reports the fixed checkpoint of every stage it enters
//! (extraction 10, analysis 35, quality 60, storage 85, completed 100) and
//! how it finished; batches also report which item is running. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;

use crate::models::{Outcome, Stage};

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineProgressEvent {
    /// A request entered `stage`; `percent` is the stage checkpoint.
    StageEntered {
        request_id: String,
        stage: Stage,
        percent: u8,
    },
    /// A request reached a terminal state.
    Finished {
        request_id: String,
        outcome: Outcome,
        percent: u8,
    },
    /// Batch item `n` (1-based) of `total` is starting.
    BatchItem { n: u64, total: u64 },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait PipelineProgressReporter: Send + Sync {
    fn report(&self, event: PipelineProgressEvent);
}

/// Human-friendly progress on stderr: "ingest 3f2a…  analysis   35%".
pub struct StderrProgress;

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

impl PipelineProgressReporter for StderrProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let text = match &event {
            PipelineProgressEvent::StageEntered {
                request_id,
                stage,
                percent,
            } => format!(
                "ingest {}  {:<10} {:>3}%",
                short_id(request_id),
                stage.as_str(),
                percent
            ),
            PipelineProgressEvent::Finished {
                request_id,
                outcome,
                percent,
            } => format!(
                "ingest {}  {:<10} {:>3}%",
                short_id(request_id),
                outcome_str(*outcome),
                percent
            ),
            PipelineProgressEvent::BatchItem { n, total } => {
                format!(
                    "batch  item {} / {}",
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        emit(&format!("{text}\n"));
    }
}

/// Write one line to stderr; a closed stderr never fails the pipeline.
fn emit(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = err.write_all(line.as_bytes());
    let _ = err.flush();
}

fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Stored => "stored",
        Outcome::Rejected => "rejected",
        Outcome::Failed => "failed",
    }
}

/// JSON lines on stderr, one object per event.
pub struct JsonProgress;

impl PipelineProgressReporter for JsonProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let value = match &event {
            PipelineProgressEvent::StageEntered {
                request_id,
                stage,
                percent,
            } => serde_json::json!({
                "event": "progress",
                "request_id": request_id,
                "stage": stage,
                "percent": percent
            }),
            PipelineProgressEvent::Finished {
                request_id,
                outcome,
                percent,
            } => serde_json::json!({
                "event": "finished",
                "request_id": request_id,
                "outcome": outcome,
                "percent": percent
            }),
            PipelineProgressEvent::BatchItem { n, total } => serde_json::json!({
                "event": "batch",
                "n": n,
                "total": total
            }),
        };
        if let Ok(json) = serde_json::to_string(&value) {
            emit(&format!("{json}\n"));
        }
    }
}

/// `--progress off`.
pub struct NoProgress;

impl PipelineProgressReporter for NoProgress {
    fn report(&self, _event: PipelineProgressEvent) {}
}

/// `1234567` -> `"1,234,567"`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut groups: Vec<&str> = Vec::new();
    if head > 0 {
        groups.push(&digits[..head]);
    }
    groups.extend(
        digits.as_bytes()[head..]
            .chunks(3)
            .filter_map(|c| std::str::from_utf8(c).ok()),
    );
    groups.join(",")
}

/// Value of the global `--progress` flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress on an interactive stderr, nothing when piped.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn PipelineProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(250), "250");
        assert_eq!(format_number(4096), "4,096");
        assert_eq!(format_number(100_000), "100,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn short_id_handles_short_ids() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }
}
