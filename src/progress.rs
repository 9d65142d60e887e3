//! Directory ingestion progress reporting.
//!
//! `documind ingest-all` reports the directory being scanned, each file as
//! it starts, and what happened to it: how many chunks it produced, whether
//! it was unchanged and skipped, or why it failed. Progress goes to
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for directory ingestion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IngestProgressEvent {
    /// Walking the directory; the file count is not known yet.
    Scanning { directory: String },
    /// About to ingest file `n` of `total`.
    Ingesting { file: String, n: u64, total: u64 },
    /// A file is in the index. `unchanged` files kept their old chunks and
    /// report zero.
    Ingested {
        file: String,
        chunks: u64,
        replaced: u64,
        unchanged: bool,
    },
    /// A file could not be ingested; the run continues.
    Failed { file: String, error: String },
    /// All files processed.
    Finished {
        ingested: u64,
        failed: u64,
        skipped: u64,
    },
}

impl IngestProgressEvent {
    /// One line for a terminal, without the trailing newline.
    pub fn human_line(&self) -> String {
        match self {
            IngestProgressEvent::Scanning { directory } => {
                format!("ingest {}  scanning...", directory)
            }
            IngestProgressEvent::Ingesting { file, n, total } => format!(
                "ingest  {} / {}  {}",
                format_number(*n),
                format_number(*total),
                file
            ),
            IngestProgressEvent::Ingested {
                file,
                unchanged: true,
                ..
            } => format!("ingest  unchanged  {}", file),
            IngestProgressEvent::Ingested {
                file,
                chunks,
                replaced,
                ..
            } if *replaced > 0 => format!(
                "ingest  replaced  {}  {} chunks (was {})",
                file,
                format_number(*chunks),
                format_number(*replaced)
            ),
            IngestProgressEvent::Ingested { file, chunks, .. } => {
                format!("ingest  added  {}  {} chunks", file, format_number(*chunks))
            }
            IngestProgressEvent::Failed { file, error } => {
                format!("ingest  failed  {}: {}", file, error)
            }
            IngestProgressEvent::Finished {
                ingested,
                failed,
                skipped,
            } => format!(
                "ingest  done: {} ingested, {} failed, {} skipped",
                format_number(*ingested),
                format_number(*failed),
                format_number(*skipped)
            ),
        }
    }

    /// One JSON object for machine consumers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            IngestProgressEvent::Scanning { directory } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "directory": directory
            }),
            IngestProgressEvent::Ingesting { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "file": file,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Ingested {
                file,
                chunks,
                replaced,
                unchanged,
            } => serde_json::json!({
                "event": "file",
                "outcome": if *unchanged { "unchanged" } else { "ingested" },
                "file": file,
                "chunks": chunks,
                "replaced": replaced
            }),
            IngestProgressEvent::Failed { file, error } => serde_json::json!({
                "event": "file",
                "outcome": "failed",
                "file": file,
                "error": error
            }),
            IngestProgressEvent::Finished {
                ingested,
                failed,
                skipped,
            } => serde_json::json!({
                "event": "done",
                "ingested": ingested,
                "failed": failed,
                "skipped": skipped
            }),
        }
    }
}

/// Receives ingestion progress from the pipeline.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  12 / 1,040  report.pdf".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.human_line());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event.to_json()) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn file_outcomes_read_distinctly() {
        let added = IngestProgressEvent::Ingested {
            file: "a.txt".into(),
            chunks: 3,
            replaced: 0,
            unchanged: false,
        };
        let replaced = IngestProgressEvent::Ingested {
            file: "a.txt".into(),
            chunks: 2,
            replaced: 3,
            unchanged: false,
        };
        let unchanged = IngestProgressEvent::Ingested {
            file: "a.txt".into(),
            chunks: 0,
            replaced: 0,
            unchanged: true,
        };
        let failed = IngestProgressEvent::Failed {
            file: "b.pdf".into(),
            error: "no text".into(),
        };

        assert_eq!(added.human_line(), "ingest  added  a.txt  3 chunks");
        assert_eq!(replaced.human_line(), "ingest  replaced  a.txt  2 chunks (was 3)");
        assert_eq!(unchanged.human_line(), "ingest  unchanged  a.txt");
        assert_eq!(failed.human_line(), "ingest  failed  b.pdf: no text");
    }

    #[test]
    fn json_marks_file_outcome() {
        let unchanged = IngestProgressEvent::Ingested {
            file: "a.txt".into(),
            chunks: 0,
            replaced: 0,
            unchanged: true,
        }
        .to_json();
        assert_eq!(unchanged["event"], "file");
        assert_eq!(unchanged["outcome"], "unchanged");
        assert_eq!(unchanged["chunks"], 0);

        let failed = IngestProgressEvent::Failed {
            file: "b.pdf".into(),
            error: "no text".into(),
        }
        .to_json();
        assert_eq!(failed["outcome"], "failed");
        assert_eq!(failed["error"], "no text");
    }
}
