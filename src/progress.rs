//! Analysis progress reporting for the CLI.
//!
//! Reports observable progress while `aim analyze` runs the pipeline
//! in-process. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use crate::job::JobStage;

/// Reports analysis progress. Implementations write to stderr (human or JSON).
pub trait AnalysisProgressReporter: Send + Sync {
    /// Emit a stage change. Called from the one-shot analysis pipeline.
    fn report(&self, stage: JobStage, progress: u8);
}

/// Human-friendly progress on stderr: "analyze  matching  45%".
pub struct StderrProgress;

impl AnalysisProgressReporter for StderrProgress {
    fn report(&self, stage: JobStage, progress: u8) {
        let stage_name = match stage {
            JobStage::Queued => "queued",
            JobStage::Extracting => "extracting",
            JobStage::Matching => "matching",
            JobStage::Scoring => "scoring",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        };
        let line = format!("analyze  {}  {}%\n", stage_name, progress);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AnalysisProgressReporter for JsonProgress {
    fn report(&self, stage: JobStage, progress: u8) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": stage,
            "progress": progress,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AnalysisProgressReporter for NoProgress {
    fn report(&self, _stage: JobStage, _progress: u8) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn AnalysisProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
