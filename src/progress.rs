//! Analysis progress reporting.
//!
//! The analyzer reports when it enters each sampling phase so callers can
//! show where a long analysis is. The CLI prints to **stderr** (stdout stays
//! parseable for `--json`); the stream controller turns phases into
//! protocol events.

use async_trait::async_trait;
use std::io::Write;

/// Sampling phase the analyzer has just entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AnalysisPhase {
    /// Walking the directory tree.
    StructureStarted,
    /// Fetching key configuration files.
    KeyFilesStarted,
}

impl AnalysisPhase {
    pub fn label(self) -> &'static str {
        match self {
            AnalysisPhase::StructureStarted => "analyzing directory structure",
            AnalysisPhase::KeyFilesStarted => "reading key configuration files",
        }
    }
}

/// Receives analysis phases. Implementations must not fail the analysis.
#[async_trait]
pub trait AnalysisProgress: Send + Sync {
    async fn report(&self, phase: AnalysisPhase);
}

/// Human-friendly progress on stderr: `analyze acme/widgets  reading key configuration files...`.
pub struct StderrProgress {
    pub repo: String,
}

#[async_trait]
impl AnalysisProgress for StderrProgress {
    async fn report(&self, phase: AnalysisPhase) {
        let line = format!("analyze {}  {}...\n", self.repo, phase.label());
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// No-op reporter.
pub struct NoProgress;

#[async_trait]
impl AnalysisProgress for NoProgress {
    async fn report(&self, _phase: AnalysisPhase) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every phase it receives.
    #[derive(Default)]
    pub struct RecordingProgress {
        pub phases: Mutex<Vec<AnalysisPhase>>,
    }

    #[async_trait]
    impl AnalysisProgress for RecordingProgress {
        async fn report(&self, phase: AnalysisPhase) {
            self.phases.lock().unwrap().push(phase);
        }
    }
}
