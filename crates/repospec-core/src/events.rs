//! Streaming protocol events.
//!
//! A stream is a sequence of [`ProtocolEvent`]s, each framed on the wire as
//!
//! ```text
//! event: <name>
//! data: <json>
//!
//! ```
//!
//! Exactly one terminal event (`complete` or `error`) ends every stream,
//! and `progress.percent` never decreases within a stream.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ErrorKind, PipelineError};
use crate::models::SpecMetadata;

/// Named pipeline step reported in `progress` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    FetchingMetadata,
    AnalyzingStructure,
    ReadingFiles,
    AnalyzingArchitecture,
    GeneratingSpec,
    Complete,
}

impl ProgressStep {
    pub fn label(self) -> &'static str {
        match self {
            ProgressStep::FetchingMetadata => "Fetching repository metadata",
            ProgressStep::AnalyzingStructure => "Analyzing directory structure",
            ProgressStep::ReadingFiles => "Reading key configuration files",
            ProgressStep::AnalyzingArchitecture => "Analyzing architecture patterns",
            ProgressStep::GeneratingSpec => "Generating specification",
            ProgressStep::Complete => "Complete",
        }
    }

    pub fn percent(self) -> u8 {
        match self {
            ProgressStep::FetchingMetadata => 10,
            ProgressStep::AnalyzingStructure => 30,
            ProgressStep::ReadingFiles => 50,
            ProgressStep::AnalyzingArchitecture => 70,
            ProgressStep::GeneratingSpec => 85,
            ProgressStep::Complete => 100,
        }
    }
}

/// Payload of the terminal `complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub success: bool,
    pub spec_id: String,
    pub share_url: String,
    pub markdown: String,
    pub metadata: SpecMetadata,
    pub cached: bool,
}

/// One event in a spec stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Connected {
        message: String,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
    Progress(ProgressStep),
    Content {
        text: String,
    },
    Complete(Box<CompletePayload>),
    Error {
        error: String,
        error_code: ErrorKind,
    },
}

impl ProtocolEvent {
    pub fn connected(timestamp: i64) -> Self {
        ProtocolEvent::Connected {
            message: "Stream established".to_string(),
            timestamp,
        }
    }

    pub fn error(err: &PipelineError) -> Self {
        ProtocolEvent::Error {
            error: err.public_message(),
            error_code: err.kind,
        }
    }

    /// The SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::Connected { .. } => "connected",
            ProtocolEvent::Progress(_) => "progress",
            ProtocolEvent::Content { .. } => "content",
            ProtocolEvent::Complete(_) => "complete",
            ProtocolEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolEvent::Complete(_) | ProtocolEvent::Error { .. })
    }

    /// Percent carried by a `progress` event.
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProtocolEvent::Progress(step) => Some(step.percent()),
            _ => None,
        }
    }

    /// The JSON `data:` payload.
    pub fn data(&self) -> Value {
        match self {
            ProtocolEvent::Connected { message, timestamp } => json!({
                "message": message,
                "timestamp": timestamp,
            }),
            ProtocolEvent::Progress(step) => json!({
                "step": step,
                "label": step.label(),
                "percent": step.percent(),
            }),
            ProtocolEvent::Content { text } => json!({ "text": text }),
            ProtocolEvent::Complete(payload) => {
                serde_json::to_value(payload.as_ref()).unwrap_or(Value::Null)
            }
            ProtocolEvent::Error { error, error_code } => json!({
                "error": error,
                "errorCode": error_code,
            }),
        }
    }

    /// Encode as one blank-line-terminated SSE record.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn percents_increase_through_the_steps() {
        let steps = [
            ProgressStep::FetchingMetadata,
            ProgressStep::AnalyzingStructure,
            ProgressStep::ReadingFiles,
            ProgressStep::AnalyzingArchitecture,
            ProgressStep::GeneratingSpec,
            ProgressStep::Complete,
        ];
        for pair in steps.windows(2) {
            assert!(pair[0].percent() < pair[1].percent());
        }
        assert_eq!(ProgressStep::Complete.percent(), 100);
    }

    #[test]
    fn progress_frame() {
        let frame = ProtocolEvent::Progress(ProgressStep::ReadingFiles).to_frame();
        assert!(frame.starts_with("event: progress\ndata: {"));
        assert!(frame.ends_with("}\n\n"));
        let data: Value = serde_json::from_str(
            frame
                .trim_end()
                .strip_prefix("event: progress\ndata: ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(data["step"], "reading_files");
        assert_eq!(data["percent"], 50);
        assert_eq!(data["label"], "Reading key configuration files");
    }

    #[test]
    fn content_with_newlines_stays_on_one_data_line() {
        let frame = ProtocolEvent::Content {
            text: "# Title\n\nbody".into(),
        }
        .to_frame();
        assert_eq!(frame.matches('\n').count(), 3);
        assert!(frame.contains(r##"{"text":"# Title\n\nbody"}"##));
    }

    #[test]
    fn error_event_carries_code() {
        let err = PipelineError::from_kind(ErrorKind::RepoNotFound);
        let event = ProtocolEvent::error(&err);
        assert!(event.is_terminal());
        let data = event.data();
        assert_eq!(data["errorCode"], "REPO_NOT_FOUND");
        assert_eq!(data["error"], ErrorKind::RepoNotFound.default_message());
    }

    #[test]
    fn complete_event_payload() {
        let generated_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let event = ProtocolEvent::Complete(Box::new(CompletePayload {
            success: true,
            spec_id: "abc".into(),
            share_url: "https://example.test/spec/abc".into(),
            markdown: "# Spec".into(),
            metadata: SpecMetadata {
                repo_owner: "acme".into(),
                repo_name: "widgets".into(),
                repo_url: "https://github.com/acme/widgets".into(),
                generated_at,
                analysis_version: "1.0".into(),
                commit_sha: None,
            },
            cached: false,
        }));
        assert_eq!(event.name(), "complete");
        assert!(event.is_terminal());
        let data = event.data();
        assert_eq!(data["specId"], "abc");
        assert_eq!(data["shareUrl"], "https://example.test/spec/abc");
        assert_eq!(data["metadata"]["repoOwner"], "acme");
        assert_eq!(data["metadata"]["generatedAt"], "2026-01-02T03:04:05Z");
    }
}
