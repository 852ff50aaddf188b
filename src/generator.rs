//! Specification generation.
//!
//! [`SpecGenerator`] turns an [`AnalysisRecord`] into a [`GeneratedSpec`]
//! through a [`TextGenerator`] backend, in one of two modes:
//!
//! - [`generate`](SpecGenerator::generate): one call, whole document.
//! - [`generate_streaming`](SpecGenerator::generate_streaming): a spawned
//!   producer task drives the backend's fragment stream onto a bounded
//!   channel. The consumer sees fragments in order followed by exactly one
//!   [`GenerationChunk::Done`]. Dropping the receiver stops the producer
//!   and releases the backend's response stream.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

use repospec_core::error::PipelineError;
use repospec_core::models::{AnalysisOptions, AnalysisRecord, GeneratedSpec, SpecMetadata};

use crate::prompt;
use crate::sections::SectionRegistry;
use crate::traits::{GenerationError, TextGenerator};

/// One item on the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    Content(String),
    Done,
}

fn generation_error(backend: &str, err: &GenerationError) -> PipelineError {
    tracing::warn!(backend, error = %err, "generation failed");
    PipelineError::new(err.kind(), err.to_string())
}

pub struct SpecGenerator {
    backend: Arc<dyn TextGenerator>,
    registry: Arc<SectionRegistry>,
    max_tokens: u32,
    channel_capacity: usize,
}

impl SpecGenerator {
    pub fn new(
        backend: Arc<dyn TextGenerator>,
        registry: Arc<SectionRegistry>,
        max_tokens: u32,
        channel_capacity: usize,
    ) -> Self {
        Self {
            backend,
            registry,
            max_tokens,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Generate the whole document in one backend call.
    ///
    /// # Errors
    ///
    /// `GENERATION_FAILED` when the backend errors or returns only
    /// whitespace.
    pub async fn generate(
        &self,
        record: &AnalysisRecord,
        options: &AnalysisOptions,
    ) -> Result<GeneratedSpec, PipelineError> {
        let request = prompt::build_request(record, options, &self.registry, self.max_tokens);
        tracing::info!(
            repo = %record.metadata.full_name,
            backend = self.backend.name(),
            prompt_bytes = request.prompt.len(),
            "generating spec"
        );
        let markdown = self
            .backend
            .complete(&request)
            .await
            .map_err(|e| generation_error(self.backend.name(), &e))?;
        if markdown.trim().is_empty() {
            return Err(generation_error(self.backend.name(), &GenerationError::Empty));
        }
        Ok(self.assemble(record, markdown, Utc::now()))
    }

    /// Start incremental generation.
    ///
    /// Returns the receiving end of a bounded channel. Errors arrive as a
    /// single `Err` item after which the channel closes; a successful run
    /// ends with `Ok(GenerationChunk::Done)`.
    pub fn generate_streaming(
        &self,
        record: &AnalysisRecord,
        options: &AnalysisOptions,
    ) -> mpsc::Receiver<Result<GenerationChunk, PipelineError>> {
        let request = prompt::build_request(record, options, &self.registry, self.max_tokens);
        let backend = self.backend.clone();
        let repo = record.metadata.full_name.clone();
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(async move {
            tracing::info!(repo = %repo, backend = backend.name(), "streaming spec");
            let mut fragments = match backend.stream(&request).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(generation_error(backend.name(), &e))).await;
                    return;
                }
            };

            let mut produced = false;
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!(repo = %repo, "stream consumer went away; stopping generation");
                        return;
                    }
                    next = fragments.next() => next,
                };
                match next {
                    Some(Ok(text)) => {
                        if text.is_empty() {
                            continue;
                        }
                        produced |= !text.trim().is_empty();
                        if tx.send(Ok(GenerationChunk::Content(text))).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(generation_error(backend.name(), &e))).await;
                        return;
                    }
                    None => {
                        let last = if produced {
                            Ok(GenerationChunk::Done)
                        } else {
                            Err(generation_error(backend.name(), &GenerationError::Empty))
                        };
                        let _ = tx.send(last).await;
                        return;
                    }
                }
            }
        });

        rx
    }

    /// Build the spec for finished markdown. The share id is left unset.
    pub fn assemble(
        &self,
        record: &AnalysisRecord,
        markdown: String,
        generated_at: DateTime<Utc>,
    ) -> GeneratedSpec {
        GeneratedSpec {
            sections: self.registry.split(&markdown),
            markdown,
            metadata: SpecMetadata::for_record(record, generated_at),
            share_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, ScriptedGenerator};
    use repospec_core::error::ErrorKind;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn record() -> AnalysisRecord {
        let mut record = AnalysisRecord::new(testing::metadata("acme", "widgets"));
        record.recent_commits.push(repospec_core::models::CommitSummary {
            sha: "c0ffee".into(),
            summary: "init".into(),
            author: None,
            date: None,
        });
        record
    }

    fn generator(backend: ScriptedGenerator) -> (SpecGenerator, Arc<ScriptedGenerator>) {
        let backend = Arc::new(backend);
        let generator = SpecGenerator::new(
            backend.clone(),
            Arc::new(SectionRegistry::standard()),
            4000,
            4,
        );
        (generator, backend)
    }

    async fn drain(
        mut rx: mpsc::Receiver<Result<GenerationChunk, PipelineError>>,
    ) -> Vec<Result<GenerationChunk, PipelineError>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn batch_generation_builds_spec() {
        let (generator, backend) = generator(ScriptedGenerator::widgets_spec());
        let spec = generator
            .generate(&record(), &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(spec.markdown, backend.full_text());
        assert_eq!(spec.sections["overview"], "Widgets as a service.");
        assert_eq!(spec.metadata.commit_sha.as_deref(), Some("c0ffee"));
        assert!(spec.share_id.is_none());
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_output_is_generation_failure() {
        let (generator, _) = generator(ScriptedGenerator::new(&["  ", "\n"]));
        let err = generator
            .generate(&record(), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::GenerationFailed);

        let items = drain(generator.generate_streaming(&record(), &AnalysisOptions::default())).await;
        assert_eq!(items.len(), 3);
        assert!(items.last().unwrap().is_err());
    }

    #[tokio::test]
    async fn streaming_concatenation_matches_document() {
        let (generator, backend) = generator(ScriptedGenerator::widgets_spec());
        let items = drain(generator.generate_streaming(&record(), &AnalysisOptions::default())).await;

        let done = items
            .iter()
            .filter(|i| matches!(i, Ok(GenerationChunk::Done)))
            .count();
        assert_eq!(done, 1);
        assert_eq!(items.last(), Some(&Ok(GenerationChunk::Done)));

        let text: String = items
            .iter()
            .filter_map(|i| match i {
                Ok(GenerationChunk::Content(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, backend.full_text());
    }

    #[tokio::test]
    async fn mid_stream_error_ends_channel() {
        let mut scripted = ScriptedGenerator::widgets_spec();
        scripted.fail_after = Some((2, GenerationError::Transport("reset".into())));
        let (generator, _) = generator(scripted);
        let items = drain(generator.generate_streaming(&record(), &AnalysisOptions::default())).await;
        assert_eq!(items.len(), 3);
        let err = items[2].clone().unwrap_err();
        assert_eq!(err.kind, ErrorKind::GenerationFailed);
        assert!(!items.iter().any(|i| matches!(i, Ok(GenerationChunk::Done))));
    }

    #[tokio::test]
    async fn dropping_receiver_stops_producer() {
        let fragments: Vec<String> = (0..50).map(|i| format!("part {}\n", i)).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        let mut scripted = ScriptedGenerator::new(&refs);
        scripted.delay = Some(Duration::from_millis(10));
        let (generator, backend) = generator(scripted);

        let mut rx = generator.generate_streaming(&record(), &AnalysisOptions::default());
        assert!(matches!(rx.recv().await, Some(Ok(GenerationChunk::Content(_)))));
        drop(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = backend.yielded.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.yielded.load(Ordering::SeqCst), seen);
        assert!(seen < 50);
    }
}
