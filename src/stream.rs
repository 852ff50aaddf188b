//! Streaming controller.
//!
//! Drives one request through the pipeline and turns every stage
//! transition into [`ProtocolEvent`]s on a bounded channel:
//!
//! ```text
//! idle ─▶ validating ─▶ analyzing ─▶ generating ─▶ streaming-content ─▶ complete
//!   └──────────┴────────────┴────────────┴──────────────┴──────▶ error
//! ```
//!
//! Every stream starts with `connected` and ends with exactly one
//! `complete` or `error`. Progress percentages never decrease.
//!
//! The transport owns the receiving end. When it goes away the controller
//! notices on its next send or through `closed()` while a stage is in
//! flight, stops, drops the generation channel (which stops the producer
//! task) and persists nothing.

use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use async_trait::async_trait;
use repospec_core::error::{ErrorKind, PipelineError};
use repospec_core::events::CompletePayload;
use repospec_core::models::{AnalysisOptions, AnalysisRecord, StoredSpec};
use repospec_core::{parse_reference, ProgressStep, ProtocolEvent, RepoReference};

use crate::generator::GenerationChunk;
use crate::pipeline::Pipeline;
use crate::progress::{AnalysisPhase, AnalysisProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Validating,
    Analyzing,
    Generating,
    StreamingContent,
    Complete,
    Error,
}

/// One streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub input: String,
    pub options: AnalysisOptions,
    pub owner_id: Option<String>,
}

/// The receiving end went away.
#[derive(Debug)]
struct Disconnected;

/// Sends events for one stream and tracks its state.
struct Emitter {
    tx: mpsc::Sender<ProtocolEvent>,
    state: Mutex<StreamState>,
    last_percent: AtomicU8,
    repo: Mutex<Option<String>>,
}

impl Emitter {
    fn new(tx: mpsc::Sender<ProtocolEvent>) -> Self {
        Self {
            tx,
            state: Mutex::new(StreamState::Idle),
            last_percent: AtomicU8::new(0),
            repo: Mutex::new(None),
        }
    }

    fn state(&self) -> StreamState {
        self.state.lock().map(|s| *s).unwrap_or(StreamState::Error)
    }

    fn transition(&self, next: StreamState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                tracing::debug!(from = ?*state, to = ?next, "stream state");
                *state = next;
            }
        }
    }

    async fn emit(&self, event: ProtocolEvent) -> Result<(), Disconnected> {
        if let Some(percent) = event.percent() {
            let last = self.last_percent.fetch_max(percent, Ordering::SeqCst);
            if percent < last {
                tracing::debug!(percent, last, "dropping out-of-order progress");
                return Ok(());
            }
        }
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    async fn progress(&self, step: ProgressStep) -> Result<(), Disconnected> {
        self.emit(ProtocolEvent::Progress(step)).await
    }

    /// Emit the terminal error event.
    async fn fail(&self, err: &PipelineError) -> Result<(), Disconnected> {
        let repo = self.repo.lock().ok().and_then(|r| r.clone());
        tracing::warn!(
            repo = repo.as_deref().unwrap_or("-"),
            state = ?self.state(),
            code = %err.kind,
            error = %err.message,
            "stream failed"
        );
        self.transition(StreamState::Error);
        self.emit(ProtocolEvent::error(err)).await
    }

    /// Await `fut` unless the receiver disconnects first.
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, Disconnected> {
        tokio::select! {
            _ = self.tx.closed() => Err(Disconnected),
            out = fut => Ok(out),
        }
    }
}

/// Maps analyzer phases onto protocol progress.
struct StreamProgress<'a> {
    emitter: &'a Emitter,
}

#[async_trait]
impl AnalysisProgress for StreamProgress<'_> {
    async fn report(&self, phase: AnalysisPhase) {
        // analyzing_structure is emitted before analysis starts.
        if phase == AnalysisPhase::KeyFilesStarted {
            let _ = self.emitter.progress(ProgressStep::ReadingFiles).await;
        }
    }
}

/// Spawn a controller for `request` and return its event stream.
pub fn spawn(pipeline: Arc<Pipeline>, request: StreamRequest) -> mpsc::Receiver<ProtocolEvent> {
    let (tx, rx) = mpsc::channel(pipeline.channel_capacity());
    tokio::spawn(async move {
        let emitter = Emitter::new(tx);
        if run(&pipeline, &request, &emitter).await.is_err() {
            tracing::info!(
                input = %request.input,
                state = ?emitter.state(),
                "client disconnected; stream abandoned"
            );
        }
    });
    rx
}

/// A stream holding only an `INVALID_URL` error, for requests with no
/// repository at all.
pub fn rejected(message: &str) -> mpsc::Receiver<ProtocolEvent> {
    let (tx, rx) = mpsc::channel(1);
    let event = ProtocolEvent::error(&PipelineError::new(ErrorKind::InvalidUrl, message));
    // Capacity 1 on a fresh channel; this cannot fail for lack of room.
    let _ = tx.try_send(event);
    rx
}

async fn run(
    pipeline: &Pipeline,
    request: &StreamRequest,
    emitter: &Emitter,
) -> Result<(), Disconnected> {
    emitter
        .emit(ProtocolEvent::connected(Utc::now().timestamp_millis()))
        .await?;

    let repo = match parse_reference(&request.input) {
        Ok(repo) => repo,
        Err(e) => return emitter.fail(&e).await,
    };
    if let Ok(mut slot) = emitter.repo.lock() {
        *slot = Some(repo.to_string());
    }

    if !request.options.refresh {
        let hit = emitter.guard(pipeline.cache.get_fresh(&repo)).await?;
        if let Some(stored) = hit {
            tracing::info!(repo = %repo, share_id = %stored.share_id, "serving cached spec");
            emitter
                .emit(ProtocolEvent::Content {
                    text: stored.markdown.clone(),
                })
                .await?;
            return finish(pipeline, emitter, stored, true).await;
        }
    }

    // validating
    emitter.transition(StreamState::Validating);
    emitter.progress(ProgressStep::FetchingMetadata).await?;
    let validation = emitter
        .guard(pipeline.within("validation", ErrorKind::AnalysisFailed, async {
            Ok(pipeline.validator.validate(&repo).await)
        }))
        .await?;
    let validation = match validation {
        Ok(v) => v,
        Err(e) => return emitter.fail(&e).await,
    };
    if !validation.valid {
        let kind = validation.error_kind.unwrap_or(ErrorKind::AnalysisFailed);
        let message = validation
            .message
            .unwrap_or_else(|| kind.default_message().to_string());
        return emitter.fail(&PipelineError::new(kind, message)).await;
    }

    // analyzing
    emitter.transition(StreamState::Analyzing);
    emitter.progress(ProgressStep::AnalyzingStructure).await?;
    let progress = StreamProgress { emitter };
    let analysis = emitter
        .guard(pipeline.within(
            "analysis",
            ErrorKind::AnalysisFailed,
            pipeline.analyzer.analyze(&repo, &request.options, &progress),
        ))
        .await?;
    let record = match analysis {
        Ok(record) => record,
        Err(e) => return emitter.fail(&e).await,
    };

    // generating
    emitter.transition(StreamState::Generating);
    emitter.progress(ProgressStep::AnalyzingArchitecture).await?;
    emitter.progress(ProgressStep::GeneratingSpec).await?;
    let markdown = match generate(pipeline, &record, &request.options, emitter).await? {
        Ok(markdown) => markdown,
        Err(e) => return emitter.fail(&e).await,
    };

    let spec = pipeline.generator.assemble(&record, markdown, Utc::now());
    if emitter.tx.is_closed() {
        return Err(Disconnected);
    }
    let stored = match pipeline
        .cache
        .put_unpublished(&spec, request.owner_id.as_deref())
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            tracing::error!(repo = %repo, error = %e, "failed to persist spec");
            return emitter
                .fail(&PipelineError::analysis(format!("failed to save spec: {}", e)))
                .await;
        }
    };
    log_generated(&repo, &stored);
    deliver(pipeline, emitter, stored).await
}

/// Finish a freshly generated spec. It stays private until `complete` has
/// been handed to the transport, and is dropped if the client leaves first.
async fn deliver(
    pipeline: &Pipeline,
    emitter: &Emitter,
    stored: StoredSpec,
) -> Result<(), Disconnected> {
    let share_id = stored.share_id.clone();
    if let Err(e) = finish(pipeline, emitter, stored, false).await {
        pipeline.cache.discard(&share_id).await;
        return Err(e);
    }
    if let Err(e) = pipeline.cache.publish(&share_id).await {
        tracing::error!(share_id = %share_id, error = %e, "failed to publish spec");
    }
    Ok(())
}

/// Forward fragments as `content` events; return the whole document.
async fn generate(
    pipeline: &Pipeline,
    record: &AnalysisRecord,
    options: &AnalysisOptions,
    emitter: &Emitter,
) -> Result<Result<String, PipelineError>, Disconnected> {
    let mut chunks = pipeline.generator.generate_streaming(record, options);
    let deadline = tokio::time::sleep(pipeline.stage_timeout());
    tokio::pin!(deadline);
    let mut markdown = String::new();

    loop {
        let chunk = tokio::select! {
            _ = emitter.tx.closed() => return Err(Disconnected),
            _ = &mut deadline => {
                tracing::warn!(
                    timeout_secs = pipeline.stage_timeout().as_secs(),
                    "stage timed out"
                );
                return Ok(Err(PipelineError::generation("generation timed out")));
            }
            chunk = chunks.recv() => chunk,
        };
        match chunk {
            Some(Ok(GenerationChunk::Content(text))) => {
                emitter.transition(StreamState::StreamingContent);
                markdown.push_str(&text);
                emitter.emit(ProtocolEvent::Content { text }).await?;
            }
            Some(Ok(GenerationChunk::Done)) => return Ok(Ok(markdown)),
            Some(Err(e)) => return Ok(Err(e)),
            None => {
                return Ok(Err(PipelineError::generation(
                    "generation ended unexpectedly",
                )))
            }
        }
    }
}

async fn finish(
    pipeline: &Pipeline,
    emitter: &Emitter,
    stored: StoredSpec,
    cached: bool,
) -> Result<(), Disconnected> {
    emitter.progress(ProgressStep::Complete).await?;
    emitter.transition(StreamState::Complete);
    let share_url = pipeline.share_url(&stored.share_id);
    emitter
        .emit(ProtocolEvent::Complete(Box::new(CompletePayload {
            success: true,
            spec_id: stored.share_id,
            share_url,
            markdown: stored.markdown,
            metadata: stored.metadata,
            cached,
        })))
        .await
}

fn log_generated(repo: &RepoReference, stored: &StoredSpec) {
    tracing::info!(
        repo = %repo,
        share_id = %stored.share_id,
        bytes = stored.markdown.len(),
        "spec generated"
    );
}
