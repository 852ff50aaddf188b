//! Text generation backends.
//!
//! - **[`AnthropicGenerator`]**: the Anthropic Messages API. Incremental
//!   output arrives as SSE `content_block_delta` events.
//! - **[`OpenAiGenerator`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint. Incremental output arrives as `data:` lines ending with
//!   `data: [DONE]`.
//! - **[`DisabledGenerator`]**: every call fails. Lets the server run (and
//!   serve cached/shared specs) without model credentials.
//!
//! # Retry strategy
//!
//! Before a response starts:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - other 4xx → fail immediately
//! - transport error → retry
//!
//! Once a stream has started, errors are surfaced as-is; a half-delivered
//! document cannot be resumed.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::traits::{FragmentStream, GenerationError, GenerationRequest, TextGenerator};

const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Build the backend named in `[llm].provider`.
///
/// # Errors
///
/// Returns an error for unknown providers, a missing model, or a missing
/// API key environment variable.
pub fn create_generator(config: &LlmConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

fn api_key(config: &LlmConfig) -> anyhow::Result<String> {
    let name = config.key_env();
    match std::env::var(name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => anyhow::bail!("{} environment variable not set", name),
    }
}

fn http_client(config: &LlmConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ Shared HTTP plumbing ============

/// Send the request built by `build`, retrying on 429/5xx and transport
/// errors. Returns the first successful response.
async fn send_with_retry<F>(
    backend: &str,
    max_retries: u32,
    build: F,
) -> Result<reqwest::Response, GenerationError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(backend, attempt, ?delay, "retrying model request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                let err = error_for_status(status.as_u16(), &body);
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(backend, status = status.as_u16(), "model request failed; will retry");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                tracing::warn!(backend, error = %e, "model request failed; will retry");
                last_err = Some(if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::Transport(e.to_string())
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GenerationError::Transport("no attempts made".into())))
}

fn error_for_status(status: u16, body: &str) -> GenerationError {
    if status == 429 {
        return GenerationError::RateLimited;
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    GenerationError::Api { status, message }
}

/// Split a streaming HTTP body into SSE `data:` payloads.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks decode correctly. `event:`, `id:` and
/// comment lines are skipped.
fn sse_data(response: reqwest::Response) -> FragmentStream {
    let stream = async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        if let Some(data) = data_payload(&line) {
                            yield Ok(data.to_string());
                        }
                    }
                }
                Err(e) => {
                    yield Err(GenerationError::Transport(e.to_string()));
                    return;
                }
            }
        }

        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer);
            if let Some(data) = data_payload(&line) {
                yield Ok(data.to_string());
            }
        }
    };
    Box::pin(stream)
}

fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:").map(str::trim_start)
}

/// What one decoded SSE payload means for the fragment stream.
#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Text(String),
    Skip,
    Done,
}

/// Turn `data:` payloads into fragments using a backend-specific decoder.
///
/// The stream only ends cleanly on the backend's completion marker. A body
/// that closes before it is reported as an error, since the document is
/// cut off.
fn fragments<F>(mut data: FragmentStream, decode: F) -> FragmentStream
where
    F: Fn(&str) -> Result<StreamStep, GenerationError> + Send + 'static,
{
    let stream = async_stream::stream! {
        while let Some(item) = data.next().await {
            match item.and_then(|payload| decode(&payload)) {
                Ok(StreamStep::Text(text)) => yield Ok(text),
                Ok(StreamStep::Skip) => {}
                Ok(StreamStep::Done) => return,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Err(GenerationError::Decode(
            "stream ended before completion marker".into(),
        ));
    };
    Box::pin(stream)
}

// ============ Anthropic ============

pub struct AnthropicGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl AnthropicGenerator {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for anthropic provider"))?;
        Ok(Self {
            http: http_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE.to_string()),
            api_key: api_key(config)?,
            model,
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        send_with_retry("anthropic", self.max_retries, || {
            self.http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(body)
        })
        .await
    }
}

fn anthropic_text(json: &Value) -> Result<String, GenerationError> {
    let blocks = json
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::Decode("missing content array".into()))?;
    Ok(blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect())
}

fn anthropic_step(payload: &str) -> Result<StreamStep, GenerationError> {
    let event: Value = serde_json::from_str(payload)
        .map_err(|e| GenerationError::Decode(format!("bad stream event: {}", e)))?;
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map(|t| StreamStep::Text(t.to_string()))
            .unwrap_or(StreamStep::Skip)),
        Some("message_stop") => Ok(StreamStep::Done),
        Some("error") => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string();
            Err(GenerationError::Api {
                status: 200,
                message,
            })
        }
        _ => Ok(StreamStep::Skip),
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self.post(&self.body(request, false)).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        anthropic_text(&json)
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let response = self.post(&self.body(request, true)).await?;
        Ok(fragments(sse_data(response), anthropic_step))
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        Ok(Self {
            http: http_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE.to_string()),
            api_key: api_key(config)?,
            model,
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        send_with_retry("openai", self.max_retries, || {
            self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
        })
        .await
    }
}

fn openai_text(json: &Value) -> Result<String, GenerationError> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Decode("missing choices[0].message.content".into()))
}

fn openai_step(payload: &str) -> Result<StreamStep, GenerationError> {
    if payload.trim() == "[DONE]" {
        return Ok(StreamStep::Done);
    }
    let chunk: Value = serde_json::from_str(payload)
        .map_err(|e| GenerationError::Decode(format!("bad stream chunk: {}", e)))?;
    if let Some(message) = chunk.pointer("/error/message").and_then(Value::as_str) {
        return Err(GenerationError::Api {
            status: 200,
            message: message.to_string(),
        });
    }
    Ok(chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(|t| StreamStep::Text(t.to_string()))
        .unwrap_or(StreamStep::Skip))
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self.post(&self.body(request, false)).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        openai_text(&json)
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let response = self.post(&self.body(request, true)).await?;
        Ok(fragments(sse_data(response), openai_step))
    }
}

// ============ Disabled ============

/// Backend used when `[llm].provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }

    async fn stream(&self, _request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_payload_strips_prefix() {
        assert_eq!(data_payload("data: {\"a\":1}\r\n"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: content_block_delta"), None);
        assert_eq!(data_payload(": keep-alive"), None);
    }

    #[test]
    fn anthropic_events() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#;
        assert_eq!(anthropic_step(delta).unwrap(), StreamStep::Text("Hel".into()));
        assert_eq!(
            anthropic_step(r#"{"type":"message_start","message":{}}"#).unwrap(),
            StreamStep::Skip
        );
        assert_eq!(
            anthropic_step(r#"{"type":"message_stop"}"#).unwrap(),
            StreamStep::Done
        );
        let err = anthropic_step(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(matches!(err, GenerationError::Api { ref message, .. } if message == "Overloaded"));
    }

    #[test]
    fn anthropic_complete_joins_text_blocks() {
        let json = json!({"content": [
            {"type": "text", "text": "# Spec\n"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "body"}
        ]});
        assert_eq!(anthropic_text(&json).unwrap(), "# Spec\nbody");
        assert!(anthropic_text(&json!({})).is_err());
    }

    #[test]
    fn openai_chunks() {
        let chunk = r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#;
        assert_eq!(openai_step(chunk).unwrap(), StreamStep::Text("lo".into()));
        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(openai_step(role_only).unwrap(), StreamStep::Skip);
        assert_eq!(openai_step("[DONE]").unwrap(), StreamStep::Done);
        assert!(openai_step("not json").is_err());
    }

    fn payloads(items: &[&str]) -> FragmentStream {
        let items: Vec<Result<String, GenerationError>> =
            items.iter().map(|s| Ok(s.to_string())).collect();
        Box::pin(futures_util::stream::iter(items))
    }

    async fn drain(mut stream: FragmentStream) -> Vec<Result<String, GenerationError>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn anthropic_stream_ends_on_message_stop() {
        let stream = fragments(
            payloads(&[
                r#"{"type":"message_start","message":{}}"#,
                r##"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"# Spec"}}"##,
                r#"{"type":"message_stop"}"#,
            ]),
            anthropic_step,
        );
        assert_eq!(drain(stream).await, vec![Ok("# Spec".to_string())]);
    }

    #[tokio::test]
    async fn anthropic_stream_without_message_stop_is_an_error() {
        let stream = fragments(
            payloads(&[
                r###"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"## Overview\nHalf a sen"}}"###,
            ]),
            anthropic_step,
        );
        let items = drain(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(GenerationError::Decode(_))));
    }

    #[tokio::test]
    async fn openai_stream_without_done_is_an_error() {
        let stream = fragments(
            payloads(&[r#"{"choices":[{"index":0,"delta":{"content":"partial"}}]}"#]),
            openai_step,
        );
        let items = drain(stream).await;
        assert_eq!(items[0], Ok("partial".to_string()));
        assert!(matches!(items.last(), Some(Err(GenerationError::Decode(_)))));

        let complete = fragments(
            payloads(&[r#"{"choices":[{"index":0,"delta":{"content":"whole"}}]}"#, "[DONE]"]),
            openai_step,
        );
        assert_eq!(drain(complete).await, vec![Ok("whole".to_string())]);
    }

    async fn serve_messages(body: &'static str) -> String {
        use axum::{routing::post, Router};

        let app = Router::new().route(
            "/v1/messages",
            post(move || async move { ([("content-type", "text/event-stream")], body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn anthropic_at(base_url: String) -> AnthropicGenerator {
        AnthropicGenerator {
            http: reqwest::Client::new(),
            base_url,
            api_key: "test-key".into(),
            model: "test-model".into(),
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn anthropic_body_closed_early_fails_the_stream() {
        let base = serve_messages(
            "event: content_block_delta\n\
             data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Half a sen\"}}\n\n",
        )
        .await;
        let request = GenerationRequest {
            system: String::new(),
            prompt: "x".into(),
            max_tokens: 10,
        };
        let stream = anthropic_at(base).stream(&request).await.unwrap();
        let items = drain(stream).await;
        assert_eq!(items[0], Ok("Half a sen".to_string()));
        assert!(matches!(items.last(), Some(Err(GenerationError::Decode(_)))));
    }

    #[tokio::test]
    async fn anthropic_body_with_message_stop_completes() {
        let base = serve_messages(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"# Spec\"}}\n\n\
             data: {\"type\":\"message_stop\"}\n\n",
        )
        .await;
        let request = GenerationRequest {
            system: String::new(),
            prompt: "x".into(),
            max_tokens: 10,
        };
        let stream = anthropic_at(base).stream(&request).await.unwrap();
        assert_eq!(drain(stream).await, vec![Ok("# Spec".to_string())]);
    }

    #[test]
    fn status_errors() {
        assert_eq!(error_for_status(429, ""), GenerationError::RateLimited);
        assert_eq!(
            error_for_status(400, r#"{"error":{"message":"bad model"}}"#),
            GenerationError::Api {
                status: 400,
                message: "bad model".into()
            }
        );
    }

    #[tokio::test]
    async fn disabled_backend_always_fails() {
        let request = GenerationRequest {
            system: String::new(),
            prompt: "x".into(),
            max_tokens: 10,
        };
        assert_eq!(
            DisabledGenerator.complete(&request).await.unwrap_err(),
            GenerationError::Disabled
        );
        assert!(DisabledGenerator.stream(&request).await.is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "magic".into(),
            ..LlmConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
