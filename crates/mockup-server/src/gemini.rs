//! Streaming client for the Gemini text API.
//!
//! Generations go through the [`TextGenerator`] trait so the chat pipeline
//! can be driven by a scripted generator in tests. [`GeminiClient`] talks
//! to `models/{model}:streamGenerateContent?alt=sse` and turns the server
//! sent events into [`GenerationChunk`]s: text pieces in arrival order,
//! then exactly one usage report once the stream ends cleanly.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use mockup_shared::cost::TokenUsage;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("no API key configured for the text service")]
    MissingApiKey,
    #[error("network error: {0}")]
    Transport(String),
    #[error("timed out opening the text stream")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed stream event: {0}")]
    Decode(String),
    #[error("text service error: {0}")]
    Upstream(String),
}

impl GenerationError {
    /// Model missing, quota exhausted or overloaded: worth one attempt on
    /// the fallback model.
    pub fn should_fall_back(&self) -> bool {
        matches!(self, Self::Http { status, .. } if matches!(*status, 404 | 429 | 503))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    Text(String),
    Usage(TokenUsage),
}

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<GenerationChunk, GenerationError>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a streamed generation. Errors before the first byte are
    /// returned here; later ones arrive as stream items.
    async fn open(&self, conversation: Vec<Content>) -> Result<ChunkStream, GenerationError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: "user", parts }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model",
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData(Blob {
            mime_type: mime_type.into(),
            data: data.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 64_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEvent {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    /// Reasoning summaries are not part of the answer.
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Splits a byte stream into SSE `data` payloads. Events may be split
/// across any number of network reads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the payload of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some((end, sep_len)) = find_event_end(&self.buf) {
            let event: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
            if let Some(data) = event_data(&event) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a final event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        event_data(&rest)
    }
}

fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn event_data(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

/// Turn one event payload into chunks, remembering the latest usage.
fn decode_event(
    payload: &str,
    usage: &mut TokenUsage,
) -> Result<Vec<GenerationChunk>, GenerationError> {
    let event: StreamEvent =
        serde_json::from_str(payload).map_err(|e| GenerationError::Decode(e.to_string()))?;

    if let Some(err) = event.error {
        return Err(GenerationError::Upstream(err.message));
    }

    if let Some(meta) = event.usage_metadata {
        *usage = TokenUsage::new(
            meta.prompt_token_count.unwrap_or(0),
            meta.candidates_token_count.unwrap_or(0),
        );
    }

    Ok(event
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .filter(|t| !t.is_empty())
        .map(GenerationChunk::Text)
        .collect())
}

struct SseState {
    body: BoxStream<'static, Result<Bytes, GenerationError>>,
    decoder: SseDecoder,
    queued: VecDeque<Result<GenerationChunk, GenerationError>>,
    usage: TokenUsage,
    finished: bool,
}

impl SseState {
    fn enqueue(&mut self, payload: &str) {
        match decode_event(payload, &mut self.usage) {
            Ok(chunks) => self.queued.extend(chunks.into_iter().map(Ok)),
            Err(e) => {
                self.queued.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Adapt a raw SSE byte stream into generation chunks.
pub fn chunk_stream(
    body: impl Stream<Item = Result<Bytes, GenerationError>> + Send + 'static,
) -> ChunkStream {
    let state = SseState {
        body: body.boxed(),
        decoder: SseDecoder::new(),
        queued: VecDeque::new(),
        usage: TokenUsage::default(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queued.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for payload in st.decoder.push(&bytes) {
                        if st.finished {
                            break;
                        }
                        st.enqueue(&payload);
                    }
                }
                Some(Err(e)) => {
                    st.queued.push_back(Err(e));
                    st.finished = true;
                }
                None => {
                    if let Some(payload) = st.decoder.finish() {
                        st.enqueue(&payload);
                    }
                    if !st.finished {
                        st.queued.push_back(Ok(GenerationChunk::Usage(st.usage)));
                        st.finished = true;
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    fallback_model: String,
}

impl GeminiClient {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Budget for receiving response headers; the body may stream for longer.
    const OPEN_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn from_config(config: &ServerConfig) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .user_agent(concat!("mockup-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_api_base.clone(),
            model: config.gemini_model.clone(),
            fallback_model: config.gemini_fallback_model.clone(),
        })
    }

    async fn open_model(
        &self,
        model: &str,
        conversation: &[Content],
    ) -> Result<ChunkStream, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::MissingApiKey)?;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let request = GenerateRequest {
            contents: conversation,
            generation_config: GenerationConfig::default(),
        };

        let send = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send();
        let res = tokio::time::timeout(Self::OPEN_TIMEOUT, send)
            .await
            .map_err(|_| GenerationError::Timeout)?
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => {
                debug!(model, "text stream opened");
                let body = res
                    .bytes_stream()
                    .map(|r| r.map_err(map_reqwest_error));
                Ok(chunk_stream(body))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GenerationError::Http {
                status: res.status().as_u16(),
                body: "the text service rejected the API key".into(),
            }),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(GenerationError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn open(&self, conversation: Vec<Content>) -> Result<ChunkStream, GenerationError> {
        match self.open_model(&self.model, &conversation).await {
            Err(e) if e.should_fall_back() && self.fallback_model != self.model => {
                warn!(
                    model = %self.model,
                    fallback = %self.fallback_model,
                    error = %e,
                    "primary model unavailable, retrying on fallback"
                );
                self.open_model(&self.fallback_model, &conversation).await
            }
            other => other,
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> String {
        format!("data: {json}\r\n\r\n")
    }

    async fn collect(raw: Vec<&'static str>) -> Vec<Result<GenerationChunk, GenerationError>> {
        let body = futures::stream::iter(raw.into_iter().map(|s| Ok(Bytes::from(s))));
        chunk_stream(body).collect().await
    }

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\n\ndata: 2\n"), vec!["{\"a\":1}"]);
        assert_eq!(decoder.push(b"\n: comment\n\n"), vec!["2"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: last").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("last"));
    }

    #[test]
    fn test_request_wire_format() {
        let contents = vec![
            Content::user(vec![Part::text("hi"), Part::image("image/png", "AAAA")]),
            Content::model("ok"),
        ];
        let json = serde_json::to_value(GenerateRequest {
            contents: &contents,
            generation_config: GenerationConfig::default(),
        })
        .unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 64_000);
    }

    #[tokio::test]
    async fn test_stream_yields_text_then_usage() {
        let first = event(r#"{"candidates":[{"content":{"parts":[{"text":"```html\n<div>"}]}}]}"#);
        let second = event(
            r#"{"candidates":[{"content":{"parts":[{"text":"plan","thought":true},{"text":"A</div>"}]}}],"usageMetadata":{"promptTokenCount":1200,"candidatesTokenCount":800}}"#,
        );
        let raw: &'static str = Box::leak(format!("{first}{second}").into_boxed_str());
        let (a, b) = raw.split_at(17);

        let items = collect(vec![a, b]).await;
        let items: Vec<GenerationChunk> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![
                GenerationChunk::Text("```html\n<div>".into()),
                GenerationChunk::Text("A</div>".into()),
                GenerationChunk::Usage(TokenUsage::new(1200, 800)),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_usage_reports_zero() {
        let items = collect(vec!["data: {\"candidates\":[]}\n\n"]).await;
        assert_eq!(
            items.last().cloned().map(Result::unwrap),
            Some(GenerationChunk::Usage(TokenUsage::default()))
        );
    }

    #[tokio::test]
    async fn test_error_event_ends_stream_without_usage() {
        let items = collect(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"y\"}]}}]}\n\n",
        ])
        .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(GenerationError::Upstream(m)) if m == "overloaded"));
    }

    #[tokio::test]
    async fn test_garbage_event_is_a_decode_error() {
        let items = collect(vec!["data: not json\n\n"]).await;
        assert!(matches!(items.as_slice(), [Err(GenerationError::Decode(_))]));
    }

    #[test]
    fn test_fallback_statuses() {
        let http = |status| GenerationError::Http {
            status,
            body: String::new(),
        };
        assert!(http(404).should_fall_back());
        assert!(http(429).should_fall_back());
        assert!(http(503).should_fall_back());
        assert!(!http(400).should_fall_back());
        assert!(!GenerationError::Timeout.should_fall_back());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_request() {
        let client = GeminiClient::from_config(&ServerConfig::default()).unwrap();
        let err = client.open(vec![Content::model("x")]).await.err();
        assert!(matches!(err, Some(GenerationError::MissingApiKey)));
    }
}
