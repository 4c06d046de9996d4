use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Credentials, RuntimeConfig};
use crate::streaming::{CompletionStream, SseDecoder};

/// Text generation backend used by the agent.
///
/// Failures are returned as `Err`, never folded into the text.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream>;
}

pub fn build_model(cfg: &RuntimeConfig, creds: &Credentials) -> Result<Arc<dyn CompletionModel>> {
    let api_key = creds
        .gemini_api_key
        .clone()
        .context("GEMINI_API_KEY is required to start the agent")?;
    let model = GeminiModel::new(
        api_key,
        cfg.model.clone(),
        cfg.gemini_base_url.clone(),
        Duration::from_secs(cfg.model_timeout_secs),
    )?;
    Ok(Arc::new(model))
}

pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(&self, url: &str, prompt: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GeminiRequest::from_prompt(prompt))
            .send()
            .await
            .with_context(|| format!("Gemini request to model '{}' failed", self.model))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model = %self.model, status = %status, "Gemini returned an error status");
            return Err(anyhow::anyhow!(
                "Gemini API returned HTTP {}: {}",
                status,
                api_error_message(&body)
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Gemini generateContent");
        let response = self.post(&self.endpoint("generateContent"), prompt).await?;
        let payload = response
            .json::<Value>()
            .await
            .context("failed to decode Gemini response body")?;
        response_text(&payload)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Gemini streamGenerateContent");
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, prompt).await?;

        let state = SseFragmentState {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };
        let fragments = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(payload) = state.pending.pop_front() {
                    match chunk_text(&payload) {
                        Ok(text) if text.is_empty() => continue,
                        Ok(text) => return Some((Ok(text), state)),
                        Err(err) => {
                            state.pending.clear();
                            state.done = true;
                            return Some((Err(err), state));
                        }
                    }
                }
                if state.done {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(bytes)) => {
                        let payloads = state.decoder.push(&bytes);
                        state.pending.extend(payloads);
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        let err = anyhow::Error::new(err).context("Gemini stream interrupted");
                        return Some((Err(err), state));
                    }
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        });

        Ok(CompletionStream::new(Box::pin(fragments)))
    }
}

struct SseFragmentState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

impl GeminiRequest {
    fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

fn candidate_text(response: &GeminiResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default()
}

fn parse_response(payload: &Value) -> Result<GeminiResponse> {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(anyhow::anyhow!("Gemini API error: {message}"));
    }
    let response = GeminiResponse::deserialize(payload)
        .context("unexpected Gemini response shape")?;
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(anyhow::anyhow!("Gemini blocked the prompt ({reason})"));
    }
    Ok(response)
}

/// Text of a complete `generateContent` response.
pub fn response_text(payload: &Value) -> Result<String> {
    let response = parse_response(payload)?;
    if response.candidates.is_empty() {
        return Err(anyhow::anyhow!("Gemini returned no candidates"));
    }
    Ok(candidate_text(&response))
}

/// Text carried by one `streamGenerateContent` SSE payload; empty when the
/// chunk only carries metadata.
pub fn chunk_text(data: &str) -> Result<String> {
    let payload = serde_json::from_str::<Value>(data).context("malformed Gemini stream chunk")?;
    let response = parse_response(&payload)?;
    Ok(candidate_text(&response))
}

fn api_error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    truncate_chars(&message, 500)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
