use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use atelier_core::error::{PipelineError, Provider, StatusClass};
use atelier_core::types::TokenUsage;
use atelier_core::util::truncate_chars;

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: MediaSource },
    Document { source: MediaSource },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl MediaSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { kind: "base64".into(), media_type: media_type.into(), data: data.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl ApiMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self { role: "user".into(), content }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self { role: "assistant".into(), content }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl From<&Usage> for TokenUsage {
    fn from(u: &Usage) -> Self {
        TokenUsage { input_tokens: u.input_tokens, output_tokens: u.output_tokens }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

// ── Client ───────────────────────────────────────────────────────────────

/// Seam between the runner and the provider, so tests can script replies.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create_message(
        &self,
        system: &str,
        messages: &[ApiMessage],
        tools: &[ToolDef],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, PipelineError>;
}

/// Messages-API client with an ordered model fallback list.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    models: Vec<String>,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            models,
            http: reqwest::Client::new(),
        }
    }

    /// Single request, no tools; returns the concatenated text blocks.
    pub async fn one_shot(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let messages = [ApiMessage::user(vec![ContentBlock::Text { text: user.to_string() }])];
        let reply = self
            .create_message(system, &messages, &[], DEFAULT_MAX_TOKENS, cancel)
            .await?;
        Ok(concat_text(&reply.content))
    }

    async fn request_once(
        &self,
        model: &str,
        system: &str,
        messages: &[ApiMessage],
        tools: &[ToolDef],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, PipelineError> {
        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.to_string());
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)
                .map_err(|e| PipelineError::external(Provider::Llm, StatusClass::Unexpected, e.to_string()))?;
        }

        let request = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            resp = request => resp.map_err(|e| {
                PipelineError::external(Provider::Llm, StatusClass::Transport, e.to_string())
            })?,
        };

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                Provider::Llm,
                StatusClass::from_http(status),
                truncate_chars(&text, 500),
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            parsed = resp.json::<MessageResponse>() => parsed.map_err(|e| {
                PipelineError::external(Provider::Llm, StatusClass::Transport, e.to_string())
            }),
        }
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    /// Try each configured model in order. Auth/payment failures abort the
    /// whole call (further models will not help); anything else falls
    /// through to the next model, and the last error wins.
    async fn create_message(
        &self,
        system: &str,
        messages: &[ApiMessage],
        tools: &[ToolDef],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, PipelineError> {
        let mut last_err = PipelineError::external(
            Provider::Llm,
            StatusClass::Unexpected,
            "no models configured",
        );
        for model in &self.models {
            match self
                .request_once(model, system, messages, tools, max_tokens, cancel)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(e) if e.aborts_fallback() => return Err(e),
                Err(e) => {
                    warn!(model, "model call failed, falling back: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Concatenate text blocks, newline-separated.
pub fn concat_text(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}
