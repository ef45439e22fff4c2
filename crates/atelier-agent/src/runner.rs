use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use atelier_core::agent::{AgentAction, AgentBackend, AgentContext, AgentRequest, AgentResult};
use atelier_core::types::TokenUsage;
use atelier_core::util::truncate_chars;

use crate::llm::{ApiMessage, ContentBlock, MediaSource, ModelClient, DEFAULT_MAX_TOKENS};
use crate::tools::{ToolExecutor, BASH_TIMEOUT};

pub const DEFAULT_MAX_TURNS: u32 = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Chars of a tool result fed back to the model.
const TOOL_RESULT_MAX_CHARS: usize = 10_000;
/// Chars of a tool result shown in the event log.
const EVENT_SUMMARY_MAX_CHARS: usize = 500;

/// Bounded tool-use loop over a [`ModelClient`].
pub struct AgentRunner {
    model: Arc<dyn ModelClient>,
    bash_timeout: Duration,
}

impl AgentRunner {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model, bash_timeout: BASH_TIMEOUT }
    }

    pub fn with_bash_timeout(mut self, timeout: Duration) -> Self {
        self.bash_timeout = timeout;
        self
    }

    fn emit(ctx: &AgentContext, action: AgentAction) {
        if let Some(tx) = &ctx.actions {
            let _ = tx.send(action);
        }
    }

    /// Initial user content: the prompt plus any supported attachments.
    /// Unsupported media types and undecodable payloads are dropped with a
    /// warning action.
    fn initial_content(req: &AgentRequest, ctx: &AgentContext) -> Vec<ContentBlock> {
        use base64::Engine;

        let mut content = vec![ContentBlock::Text { text: req.prompt.clone() }];
        for attachment in &req.attachments {
            if base64::engine::general_purpose::STANDARD
                .decode(&attachment.data)
                .is_err()
            {
                Self::emit(
                    ctx,
                    AgentAction::Warning(format!(
                        "attachment of type {} dropped (invalid base64)",
                        attachment.media_type
                    )),
                );
                continue;
            }
            let source = MediaSource::base64(&attachment.media_type, &attachment.data);
            if attachment.media_type.starts_with("image/") {
                content.push(ContentBlock::Image { source });
            } else if attachment.media_type == "application/pdf" {
                content.push(ContentBlock::Document { source });
            } else {
                Self::emit(
                    ctx,
                    AgentAction::Warning(format!(
                        "attachment of type {} dropped (unsupported)",
                        attachment.media_type
                    )),
                );
            }
        }
        content
    }

    fn describe_input(input: &Value) -> String {
        let summary = input
            .get("path")
            .or_else(|| input.get("command"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        truncate_chars(&summary, 120)
    }

    async fn run_loop(&self, req: AgentRequest, ctx: AgentContext) -> AgentResult {
        let started = Instant::now();
        let executor = ToolExecutor::new(&ctx.workspace).with_bash_timeout(self.bash_timeout);
        let tools = ToolExecutor::definitions(req.allowed_tools.as_deref());

        let max_turns = if req.max_turns == 0 { DEFAULT_MAX_TURNS } else { req.max_turns };
        let timeout = Duration::from_millis(if req.timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            req.timeout_ms
        });

        let mut messages = vec![ApiMessage::user(Self::initial_content(&req, &ctx))];
        let mut usage = TokenUsage::default();
        let mut actions: Vec<String> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut error: Option<String> = None;

        for turn in 0..max_turns {
            if started.elapsed() >= timeout {
                warn!(role = req.role.label(), turn, "agent time budget exhausted");
                break;
            }
            if ctx.cancel.is_cancelled() {
                error = Some("arrêté manuellement".into());
                break;
            }

            let reply = match self
                .model
                .create_message(&req.system_prompt, &messages, &tools, DEFAULT_MAX_TOKENS, &ctx.cancel)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    error = Some(e.to_string());
                    break;
                }
            };
            usage.add(TokenUsage::from(&reply.usage));

            let mut tool_results: Vec<ContentBlock> = Vec::new();
            for block in &reply.content {
                match block {
                    ContentBlock::Text { text } => {
                        texts.push(text.clone());
                        actions.push(truncate_chars(text, 200));
                        Self::emit(&ctx, AgentAction::Text(text.clone()));
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        let summary = Self::describe_input(input);
                        actions.push(format!("{name}: {summary}"));
                        Self::emit(&ctx, AgentAction::ToolUse { name: name.clone(), summary });
                        let raw = executor.execute(name, input, &ctx.cancel).await;
                        Self::emit(
                            &ctx,
                            AgentAction::ToolResult {
                                summary: truncate_chars(&raw, EVENT_SUMMARY_MAX_CHARS),
                            },
                        );
                        tool_results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: truncate_chars(&raw, TOOL_RESULT_MAX_CHARS),
                        });
                    }
                    _ => {}
                }
            }

            let stop_reason = reply.stop_reason.as_deref().unwrap_or_default();
            if stop_reason == "end_turn" {
                break;
            }
            // No tool use and no end_turn: bail out instead of looping on
            // an identical conversation.
            if tool_results.is_empty() {
                break;
            }
            messages.push(ApiMessage::assistant(reply.content));
            messages.push(ApiMessage::user(tool_results));
        }

        if ctx.cancel.is_cancelled() && error.is_none() {
            error = Some("arrêté manuellement".into());
        }

        let success = error.is_none();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = AgentResult {
            success,
            final_result: texts.join("\n"),
            actions,
            error,
            duration_ms,
            token_usage: usage,
        };
        info!(
            role = req.role.label(),
            success,
            duration_ms = result.duration_ms,
            "agent run finished"
        );
        result
    }
}

#[async_trait]
impl AgentBackend for AgentRunner {
    async fn run(&self, req: AgentRequest, ctx: AgentContext) -> Result<AgentResult> {
        Ok(self.run_loop(req, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageResponse, ToolDef, Usage};
    use atelier_core::error::PipelineError;
    use atelier_core::types::{AgentRole, Attachment};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Scripted model: pops one canned reply per call.
    struct Script {
        replies: Mutex<Vec<MessageResponse>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(replies: Vec<MessageResponse>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies), calls: Mutex::new(0) })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ModelClient for Script {
        async fn create_message(
            &self,
            _system: &str,
            _messages: &[ApiMessage],
            _tools: &[ToolDef],
            _max_tokens: u32,
            _cancel: &CancellationToken,
        ) -> Result<MessageResponse, PipelineError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                // Keep replaying a tool call so turn limits are exercised.
                return Ok(tool_reply("bash", json!({"command": "true"})));
            }
            Ok(replies.remove(0))
        }
    }

    fn text_reply(text: &str, stop_reason: &str) -> MessageResponse {
        MessageResponse {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: Some(stop_reason.into()),
            usage: Usage { input_tokens: 10, output_tokens: 5 },
        }
    }

    fn tool_reply(name: &str, input: Value) -> MessageResponse {
        MessageResponse {
            content: vec![ContentBlock::ToolUse { id: "t1".into(), name: name.into(), input }],
            stop_reason: Some("tool_use".into()),
            usage: Usage { input_tokens: 10, output_tokens: 5 },
        }
    }

    fn request(max_turns: u32) -> AgentRequest {
        AgentRequest {
            role: AgentRole::Developer,
            system_prompt: "system".into(),
            prompt: "do the thing".into(),
            attachments: Vec::new(),
            max_turns,
            timeout_ms: 5_000,
            allowed_tools: None,
        }
    }

    fn context(dir: &std::path::Path) -> AgentContext {
        AgentContext {
            workspace: dir.to_path_buf(),
            cancel: CancellationToken::new(),
            actions: None,
        }
    }

    #[tokio::test]
    async fn end_turn_stops_after_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![text_reply("all done", "end_turn")]);
        let runner = AgentRunner::new(script.clone());

        let result = runner.run_loop(request(10), context(dir.path())).await;
        assert!(result.success);
        assert_eq!(result.final_result, "all done");
        assert_eq!(script.calls(), 1);
        assert_eq!(result.token_usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn tool_use_executes_and_feeds_back() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![
            tool_reply("write_file", json!({"path": "index.html", "content": "<h1>hi</h1>"})),
            text_reply("created", "end_turn"),
        ]);
        let runner = AgentRunner::new(script.clone());

        let result = runner.run_loop(request(10), context(dir.path())).await;
        assert!(result.success);
        assert_eq!(script.calls(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("index.html")).unwrap(),
            "<h1>hi</h1>"
        );
        assert!(result.actions.iter().any(|a| a.starts_with("write_file:")));
    }

    #[tokio::test]
    async fn loop_stops_at_max_turns_without_end_turn() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(Vec::new());
        let runner = AgentRunner::new(script.clone());

        let result = runner.run_loop(request(4), context(dir.path())).await;
        assert!(result.success);
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test]
    async fn zero_tool_non_end_turn_reply_exits() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![text_reply("ran out of tokens", "max_tokens")]);
        let runner = AgentRunner::new(script.clone());

        let result = runner.run_loop(request(10), context(dir.path())).await;
        assert!(result.success);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn tool_results_are_truncated_for_the_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(50_000)).unwrap();
        let script = Script::new(vec![
            tool_reply("read_file", json!({"path": "big.txt"})),
            text_reply("read it", "end_turn"),
        ]);
        let runner = AgentRunner::new(script);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut ctx = context(dir.path());
        ctx.actions = Some(tx);
        let result = runner.run_loop(request(10), ctx).await;
        assert!(result.success);

        let mut saw_result = false;
        while let Ok(action) = rx.try_recv() {
            if let AgentAction::ToolResult { summary } = action {
                saw_result = true;
                assert!(summary.chars().count() <= EVENT_SUMMARY_MAX_CHARS + 20);
            }
        }
        assert!(saw_result);
    }

    #[tokio::test]
    async fn unknown_tool_comes_back_as_tool_result() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![
            tool_reply("edit_file", json!({"path": "x"})),
            text_reply("ok", "end_turn"),
        ]);
        let runner = AgentRunner::new(script.clone());
        let result = runner.run_loop(request(10), context(dir.path())).await;
        assert!(result.success);
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn cancellation_yields_failure_with_manual_stop_reason() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![text_reply("never seen", "end_turn")]);
        let runner = AgentRunner::new(script.clone());

        let mut ctx = context(dir.path());
        ctx.cancel = CancellationToken::new();
        ctx.cancel.cancel();
        let result = runner.run_loop(request(10), ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("arrêté manuellement"));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_attachments_are_dropped_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![text_reply("ok", "end_turn")]);
        let runner = AgentRunner::new(script);

        let mut req = request(10);
        req.attachments = vec![
            Attachment { media_type: "image/png".into(), data: "aGk=".into() },
            Attachment { media_type: "video/mp4".into(), data: "aGk=".into() },
        ];
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut ctx = context(dir.path());
        ctx.actions = Some(tx);

        let result = runner.run_loop(req, ctx).await;
        assert!(result.success);
        let mut warned = false;
        while let Ok(action) = rx.try_recv() {
            if matches!(action, AgentAction::Warning(ref w) if w.contains("video/mp4")) {
                warned = true;
            }
        }
        assert!(warned);
    }
}
