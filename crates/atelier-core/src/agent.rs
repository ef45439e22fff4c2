use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{AgentRole, Attachment, TokenUsage};

/// Names of the four tools exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    ReadFile,
    WriteFile,
    ListDir,
    Bash,
}

impl ToolName {
    pub const ALL: [Self; 4] = [Self::ReadFile, Self::WriteFile, Self::ListDir, Self::Bash];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListDir => "list_dir",
            Self::Bash => "bash",
        }
    }
}

/// One invocation of the bounded tool-use loop.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub system_prompt: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub max_turns: u32,
    pub timeout_ms: u64,
    /// None exposes the full tool set; empty disables tools entirely.
    pub allowed_tools: Option<Vec<ToolName>>,
}

/// Observable step emitted while an agent runs.
#[derive(Debug, Clone)]
pub enum AgentAction {
    Text(String),
    ToolUse { name: String, summary: String },
    ToolResult { summary: String },
    Warning(String),
}

/// Runtime context for one agent invocation.
pub struct AgentContext {
    /// Workspace the tool executor is clamped to.
    pub workspace: PathBuf,
    pub cancel: CancellationToken,
    /// Live per-action feed, if anyone is listening.
    pub actions: Option<mpsc::UnboundedSender<AgentAction>>,
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub actions: Vec<String>,
    /// Concatenation of the reply's text blocks.
    pub final_result: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, req: AgentRequest, ctx: AgentContext) -> Result<AgentResult>;
}
