use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Most recent events retained per pipeline; overflow drops the oldest.
pub const MAX_EVENTS: usize = 100;

// ── Phase state machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Queued,
    Analysis,
    Architecture,
    Scaffold,
    Deploying,
    Development,
    Debugging,
    Qa,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Progress floor for this phase, driving the dashboard progress bar.
    pub fn min_progress(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Analysis => 10,
            Self::Architecture => 25,
            Self::Scaffold => 35,
            Self::Deploying | Self::Development => 40,
            Self::Debugging => 75,
            Self::Qa => 90,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Analysis => "ANALYSIS",
            Self::Architecture => "ARCHITECTURE",
            Self::Scaffold => "SCAFFOLD",
            Self::Deploying => "DEPLOYING",
            Self::Development => "DEVELOPMENT",
            Self::Debugging => "DEBUGGING",
            Self::Qa => "QA",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

// ── Project types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    Static,
    Spa,
    Fullstack,
    Api,
    PythonWorker,
    NodeWorker,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Spa => "spa",
            Self::Fullstack => "fullstack",
            Self::Api => "api",
            Self::PythonWorker => "python-worker",
            Self::NodeWorker => "node-worker",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "spa" => Some(Self::Spa),
            "fullstack" => Some(Self::Fullstack),
            "api" => Some(Self::Api),
            "python-worker" => Some(Self::PythonWorker),
            "node-worker" => Some(Self::NodeWorker),
            _ => None,
        }
    }
}

// ── Agent roles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Analyst,
    Architect,
    Developer,
    Debugger,
    Qa,
}

impl AgentRole {
    pub const ALL: [Self; 5] = [
        Self::Analyst,
        Self::Architect,
        Self::Developer,
        Self::Debugger,
        Self::Qa,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Analyst => "Analyst",
            Self::Architect => "Architect",
            Self::Developer => "Developer",
            Self::Debugger => "Debugger",
            Self::Qa => "QA",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Analyst => "🔍",
            Self::Architect => "📐",
            Self::Developer => "💻",
            Self::Debugger => "🔧",
            Self::Qa => "✅",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Waiting,
    Active,
    Done,
    Error,
}

/// UI/status projection for one role in one pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub role: AgentRole,
    pub emoji: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentView {
    pub fn waiting(role: AgentRole) -> Self {
        Self {
            role,
            emoji: role.emoji().to_string(),
            status: AgentStatus::Waiting,
            current_action: None,
            started_at: None,
            completed_at: None,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Info,
    Success,
    Warning,
    Error,
    Deploy,
}

/// One observable action in a pipeline's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub id: String,
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_role: String,
    pub agent_emoji: String,
    pub action: String,
    #[serde(rename = "type")]
    pub kind: EventType,
}

// ── External resource handles ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubInfo {
    pub owner: String,
    pub repo: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployInfo {
    pub project_id: String,
    pub application_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Base64-encoded media attached to a launch or modify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub media_type: String,
    pub data: String,
}

// ── Pipeline aggregate ───────────────────────────────────────────────────

/// The root aggregate: one end-to-end project-generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub description: String,
    pub phase: Phase,
    pub project_type: ProjectType,
    pub progress: u8,
    pub agents: Vec<AgentView>,
    pub events: Vec<PipelineEvent>,
    pub workspace: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployInfo>,
    pub artifacts: Map<String, Value>,
    pub token_usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Pipeline {
    pub fn new(id: String, name: String, description: String, workspace: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            description,
            phase: Phase::Queued,
            project_type: ProjectType::Unknown,
            progress: 0,
            agents: AgentRole::ALL.iter().map(|r| AgentView::waiting(*r)).collect(),
            events: Vec::new(),
            workspace,
            github: None,
            deploy: None,
            artifacts: Map::new(),
            token_usage: TokenUsage::default(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Append an event, dropping the oldest once the ring is full.
    pub fn push_event(&mut self, event: PipelineEvent) {
        self.events.push(event);
        if self.events.len() > MAX_EVENTS {
            self.events.remove(0);
        }
    }

    /// Raise progress to `value`; progress never decreases within a run.
    pub fn raise_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn agent_mut(&mut self, role: AgentRole) -> Option<&mut AgentView> {
        self.agents.iter_mut().find(|a| a.role == role)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
