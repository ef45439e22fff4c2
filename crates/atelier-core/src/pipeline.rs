use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agent::AgentBackend;
use crate::config::Config;
use crate::deploy::DeployHost;
use crate::error::{chain_is_cancelled, PipelineError};
use crate::events::EventBus;
use crate::repo::RepoHost;
use crate::skills::SkillsCatalog;
use crate::store::Store;
use crate::types::{
    AgentRole, AgentStatus, EventType, Phase, Pipeline, PipelineEvent, TokenUsage,
};
use crate::util::{short_id, slugify};

pub use crate::types::Attachment;

/// Error when the token was cancelled; checked at every suspension point.
pub(crate) fn ensure_active(token: &CancellationToken) -> Result<(), PipelineError> {
    if token.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep that returns early with `Cancelled` when the token fires.
pub(crate) async fn sleep_cancellable(
    token: &CancellationToken,
    ms: u64,
) -> Result<(), PipelineError> {
    tokio::select! {
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        () = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

/// Pipeline registry and scheduler. One background worker per pipeline;
/// adapters are injected at construction and shared by all workers.
pub struct Orchestrator {
    pub config: Arc<Config>,
    store: Store,
    registry: Mutex<HashMap<String, Pipeline>>,
    running: Mutex<HashSet<String>>,
    pub(crate) cancels: Mutex<HashMap<String, CancellationToken>>,
    events: EventBus,
    pub(crate) agent: Arc<dyn AgentBackend>,
    pub(crate) repo: Option<Arc<dyn RepoHost>>,
    pub(crate) deploy: Option<Arc<dyn DeployHost>>,
    pub(crate) skills: Arc<dyn SkillsCatalog>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        store: Store,
        agent: Arc<dyn AgentBackend>,
        repo: Option<Arc<dyn RepoHost>>,
        deploy: Option<Arc<dyn DeployHost>>,
        skills: Arc<dyn SkillsCatalog>,
    ) -> Self {
        Self {
            config,
            store,
            registry: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            cancels: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            agent,
            repo,
            deploy,
            skills,
        }
    }

    /// Repopulate the registry from disk. In-flight workers from a previous
    /// process are not resumed; their pipelines keep the persisted phase.
    pub async fn restore(&self) -> Result<usize> {
        let loaded = self.store.load()?;
        let count = loaded.len();
        *self.registry.lock().await = loaded;
        Ok(count)
    }

    // ── Public contract ──────────────────────────────────────────────────

    /// Create a pipeline and start its worker. Returns immediately.
    pub async fn launch_idea(
        self: &Arc<Self>,
        description: &str,
        name: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Pipeline> {
        let id = short_id();
        let slug = slugify(name.as_deref().unwrap_or(description), 30);
        let workspace = self.config.workspace_root.join(&id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(PipelineError::Workspace)?;

        let pipeline = Pipeline::new(id.clone(), slug, description.to_string(), workspace);
        {
            let mut registry = self.registry.lock().await;
            registry.insert(id.clone(), pipeline);
            self.store.save(&registry).context("persist new pipeline")?;
        }
        self.add_event(&id, "System", "⚙️", "Pipeline launched", EventType::Info)
            .await;
        info!(pipeline_id = %id, "launched pipeline");

        let orch = Arc::clone(self);
        let worker_id = id.clone();
        tokio::spawn(async move {
            orch.execute_pipeline(worker_id, attachments).await;
        });

        self.get_pipeline(&id)
            .await
            .ok_or_else(|| PipelineError::UnknownPipeline(id).into())
    }

    pub async fn list_pipelines(&self) -> Vec<Pipeline> {
        let registry = self.registry.lock().await;
        let mut all: Vec<Pipeline> = registry.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub async fn get_pipeline(&self, id: &str) -> Option<Pipeline> {
        self.registry.lock().await.get(id).cloned()
    }

    /// Signal cancellation and mark the pipeline failed. Idempotent:
    /// terminal pipelines are left untouched.
    pub async fn kill_pipeline(&self, id: &str) -> Result<()> {
        if let Some(token) = self.cancels.lock().await.get(id) {
            token.cancel();
        }

        let event = {
            let mut registry = self.registry.lock().await;
            let pipeline = registry
                .get_mut(id)
                .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()))?;
            if pipeline.phase.is_terminal() {
                return Ok(());
            }
            let now = Utc::now();
            pipeline.phase = Phase::Failed;
            pipeline.error = Some("arrêté manuellement".to_string());
            for agent in &mut pipeline.agents {
                if agent.status == AgentStatus::Active {
                    agent.status = AgentStatus::Error;
                    agent.completed_at = Some(now);
                }
            }
            pipeline.updated_at = now;
            let event = PipelineEvent {
                id: short_id(),
                pipeline_id: id.to_string(),
                timestamp: now,
                agent_role: "System".into(),
                agent_emoji: "⚙️".into(),
                action: "Pipeline arrêté manuellement".into(),
                kind: EventType::Error,
            };
            pipeline.push_event(event.clone());
            self.store.save(&registry).context("persist kill")?;
            event
        };
        self.events.publish(&event);
        info!(pipeline_id = %id, "pipeline killed");
        Ok(())
    }

    /// Kill, then remove the pipeline from the registry and the store.
    /// The workspace directory is deleted best-effort.
    pub async fn delete_pipeline(&self, id: &str) -> Result<()> {
        let _ = self.kill_pipeline(id).await;
        self.cancels.lock().await.remove(id);

        let workspace = {
            let mut registry = self.registry.lock().await;
            let pipeline = registry
                .remove(id)
                .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()))?;
            self.store.save(&registry).context("persist delete")?;
            pipeline.workspace
        };
        tokio::fs::remove_dir_all(&workspace).await.ok();
        info!(pipeline_id = %id, "pipeline deleted");
        Ok(())
    }

    /// Re-enter a terminal pipeline with new instructions.
    pub async fn modify_pipeline(
        self: &Arc<Self>,
        id: &str,
        instructions: &str,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        {
            let running = self.running.lock().await;
            let mut registry = self.registry.lock().await;
            let pipeline = registry
                .get_mut(id)
                .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()))?;
            if !pipeline.phase.is_terminal() || running.contains(id) {
                return Err(PipelineError::NotTerminal(id.to_string()).into());
            }
            pipeline.artifacts.insert(
                "pendingModification".into(),
                json!({ "instructions": instructions }),
            );
            pipeline.updated_at = Utc::now();
            self.store.save(&registry).context("persist modification")?;
        }

        let orch = Arc::clone(self);
        let worker_id = id.to_string();
        tokio::spawn(async move {
            orch.execute_modification(worker_id, attachments).await;
        });
        Ok(())
    }

    /// Live event stream, optionally filtered to one pipeline.
    pub fn subscribe(&self, pipeline_id: Option<String>) -> impl Stream<Item = PipelineEvent> + Unpin {
        self.events.subscribe_filtered(pipeline_id)
    }

    // ── Workers ──────────────────────────────────────────────────────────

    /// Worker entry point for a freshly launched pipeline. A second call
    /// for the same id while the first is running is a no-op.
    pub async fn execute_pipeline(self: Arc<Self>, id: String, attachments: Vec<Attachment>) {
        if !self.try_start(&id).await {
            return;
        }
        let token = self.register_cancel(&id).await;
        let result = self.run_phases(&id, &token, attachments).await;
        self.finish_worker(&id, &token, result).await;
    }

    /// Worker entry point for the modify path.
    pub async fn execute_modification(self: Arc<Self>, id: String, attachments: Vec<Attachment>) {
        if !self.try_start(&id).await {
            return;
        }
        let token = self.register_cancel(&id).await;
        let result = self.run_modification(&id, &token, attachments).await;
        self.finish_worker(&id, &token, result).await;
    }

    async fn run_phases(
        self: &Arc<Self>,
        id: &str,
        token: &CancellationToken,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        self.run_analysis(id, token, attachments).await?;
        self.run_architecture(id, token).await?;
        self.run_scaffold(id, token).await?;
        self.run_development(id, token).await?;
        self.run_qa(id, token).await?;
        self.complete(id).await?;
        Ok(())
    }

    async fn try_start(&self, id: &str) -> bool {
        let mut running = self.running.lock().await;
        if running.contains(id) {
            return false;
        }
        running.insert(id.to_string());
        true
    }

    async fn register_cancel(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancels.lock().await.insert(id.to_string(), token.clone());
        token
    }

    async fn finish_worker(&self, id: &str, token: &CancellationToken, result: Result<()>) {
        if let Err(err) = result {
            let cancelled = token.is_cancelled() || chain_is_cancelled(&err);
            let message = if cancelled {
                "arrêté manuellement".to_string()
            } else {
                err.to_string()
            };

            let mut published = None;
            {
                let mut registry = self.registry.lock().await;
                if let Some(pipeline) = registry.get_mut(id) {
                    // kill_pipeline may already have marked it failed.
                    if !pipeline.phase.is_terminal() {
                        let now = Utc::now();
                        pipeline.phase = Phase::Failed;
                        pipeline.error = Some(message.clone());
                        for agent in &mut pipeline.agents {
                            if agent.status == AgentStatus::Active {
                                agent.status = AgentStatus::Error;
                                agent.completed_at = Some(now);
                            }
                        }
                        pipeline.updated_at = now;
                        let event = PipelineEvent {
                            id: short_id(),
                            pipeline_id: id.to_string(),
                            timestamp: now,
                            agent_role: "System".into(),
                            agent_emoji: "⚙️".into(),
                            action: format!("Pipeline failed: {message}"),
                            kind: EventType::Error,
                        };
                        pipeline.push_event(event.clone());
                        published = Some(event);
                    }
                }
                if published.is_some() {
                    if let Err(e) = self.store.save(&registry) {
                        error!(pipeline_id = %id, "persist failure state: {e}");
                    }
                }
            }
            if let Some(event) = published {
                self.events.publish(&event);
                error!(pipeline_id = %id, "pipeline failed: {message}");
            }
        }

        self.running.lock().await.remove(id);
        self.cancels.lock().await.remove(id);
    }

    // ── Shared mutation helpers ──────────────────────────────────────────

    pub(crate) async fn snapshot(&self, id: &str) -> Result<Pipeline> {
        self.get_pipeline(id)
            .await
            .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()).into())
    }

    /// Mutate one pipeline under the registry lock and persist the result.
    pub(crate) async fn with_pipeline<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Pipeline) -> T,
    ) -> Result<T> {
        let mut registry = self.registry.lock().await;
        let pipeline = registry
            .get_mut(id)
            .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()))?;
        let out = f(pipeline);
        pipeline.updated_at = Utc::now();
        self.store.save(&registry).context("persist pipelines")?;
        Ok(out)
    }

    /// Append to the pipeline's event ring and publish to subscribers.
    /// Events are not individually persisted; losing in-flight events
    /// between two snapshots is acceptable.
    pub(crate) async fn add_event(
        &self,
        id: &str,
        role: &str,
        emoji: &str,
        action: impl Into<String>,
        kind: EventType,
    ) {
        let event = PipelineEvent {
            id: short_id(),
            pipeline_id: id.to_string(),
            timestamp: Utc::now(),
            agent_role: role.to_string(),
            agent_emoji: emoji.to_string(),
            action: action.into(),
            kind,
        };
        {
            let mut registry = self.registry.lock().await;
            if let Some(pipeline) = registry.get_mut(id) {
                pipeline.push_event(event.clone());
                pipeline.updated_at = event.timestamp;
            }
        }
        self.events.publish(&event);
    }

    pub(crate) async fn set_phase(&self, id: &str, phase: Phase) -> Result<()> {
        self.with_pipeline(id, |pipeline| {
            pipeline.phase = phase;
            pipeline.raise_progress(phase.min_progress());
        })
        .await
    }

    pub(crate) async fn agent_update(
        &self,
        id: &str,
        role: AgentRole,
        status: AgentStatus,
        action: Option<String>,
    ) -> Result<()> {
        self.with_pipeline(id, |pipeline| {
            if let Some(agent) = pipeline.agent_mut(role) {
                let now = Utc::now();
                if status == AgentStatus::Active && agent.started_at.is_none() {
                    agent.started_at = Some(now);
                }
                if matches!(status, AgentStatus::Done | AgentStatus::Error) {
                    agent.completed_at = Some(now);
                    agent.current_action = None;
                }
                agent.status = status;
                if action.is_some() {
                    agent.current_action = action;
                }
            }
        })
        .await
    }

    pub(crate) async fn add_usage(&self, id: &str, usage: TokenUsage) -> Result<()> {
        self.with_pipeline(id, |pipeline| pipeline.token_usage.add(usage))
            .await
    }
}
