use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentAction, AgentContext, AgentRequest, AgentResult, ToolName};
use crate::classify;
use crate::deploy::ApplicationSpec;
use crate::error::{chain_is_cancelled, PipelineError};
use crate::pipeline::{ensure_active, sleep_cancellable, Attachment, Orchestrator};
use crate::prompts;
use crate::templates;
use crate::types::{AgentRole, AgentStatus, DeployInfo, EventType, GithubInfo, Phase};
use crate::util::{extract_json, truncate_chars};

/// Coerce `architecture.features` into a flat list of feature names.
fn feature_list(architecture: &Value) -> Vec<String> {
    architecture
        .get("features")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_str().map(str::to_string).or_else(|| {
                        ["name", "title", "description"]
                            .iter()
                            .find_map(|k| item.get(k).and_then(Value::as_str))
                            .map(str::to_string)
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Up to five lookup keywords: stack values, then top features, then the
/// leading words of the description.
fn skill_keywords(analysis: &Value, description: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim().to_lowercase();
        if !s.is_empty() && seen.insert(s.clone()) && keywords.len() < 5 {
            keywords.push(s);
        }
    };

    if let Some(stack) = analysis.get("stack").and_then(Value::as_object) {
        for value in stack.values() {
            if let Some(s) = value.as_str() {
                push(s);
            }
        }
    }
    if let Some(features) = analysis.get("features").and_then(Value::as_array) {
        for feature in features.iter().take(3) {
            if let Some(s) = feature.as_str() {
                push(s);
            }
        }
    }
    for word in description.split_whitespace().take(3) {
        push(word);
    }
    keywords
}

impl Orchestrator {
    /// Run one agent invocation, forwarding its live actions into the
    /// pipeline's event log and accumulating token usage.
    pub(crate) async fn run_agent(self: &Arc<Self>, id: &str, req: AgentRequest) -> Result<AgentResult> {
        let token = self
            .cancels
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default();
        let workspace = self.snapshot(id).await?.workspace;
        let role = req.role;

        let (tx, mut rx) = mpsc::unbounded_channel::<AgentAction>();
        let forwarder = {
            let orch = Arc::clone(self);
            let id = id.to_string();
            tokio::spawn(async move {
                while let Some(action) = rx.recv().await {
                    let (text, kind) = match action {
                        AgentAction::Text(t) => (truncate_chars(&t, 500), EventType::Info),
                        AgentAction::ToolUse { name, summary } => {
                            (format!("{name}: {summary}"), EventType::Info)
                        }
                        AgentAction::ToolResult { summary } => (format!("→ {summary}"), EventType::Info),
                        AgentAction::Warning(w) => (w, EventType::Warning),
                    };
                    orch.add_event(&id, role.label(), role.emoji(), text, kind).await;
                }
            })
        };

        let ctx = AgentContext { workspace, cancel: token, actions: Some(tx) };
        let result = self.agent.run(req, ctx).await;
        let _ = forwarder.await;

        let result = result?;
        self.add_usage(id, result.token_usage).await?;
        Ok(result)
    }

    async fn artifact(&self, id: &str, key: &'static str) -> Result<Value> {
        self.snapshot(id)
            .await?
            .artifacts
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::MissingArtifact(key).into())
    }

    // ── Analysis ─────────────────────────────────────────────────────────

    pub(crate) async fn run_analysis(
        self: &Arc<Self>,
        id: &str,
        token: &CancellationToken,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        ensure_active(token)?;
        self.set_phase(id, Phase::Analysis).await?;
        self.agent_update(id, AgentRole::Analyst, AgentStatus::Active, Some("Analyzing the idea".into()))
            .await?;
        self.add_event(id, "Analyst", "🔍", "Analyzing the project idea", EventType::Info)
            .await;

        let description = self.snapshot(id).await?.description;
        let req = AgentRequest {
            role: AgentRole::Analyst,
            system_prompt: prompts::ANALYST_SYSTEM.into(),
            prompt: prompts::analysis_prompt(&description),
            attachments,
            max_turns: 3,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: Some(Vec::new()),
        };
        let result = self.run_agent(id, req).await?;
        if !result.success {
            ensure_active(token)?;
            let reason = result.error.unwrap_or_else(|| "analysis agent failed".into());
            self.agent_update(id, AgentRole::Analyst, AgentStatus::Error, None).await?;
            self.add_event(id, "Analyst", "🔍", format!("Analysis failed: {reason}"), EventType::Error)
                .await;
            bail!(reason);
        }

        let analysis = match extract_json(&result.final_result) {
            Ok(v) => v,
            Err(e) => {
                self.agent_update(id, AgentRole::Analyst, AgentStatus::Error, None).await?;
                self.add_event(id, "Analyst", "🔍", format!("Analysis unreadable: {e}"), EventType::Error)
                    .await;
                return Err(e.into());
            }
        };
        let project_type = classify::classify(&analysis);
        self.with_pipeline(id, |p| {
            p.artifacts.insert("analysis".into(), analysis);
            p.project_type = project_type;
        })
        .await?;
        self.add_event(
            id,
            "Analyst",
            "🔍",
            format!("Analysis complete — project type: {}", project_type.as_str()),
            EventType::Success,
        )
        .await;
        self.agent_update(id, AgentRole::Analyst, AgentStatus::Done, None).await?;
        Ok(())
    }

    // ── Architecture ─────────────────────────────────────────────────────

    pub(crate) async fn run_architecture(self: &Arc<Self>, id: &str, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;
        self.set_phase(id, Phase::Architecture).await?;
        self.agent_update(
            id,
            AgentRole::Architect,
            AgentStatus::Active,
            Some("Designing the architecture".into()),
        )
        .await?;

        let snapshot = self.snapshot(id).await?;
        let analysis = self.artifact(id, "analysis").await?;
        let project_type = snapshot.project_type;

        let keywords = skill_keywords(&analysis, &snapshot.description);
        let skills = self.skills.find_for_context(&keywords, 3).await;
        if !skills.is_empty() {
            self.add_event(
                id,
                "Architect",
                "📐",
                format!("Found {} relevant skill(s)", skills.len()),
                EventType::Info,
            )
            .await;
        }
        let skills_artifact: Vec<Value> = skills
            .iter()
            .map(|s| json!({"title": s.title, "href": s.href}))
            .collect();
        self.with_pipeline(id, |p| {
            p.artifacts.insert("skills".into(), Value::Array(skills_artifact));
        })
        .await?;

        let req = AgentRequest {
            role: AgentRole::Architect,
            system_prompt: prompts::ARCHITECT_SYSTEM.into(),
            prompt: prompts::architecture_prompt(
                &analysis,
                templates::dockerfile(project_type),
                templates::architecture_guidance(project_type),
                &skills,
            ),
            attachments: Vec::new(),
            max_turns: 3,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: Some(Vec::new()),
        };
        let result = self.run_agent(id, req).await?;
        if !result.success {
            ensure_active(token)?;
            let reason = result.error.unwrap_or_else(|| "architecture agent failed".into());
            self.agent_update(id, AgentRole::Architect, AgentStatus::Error, None).await?;
            self.add_event(id, "Architect", "📐", format!("Architecture failed: {reason}"), EventType::Error)
                .await;
            bail!(reason);
        }

        let architecture = match extract_json(&result.final_result) {
            Ok(v) => v,
            Err(e) => {
                self.agent_update(id, AgentRole::Architect, AgentStatus::Error, None).await?;
                self.add_event(id, "Architect", "📐", format!("Architecture unreadable: {e}"), EventType::Error)
                    .await;
                return Err(e.into());
            }
        };
        let features = feature_list(&architecture).len();
        self.with_pipeline(id, |p| {
            p.artifacts.insert("architecture".into(), architecture);
        })
        .await?;
        self.add_event(
            id,
            "Architect",
            "📐",
            format!("Architecture ready — {features} feature(s) planned"),
            EventType::Success,
        )
        .await;
        self.agent_update(id, AgentRole::Architect, AgentStatus::Done, None).await?;
        Ok(())
    }

    // ── Scaffold ─────────────────────────────────────────────────────────

    pub(crate) async fn run_scaffold(self: &Arc<Self>, id: &str, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;
        self.set_phase(id, Phase::Scaffold).await?;
        self.agent_update(
            id,
            AgentRole::Developer,
            AgentStatus::Active,
            Some("Scaffolding the project".into()),
        )
        .await?;

        let snapshot = self.snapshot(id).await?;
        let architecture = self.artifact(id, "architecture").await?;
        let project_type = snapshot.project_type;

        if let Some(repo) = &self.repo {
            match repo.create_repo(&snapshot.name, &snapshot.description).await {
                Ok(created) => {
                    let label = if created.reused { "Reusing repository" } else { "Repository created" };
                    self.add_event(id, "Developer", "💻", format!("{label}: {}", created.url), EventType::Success)
                        .await;
                    self.with_pipeline(id, |p| {
                        p.github = Some(GithubInfo {
                            owner: created.owner.clone(),
                            repo: created.repo.clone(),
                            url: created.url.clone(),
                        });
                    })
                    .await?;
                    if let Err(e) = repo.clone_repo(&created.repo, &snapshot.workspace).await {
                        self.add_event(
                            id,
                            "Developer",
                            "💻",
                            format!("Clone failed, working from a fresh workspace: {e}"),
                            EventType::Warning,
                        )
                        .await;
                    } else if let Err(e) = repo
                        .set_identity(&snapshot.workspace, &self.config.git_author_name, &self.config.git_author_email)
                        .await
                    {
                        self.add_event(id, "Developer", "💻", format!("Git identity setup failed: {e}"), EventType::Warning)
                            .await;
                    }
                }
                Err(e) => {
                    self.add_event(
                        id,
                        "Developer",
                        "💻",
                        format!("Repository creation failed, continuing locally: {e}"),
                        EventType::Warning,
                    )
                    .await;
                }
            }
        }

        ensure_active(token)?;
        let req = AgentRequest {
            role: AgentRole::Developer,
            system_prompt: prompts::DEVELOPER_SYSTEM.into(),
            prompt: prompts::scaffold_prompt(
                &architecture,
                templates::scaffold_guidance(project_type),
                templates::dockerfile(project_type),
            ),
            attachments: Vec::new(),
            max_turns: 12,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: Some(vec![ToolName::WriteFile, ToolName::Bash]),
        };
        let result = self.run_agent(id, req).await?;
        if !result.success {
            ensure_active(token)?;
            bail!(result.error.unwrap_or_else(|| "scaffold agent failed".into()));
        }
        self.add_event(id, "Developer", "💻", "Project skeleton created", EventType::Success)
            .await;

        let github = self.snapshot(id).await?.github;
        if let (Some(repo), Some(gh)) = (&self.repo, &github) {
            match repo
                .push_all(&snapshot.workspace, &gh.repo, "feat: initial scaffold by Atelier")
                .await
            {
                Ok(_) => {
                    self.add_event(id, "Developer", "💻", "Initial scaffold pushed", EventType::Success)
                        .await;
                }
                Err(e) => {
                    self.add_event(id, "Developer", "💻", format!("Push failed: {e}"), EventType::Error)
                        .await;
                }
            }
        }

        if let Some(gh) = &github {
            if self.deploy.is_some() && self.snapshot(id).await?.deploy.is_none() {
                self.set_phase(id, Phase::Deploying).await?;
                self.add_event(id, "Developer", "💻", "Provisioning deployment", EventType::Deploy)
                    .await;
                if let Err(e) = self.provision_deploy(id, &snapshot.name, &snapshot.description, gh, project_type).await {
                    self.add_event(
                        id,
                        "Developer",
                        "💻",
                        format!("Deployment provisioning failed: {e}"),
                        EventType::Error,
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn provision_deploy(
        &self,
        id: &str,
        name: &str,
        description: &str,
        gh: &GithubInfo,
        project_type: crate::types::ProjectType,
    ) -> Result<()> {
        let Some(deploy) = self.deploy.as_ref() else {
            return Ok(());
        };
        let project = deploy.create_project(name, description).await?;
        let app = deploy
            .create_application(&ApplicationSpec {
                name: name.to_string(),
                project_id: project.project_id.clone(),
                environment_id: project.environment_id.clone(),
                owner: gh.owner.clone(),
                repo: gh.repo.clone(),
                branch: "main".into(),
                build_type: "dockerfile".into(),
            })
            .await?;
        let host = format!("{name}.{}", self.config.deploy_base_domain);
        let domain = deploy
            .create_domain(&app.application_id, &host, templates::exposed_port(project_type))
            .await?;
        let url = format!("https://{domain}");
        self.with_pipeline(id, |p| {
            p.deploy = Some(DeployInfo {
                project_id: project.project_id.clone(),
                application_id: app.application_id.clone(),
                url: Some(url.clone()),
            });
        })
        .await?;
        self.add_event(id, "Developer", "💻", format!("Deployment ready at {url}"), EventType::Deploy)
            .await;
        Ok(())
    }

    // ── Development ──────────────────────────────────────────────────────

    pub(crate) async fn run_development(self: &Arc<Self>, id: &str, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;
        self.set_phase(id, Phase::Development).await?;

        let architecture = self.artifact(id, "architecture").await?;
        let features = feature_list(&architecture);
        if features.is_empty() {
            self.add_event(id, "Developer", "💻", "No features planned by the architect", EventType::Warning)
                .await;
        }
        let total = features.len();

        for (i, feature) in features.iter().enumerate() {
            ensure_active(token)?;
            self.agent_update(
                id,
                AgentRole::Developer,
                AgentStatus::Active,
                Some(format!("Feature {}/{}: {}", i + 1, total, feature)),
            )
            .await?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let progress = 40 + ((i as f64 / total as f64) * 30.0).round() as u8;
            self.with_pipeline(id, |p| p.raise_progress(progress)).await?;

            let req = AgentRequest {
                role: AgentRole::Developer,
                system_prompt: prompts::DEVELOPER_SYSTEM.into(),
                prompt: prompts::feature_prompt(feature, &architecture),
                attachments: Vec::new(),
                max_turns: 12,
                timeout_ms: self.config.agent_timeout_ms,
                allowed_tools: None,
            };
            match self.run_agent(id, req).await {
                Ok(result) if result.success => {
                    self.add_event(id, "Developer", "💻", format!("Feature implemented: {feature}"), EventType::Success)
                        .await;
                }
                Ok(result) => {
                    ensure_active(token)?;
                    let reason = result.error.unwrap_or_else(|| "agent failed".into());
                    self.add_event(
                        id,
                        "Developer",
                        "💻",
                        format!("Feature skipped ({feature}): {reason}"),
                        EventType::Warning,
                    )
                    .await;
                    continue;
                }
                Err(e) => {
                    if chain_is_cancelled(&e) {
                        return Err(e);
                    }
                    self.add_event(id, "Developer", "💻", format!("Feature skipped ({feature}): {e}"), EventType::Warning)
                        .await;
                    continue;
                }
            }

            let snapshot = self.snapshot(id).await?;
            if let (Some(repo), Some(gh)) = (&self.repo, &snapshot.github) {
                match repo
                    .push_all(&snapshot.workspace, &gh.repo, &format!("feat: {feature}"))
                    .await
                {
                    Ok(_) => {
                        self.add_event(id, "Developer", "💻", format!("Pushed feat: {feature}"), EventType::Success)
                            .await;
                    }
                    Err(e) => {
                        self.add_event(id, "Developer", "💻", format!("Push failed: {e}"), EventType::Error)
                            .await;
                    }
                }
                if snapshot.deploy.is_some() {
                    self.build_watch(id, token).await?;
                }
            }
        }

        self.agent_update(id, AgentRole::Developer, AgentStatus::Done, None).await?;
        Ok(())
    }

    // ── Build-watch / auto-debug loop ────────────────────────────────────

    pub(crate) async fn build_watch(self: &Arc<Self>, id: &str, token: &CancellationToken) -> Result<()> {
        let Some(deploy_host) = self.deploy.clone() else {
            return Ok(());
        };
        let Some(info) = self.snapshot(id).await?.deploy else {
            return Ok(());
        };
        let app_id = info.application_id;

        sleep_cancellable(token, self.config.build_watch_initial_ms).await?;

        for attempt in 0..3u32 {
            ensure_active(token)?;
            let deployment = match deploy_host.latest_deployment(&app_id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(pipeline_id = %id, attempt, "deployment poll failed: {e}");
                    sleep_cancellable(token, self.config.build_watch_poll_ms).await?;
                    continue;
                }
            };

            match deployment.status {
                crate::deploy::DeploymentStatus::Done => {
                    self.add_event(id, "Developer", "💻", "Build succeeded", EventType::Success)
                        .await;
                    return Ok(());
                }
                crate::deploy::DeploymentStatus::Error => {
                    self.add_event(id, "Debugger", "🔧", "Build failed — debugging", EventType::Error)
                        .await;
                    let logs = match deploy_host.build_logs(&app_id).await {
                        Ok(l) => l,
                        Err(_) => deployment.log.unwrap_or_default(),
                    };
                    self.set_phase(id, Phase::Debugging).await?;
                    self.run_debugger(id, token, &logs).await?;

                    let snapshot = self.snapshot(id).await?;
                    if let (Some(repo), Some(gh)) = (&self.repo, &snapshot.github) {
                        if let Err(e) = repo
                            .push_all(&snapshot.workspace, &gh.repo, "fix: build error correction")
                            .await
                        {
                            self.add_event(id, "Debugger", "🔧", format!("Fix push failed: {e}"), EventType::Error)
                                .await;
                        }
                    }
                    match deploy_host.trigger_deploy(&app_id).await {
                        Ok(()) => {
                            self.add_event(id, "Debugger", "🔧", "Redeploy triggered", EventType::Deploy)
                                .await;
                        }
                        Err(e) => {
                            self.add_event(id, "Debugger", "🔧", format!("Redeploy failed: {e}"), EventType::Error)
                                .await;
                        }
                    }
                    self.set_phase(id, Phase::Development).await?;
                    sleep_cancellable(token, self.config.build_watch_retry_ms).await?;
                }
                _ => {
                    sleep_cancellable(token, self.config.build_watch_poll_ms).await?;
                }
            }
        }
        info!(pipeline_id = %id, "build watch exhausted its polls");
        Ok(())
    }

    // ── Debugger ─────────────────────────────────────────────────────────

    pub(crate) async fn run_debugger(self: &Arc<Self>, id: &str, token: &CancellationToken, logs: &str) -> Result<()> {
        self.agent_update(id, AgentRole::Debugger, AgentStatus::Active, Some("Fixing the build".into()))
            .await?;
        let req = AgentRequest {
            role: AgentRole::Debugger,
            system_prompt: prompts::DEBUGGER_SYSTEM.into(),
            prompt: prompts::debug_prompt(logs),
            attachments: Vec::new(),
            max_turns: 5,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: None,
        };
        match self.run_agent(id, req).await {
            Ok(result) if result.success => {
                self.agent_update(id, AgentRole::Debugger, AgentStatus::Done, None).await?;
                self.add_event(id, "Debugger", "🔧", "Debug pass finished", EventType::Success)
                    .await;
            }
            Ok(result) => {
                ensure_active(token)?;
                let reason = result.error.unwrap_or_else(|| "debug agent failed".into());
                self.agent_update(id, AgentRole::Debugger, AgentStatus::Error, None).await?;
                self.add_event(id, "Debugger", "🔧", format!("Debug pass failed: {reason}"), EventType::Warning)
                    .await;
            }
            Err(e) => {
                if chain_is_cancelled(&e) {
                    return Err(e);
                }
                self.agent_update(id, AgentRole::Debugger, AgentStatus::Error, None).await?;
                self.add_event(id, "Debugger", "🔧", format!("Debug pass failed: {e}"), EventType::Warning)
                    .await;
            }
        }
        Ok(())
    }

    // ── QA ───────────────────────────────────────────────────────────────

    pub(crate) async fn run_qa(self: &Arc<Self>, id: &str, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;
        self.set_phase(id, Phase::Qa).await?;
        self.agent_update(id, AgentRole::Qa, AgentStatus::Active, Some("Reviewing the project".into()))
            .await?;

        let req = AgentRequest {
            role: AgentRole::Qa,
            system_prompt: prompts::QA_SYSTEM.into(),
            prompt: prompts::qa_prompt(),
            attachments: Vec::new(),
            max_turns: 5,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: Some(vec![ToolName::ReadFile, ToolName::ListDir]),
        };
        match self.run_agent(id, req).await {
            Ok(result) if result.success => {
                self.add_event(id, "QA", "✅", truncate_chars(&result.final_result, 300), EventType::Success)
                    .await;
                let snapshot = self.snapshot(id).await?;
                if let (Some(repo), Some(gh)) = (&self.repo, &snapshot.github) {
                    // QA tools are read-only, but earlier phases may have
                    // left uncommitted changes behind.
                    if let Err(e) = repo.push_all(&snapshot.workspace, &gh.repo, "chore: QA fixes").await {
                        self.add_event(id, "QA", "✅", format!("QA push failed: {e}"), EventType::Warning)
                            .await;
                    }
                }
                self.agent_update(id, AgentRole::Qa, AgentStatus::Done, None).await?;
            }
            Ok(result) => {
                ensure_active(token)?;
                let reason = result.error.unwrap_or_else(|| "qa agent failed".into());
                self.agent_update(id, AgentRole::Qa, AgentStatus::Error, None).await?;
                self.add_event(id, "QA", "✅", format!("QA pass failed: {reason}"), EventType::Warning)
                    .await;
            }
            Err(e) => {
                if chain_is_cancelled(&e) {
                    return Err(e);
                }
                self.agent_update(id, AgentRole::Qa, AgentStatus::Error, None).await?;
                self.add_event(id, "QA", "✅", format!("QA pass failed: {e}"), EventType::Warning)
                    .await;
            }
        }
        Ok(())
    }

    // ── Completion ───────────────────────────────────────────────────────

    pub(crate) async fn complete(&self, id: &str) -> Result<()> {
        self.with_pipeline(id, |p| {
            p.phase = Phase::Completed;
            p.raise_progress(100);
            p.error = None;
            let now = chrono::Utc::now();
            for agent in &mut p.agents {
                if agent.status == AgentStatus::Active {
                    agent.status = AgentStatus::Done;
                    agent.completed_at = Some(now);
                }
            }
        })
        .await?;

        let snapshot = self.snapshot(id).await?;
        let mut message = String::from("Pipeline completed");
        if let Some(gh) = &snapshot.github {
            message.push_str(&format!(" — repo {}", gh.url));
        }
        if let Some(url) = snapshot.deploy.as_ref().and_then(|d| d.url.as_ref()) {
            message.push_str(&format!(" — live at {url}"));
        }
        self.add_event(id, "System", "⚙️", message, EventType::Success).await;
        info!(pipeline_id = %id, "pipeline completed");
        Ok(())
    }

    // ── Modify (out-of-band path) ────────────────────────────────────────

    pub(crate) async fn run_modification(
        self: &Arc<Self>,
        id: &str,
        token: &CancellationToken,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        let pending = self.artifact(id, "pendingModification").await?;
        let instructions = pending
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.with_pipeline(id, |p| {
            p.phase = Phase::Development;
            // Progress reset is allowed when re-entering via modify.
            p.progress = Phase::Development.min_progress();
            p.error = None;
        })
        .await?;
        self.add_event(
            id,
            "Developer",
            "💻",
            format!("Modification requested: {}", truncate_chars(&instructions, 100)),
            EventType::Info,
        )
        .await;
        self.agent_update(id, AgentRole::Developer, AgentStatus::Active, Some("Applying modification".into()))
            .await?;

        let snapshot = self.snapshot(id).await?;
        if !snapshot.workspace.exists() {
            tokio::fs::create_dir_all(&snapshot.workspace)
                .await
                .map_err(PipelineError::Workspace)?;
            if let (Some(repo), Some(gh)) = (&self.repo, &snapshot.github) {
                if let Err(e) = repo.clone_repo(&gh.repo, &snapshot.workspace).await {
                    self.add_event(id, "Developer", "💻", format!("Reclone failed: {e}"), EventType::Warning)
                        .await;
                }
            }
        }

        let req = AgentRequest {
            role: AgentRole::Developer,
            system_prompt: prompts::DEVELOPER_SYSTEM.into(),
            prompt: prompts::modify_prompt(&instructions),
            attachments,
            max_turns: 15,
            timeout_ms: self.config.agent_timeout_ms,
            allowed_tools: None,
        };
        let result = self.run_agent(id, req).await?;
        if !result.success {
            ensure_active(token)?;
            bail!(result.error.unwrap_or_else(|| "modification agent failed".into()));
        }

        if let (Some(repo), Some(gh)) = (&self.repo, &snapshot.github) {
            let subject: String = instructions.chars().take(50).collect();
            match repo
                .push_all(&snapshot.workspace, &gh.repo, &format!("mod: {subject}"))
                .await
            {
                Ok(_) => {
                    self.add_event(id, "Developer", "💻", "Modification pushed", EventType::Success)
                        .await;
                }
                Err(e) => {
                    self.add_event(id, "Developer", "💻", format!("Push failed: {e}"), EventType::Error)
                        .await;
                }
            }
        }

        if snapshot.deploy.is_some() {
            self.build_watch(id, token).await?;
        }
        self.run_qa(id, token).await?;
        self.with_pipeline(id, |p| {
            p.artifacts.remove("pendingModification");
        })
        .await?;
        self.complete(id).await?;
        Ok(())
    }
}
