use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use atelier_core::agent::{AgentBackend, AgentContext, AgentRequest, AgentResult};
use atelier_core::config::Config;
use atelier_core::deploy::{
    ApplicationSpec, DeployApplication, DeployHost, DeployProject, Deployment, DeploymentStatus,
};
use atelier_core::error::PipelineError;
use atelier_core::pipeline::Orchestrator;
use atelier_core::repo::{RepoCreated, RepoHost};
use atelier_core::skills::{Skill, SkillsCatalog};
use atelier_core::store::Store;
use atelier_core::types::{AgentRole, Phase, Pipeline, ProjectType, TokenUsage};

// ── Stub adapters ────────────────────────────────────────────────────────

/// Agent backend with canned per-role replies.
struct ScriptedAgent {
    analysis: String,
}

impl ScriptedAgent {
    fn static_site() -> Arc<Self> {
        Arc::new(Self {
            analysis: r#"{"name":"cafe","summary":"Landing page pour une cafétéria","type":"static",
                "features":["menu"],"stack":{"frontend":"HTML/CSS"}}"#
                .into(),
        })
    }
}

#[async_trait]
impl AgentBackend for ScriptedAgent {
    async fn run(&self, req: AgentRequest, _ctx: AgentContext) -> Result<AgentResult> {
        let final_result = match req.role {
            AgentRole::Analyst => self.analysis.clone(),
            AgentRole::Architect => r#"{"stack":{"frontend":"HTML/CSS"},
                "fileStructure":["index.html"],"endpoints":[],
                "features":["Menu section","Contact form"]}"#
                .to_string(),
            _ => "done".to_string(),
        };
        Ok(AgentResult {
            success: true,
            actions: vec![final_result.clone()],
            final_result,
            error: None,
            duration_ms: 1,
            token_usage: TokenUsage { input_tokens: 5, output_tokens: 3 },
        })
    }
}

/// Agent backend that parks until its token is cancelled.
struct BlockingAgent;

#[async_trait]
impl AgentBackend for BlockingAgent {
    async fn run(&self, _req: AgentRequest, ctx: AgentContext) -> Result<AgentResult> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Ok(AgentResult {
                success: false,
                actions: Vec::new(),
                final_result: String::new(),
                error: Some("arrêté manuellement".into()),
                duration_ms: 1,
                token_usage: TokenUsage::default(),
            }),
            () = tokio::time::sleep(Duration::from_secs(60)) => Ok(AgentResult {
                success: true,
                actions: Vec::new(),
                final_result: "{}".into(),
                error: None,
                duration_ms: 1,
                token_usage: TokenUsage::default(),
            }),
        }
    }
}

#[derive(Default)]
struct StubRepo {
    pushes: Mutex<Vec<String>>,
}

impl StubRepo {
    fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoHost for StubRepo {
    async fn create_repo(&self, name: &str, _description: &str) -> Result<RepoCreated, PipelineError> {
        Ok(RepoCreated {
            owner: "tester".into(),
            repo: name.to_string(),
            url: format!("https://github.com/tester/{name}"),
            reused: false,
        })
    }

    async fn clone_repo(&self, _repo: &str, dest: &Path) -> Result<(), PipelineError> {
        std::fs::create_dir_all(dest).map_err(PipelineError::Workspace)?;
        Ok(())
    }

    async fn set_identity(&self, _dir: &Path, _name: &str, _email: &str) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn push_all(&self, _dir: &Path, _repo: &str, message: &str) -> Result<bool, PipelineError> {
        self.pushes.lock().unwrap().push(message.to_string());
        Ok(true)
    }
}

struct StubDeploy {
    statuses: Mutex<VecDeque<DeploymentStatus>>,
    triggers: AtomicU32,
}

impl StubDeploy {
    fn always_done() -> Arc<Self> {
        Arc::new(Self { statuses: Mutex::new(VecDeque::new()), triggers: AtomicU32::new(0) })
    }

    fn with_statuses(statuses: &[DeploymentStatus]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            triggers: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl DeployHost for StubDeploy {
    async fn create_project(&self, _name: &str, _description: &str) -> Result<DeployProject, PipelineError> {
        Ok(DeployProject { project_id: "p1".into(), environment_id: "e1".into() })
    }

    async fn create_application(&self, spec: &ApplicationSpec) -> Result<DeployApplication, PipelineError> {
        Ok(DeployApplication { application_id: "a1".into(), app_name: spec.name.clone() })
    }

    async fn create_domain(&self, _application_id: &str, host: &str, _port: u16) -> Result<String, PipelineError> {
        Ok(host.to_string())
    }

    async fn trigger_deploy(&self, _application_id: &str) -> Result<(), PipelineError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn latest_deployment(&self, _application_id: &str) -> Result<Deployment, PipelineError> {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeploymentStatus::Done);
        Ok(Deployment { status, log: Some("build log".into()) })
    }

    async fn build_logs(&self, _application_id: &str) -> Result<String, PipelineError> {
        Ok("TypeError: boom at build step".into())
    }
}

struct NullSkills;

#[async_trait]
impl SkillsCatalog for NullSkills {
    async fn find_for_context(&self, _keywords: &[String], _limit: usize) -> Vec<Skill> {
        Vec::new()
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn test_config(root: &Path) -> Arc<Config> {
    Arc::new(Config {
        workspace_root: root.join("ws"),
        store_path: root.join("data/pipelines.json"),
        llm_api_key: String::new(),
        llm_models: vec!["test-model".into()],
        llm_base_url: String::new(),
        repo_owner: "tester".into(),
        repo_token: "token".into(),
        repo_api_url: String::new(),
        deploy_url: "http://deploy.test".into(),
        deploy_token: "token".into(),
        deploy_base_domain: "apps.test".into(),
        skills_url: String::new(),
        git_author_name: "Atelier".into(),
        git_author_email: "atelier@localhost".into(),
        agent_timeout_ms: 5_000,
        build_watch_initial_ms: 10,
        build_watch_poll_ms: 10,
        build_watch_retry_ms: 10,
    })
}

fn orchestrator(
    root: &Path,
    agent: Arc<dyn AgentBackend>,
    repo: Arc<StubRepo>,
    deploy: Arc<StubDeploy>,
) -> Arc<Orchestrator> {
    let config = test_config(root);
    let store = Store::new(&config.store_path);
    Arc::new(Orchestrator::new(
        config,
        store,
        agent,
        Some(repo),
        Some(deploy),
        Arc::new(NullSkills),
    ))
}

async fn wait_until(
    orch: &Arc<Orchestrator>,
    id: &str,
    pred: impl Fn(&Pipeline) -> bool,
) -> Pipeline {
    for _ in 0..1_000 {
        if let Some(p) = orch.get_pipeline(id).await {
            if pred(&p) {
                return p;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached for pipeline {id}");
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn static_happy_path_traverses_all_phases() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(StubRepo::default());
    let deploy = StubDeploy::always_done();
    let orch = orchestrator(dir.path(), ScriptedAgent::static_site(), Arc::clone(&repo), Arc::clone(&deploy));

    let pipeline = orch
        .launch_idea("Landing page pour une cafétéria", None, Vec::new())
        .await
        .unwrap();
    let id = pipeline.id.clone();

    let done = wait_until(&orch, &id, |p| p.phase.is_terminal()).await;
    assert_eq!(done.phase, Phase::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.project_type, ProjectType::Static);
    assert!(done.github.is_some());
    let deploy_info = done.deploy.expect("deployment provisioned");
    assert_eq!(deploy_info.project_id, "p1");
    assert!(deploy_info.url.unwrap().ends_with(".apps.test"));
    assert!(done.token_usage.input_tokens > 0);
    assert!(done.events.len() <= 100);

    let pushes = repo.pushes();
    assert!(pushes.contains(&"feat: initial scaffold by Atelier".to_string()));
    assert!(pushes.contains(&"feat: Menu section".to_string()));
    assert!(pushes.contains(&"feat: Contact form".to_string()));
    assert!(pushes.contains(&"chore: QA fixes".to_string()));

    // The store on disk reflects the terminal state.
    let reloaded = Store::new(dir.path().join("data/pipelines.json")).load().unwrap();
    assert_eq!(reloaded[&id].phase, Phase::Completed);
}

#[tokio::test]
async fn build_failure_triggers_one_debug_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(StubRepo::default());
    let deploy = StubDeploy::with_statuses(&[DeploymentStatus::Error, DeploymentStatus::Done]);
    let orch = orchestrator(dir.path(), ScriptedAgent::static_site(), Arc::clone(&repo), Arc::clone(&deploy));

    let pipeline = orch
        .launch_idea("Landing page pour une cafétéria", None, Vec::new())
        .await
        .unwrap();
    let done = wait_until(&orch, &pipeline.id, |p| p.phase.is_terminal()).await;

    assert_eq!(done.phase, Phase::Completed);
    assert_eq!(deploy.triggers.load(Ordering::SeqCst), 1);
    let fixes = repo
        .pushes()
        .iter()
        .filter(|m| *m == "fix: build error correction")
        .count();
    assert_eq!(fixes, 1);
}

#[tokio::test]
async fn kill_during_analysis_fails_the_pipeline_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(StubRepo::default());
    let orch = orchestrator(dir.path(), Arc::new(BlockingAgent), Arc::clone(&repo), StubDeploy::always_done());

    let pipeline = orch.launch_idea("N'importe quelle idée", None, Vec::new()).await.unwrap();
    let id = pipeline.id.clone();

    wait_until(&orch, &id, |p| p.phase == Phase::Analysis).await;
    orch.kill_pipeline(&id).await.unwrap();

    let killed = wait_until(&orch, &id, |p| p.phase.is_terminal()).await;
    assert_eq!(killed.phase, Phase::Failed);
    assert!(killed.error.unwrap().contains("arrêté manuellement"));
    assert!(repo.pushes().is_empty());

    // Second kill: same terminal state, no duplicate events.
    let events_before = killed.events.len();
    orch.kill_pipeline(&id).await.unwrap();
    let after = orch.get_pipeline(&id).await.unwrap();
    assert_eq!(after.phase, Phase::Failed);
    assert_eq!(after.events.len(), events_before);
}

#[tokio::test]
async fn second_worker_for_the_same_pipeline_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        Arc::new(BlockingAgent),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );

    let pipeline = orch.launch_idea("Une idée", None, Vec::new()).await.unwrap();
    let id = pipeline.id.clone();
    wait_until(&orch, &id, |p| p.phase == Phase::Analysis).await;

    // Returns immediately instead of stealing the running worker's slot.
    Arc::clone(&orch).execute_pipeline(id.clone(), Vec::new()).await;
    assert_eq!(orch.get_pipeline(&id).await.unwrap().phase, Phase::Analysis);

    orch.kill_pipeline(&id).await.unwrap();
}

#[tokio::test]
async fn modify_after_completion_runs_the_modify_path() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(StubRepo::default());
    let orch = orchestrator(
        dir.path(),
        ScriptedAgent::static_site(),
        Arc::clone(&repo),
        StubDeploy::always_done(),
    );

    let pipeline = orch
        .launch_idea("Landing page pour une cafétéria", None, Vec::new())
        .await
        .unwrap();
    let id = pipeline.id.clone();
    wait_until(&orch, &id, |p| p.phase == Phase::Completed).await;

    // The worker clears its running-set entry just after the terminal
    // phase becomes visible; retry until the modify path is accepted.
    let mut accepted = false;
    for _ in 0..100 {
        if orch
            .modify_pipeline(&id, "Change le titre en 'Cafétéria Luna'", Vec::new())
            .await
            .is_ok()
        {
            accepted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(accepted, "modify was never accepted");

    wait_until(&orch, &id, |p| {
        p.phase == Phase::Completed && !p.artifacts.contains_key("pendingModification")
    })
    .await;

    let pushes = repo.pushes();
    assert!(
        pushes.iter().any(|m| m.starts_with("mod: Change le titre")),
        "expected a mod: push, got {pushes:?}"
    );
}

#[tokio::test]
async fn modify_rejects_non_terminal_pipelines() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        Arc::new(BlockingAgent),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );

    let pipeline = orch.launch_idea("Une idée", None, Vec::new()).await.unwrap();
    let id = pipeline.id.clone();
    wait_until(&orch, &id, |p| p.phase == Phase::Analysis).await;

    let err = orch.modify_pipeline(&id, "change it", Vec::new()).await.unwrap_err();
    assert!(err.to_string().contains("not in a terminal phase"));

    orch.kill_pipeline(&id).await.unwrap();
}

#[tokio::test]
async fn restart_restores_persisted_phases_without_resuming() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(StubRepo::default());
    let orch = orchestrator(dir.path(), Arc::new(BlockingAgent), repo, StubDeploy::always_done());

    let mut ids = Vec::new();
    for i in 0..3 {
        let p = orch.launch_idea(&format!("Idée {i}"), None, Vec::new()).await.unwrap();
        ids.push(p.id.clone());
    }
    for id in &ids {
        wait_until(&orch, id, |p| p.phase == Phase::Analysis).await;
    }

    // A fresh orchestrator over the same store simulates a process restart.
    let restarted = orchestrator(
        dir.path(),
        ScriptedAgent::static_site(),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );
    let restored = restarted.restore().await.unwrap();
    assert_eq!(restored, 3);
    assert_eq!(restarted.list_pipelines().await.len(), 3);
    for id in &ids {
        let p = restarted.get_pipeline(id).await.unwrap();
        assert_eq!(p.phase, Phase::Analysis, "phase restored verbatim");
    }

    for id in &ids {
        orch.kill_pipeline(id).await.unwrap();
    }
}

#[tokio::test]
async fn launching_twice_yields_distinct_pipelines() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        ScriptedAgent::static_site(),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );

    let a = orch.launch_idea("Même idée", None, Vec::new()).await.unwrap();
    let b = orch.launch_idea("Même idée", None, Vec::new()).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(a.workspace, b.workspace);
}

#[tokio::test]
async fn delete_removes_registry_entry_and_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        ScriptedAgent::static_site(),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );

    let pipeline = orch.launch_idea("Une idée à jeter", None, Vec::new()).await.unwrap();
    let id = pipeline.id.clone();
    wait_until(&orch, &id, |p| p.phase.is_terminal()).await;

    let workspace = pipeline.workspace.clone();
    orch.delete_pipeline(&id).await.unwrap();
    assert!(orch.get_pipeline(&id).await.is_none());
    assert!(!workspace.exists());

    let reloaded = Store::new(dir.path().join("data/pipelines.json")).load().unwrap();
    assert!(!reloaded.contains_key(&id));
}

#[tokio::test]
async fn progress_never_decreases_for_an_observer() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        ScriptedAgent::static_site(),
        Arc::new(StubRepo::default()),
        StubDeploy::always_done(),
    );

    let pipeline = orch
        .launch_idea("Landing page pour une cafétéria", None, Vec::new())
        .await
        .unwrap();
    let id = pipeline.id.clone();

    let mut last = 0u8;
    for i in 0..2_000 {
        let p = orch.get_pipeline(&id).await.unwrap();
        assert!(p.progress >= last, "progress regressed: {} < {last}", p.progress);
        last = p.progress;
        if p.phase.is_terminal() {
            break;
        }
        assert!(i < 1_999, "pipeline never reached a terminal phase");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, 100);
}
