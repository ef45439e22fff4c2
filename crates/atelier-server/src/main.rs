use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_stream::StreamExt;
use tracing::info;

use atelier_agent::llm::LlmClient;
use atelier_agent::runner::AgentRunner;
use atelier_core::config::Config;
use atelier_core::deploy::{DeployHost, HttpDeployHost};
use atelier_core::pipeline::Orchestrator;
use atelier_core::repo::{GithubRepoHost, RepoHost};
use atelier_core::skills::{HttpSkillsCatalog, SkillsCatalog};
use atelier_core::store::Store;
use atelier_core::types::Phase;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "atelier_server=info,atelier_core=info,atelier_agent=info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(Config::from_env()?);
    std::fs::create_dir_all(&config.workspace_root)?;

    let store = Store::new(&config.store_path);
    let llm = Arc::new(LlmClient::new(
        config.llm_api_key.clone(),
        config.llm_base_url.clone(),
        config.llm_models.clone(),
    ));
    let agent = Arc::new(AgentRunner::new(llm));

    let repo: Option<Arc<dyn RepoHost>> = config.repo_configured().then(|| {
        Arc::new(GithubRepoHost::new(
            config.repo_owner.clone(),
            config.repo_token.clone(),
            config.repo_api_url.clone(),
        )) as Arc<dyn RepoHost>
    });
    let deploy: Option<Arc<dyn DeployHost>> = config.deploy_configured().then(|| {
        Arc::new(HttpDeployHost::new(config.deploy_url.clone(), config.deploy_token.clone()))
            as Arc<dyn DeployHost>
    });
    let skills: Arc<dyn SkillsCatalog> = Arc::new(HttpSkillsCatalog::new(config.skills_url.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        store,
        agent,
        repo,
        deploy,
        skills,
    ));
    let restored = orchestrator.restore().await?;
    info!(restored, "pipeline registry loaded");

    match std::env::args().nth(1) {
        // One-shot CLI mode: launch the idea and stream its events.
        Some(description) => {
            let mut events = orchestrator.subscribe(None);
            let pipeline = orchestrator.launch_idea(&description, None, Vec::new()).await?;
            let id = pipeline.id.clone();
            info!(pipeline_id = %id, name = %pipeline.name, "pipeline launched");

            while let Some(event) = events.next().await {
                if event.pipeline_id != id {
                    continue;
                }
                println!("{} {} {}", event.agent_emoji, event.agent_role, event.action);
                if let Some(p) = orchestrator.get_pipeline(&id).await {
                    if p.phase.is_terminal() {
                        if p.phase == Phase::Failed {
                            bail!(p.error.unwrap_or_else(|| "pipeline failed".into()));
                        }
                        info!(pipeline_id = %id, "pipeline completed");
                        return Ok(());
                    }
                }
            }
            Ok(())
        }
        // Daemon mode: keep restored pipelines observable until ctrl-c.
        None => {
            info!("atelier ready — waiting for ctrl-c");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            Ok(())
        }
    }
}
