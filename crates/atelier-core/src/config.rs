use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;

/// Full application configuration loaded from environment / .env file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent directory for all per-pipeline workspaces.
    pub workspace_root: PathBuf,
    /// Persistent JSON snapshot of all pipelines.
    pub store_path: PathBuf,

    // LLM
    pub llm_api_key: String,
    /// Ordered model fallback list.
    pub llm_models: Vec<String>,
    pub llm_base_url: String,

    // Source hosting; empty owner/token disables remote repo creation.
    pub repo_owner: String,
    pub repo_token: String,
    pub repo_api_url: String,

    // Deployment platform; empty url/token disables deployment.
    pub deploy_url: String,
    pub deploy_token: String,
    pub deploy_base_domain: String,

    /// Skills catalog endpoint; empty disables lookup.
    pub skills_url: String,

    // Git attribution
    pub git_author_name: String,
    pub git_author_email: String,

    // Agent tuning
    pub agent_timeout_ms: u64,

    // Build-watch tuning
    pub build_watch_initial_ms: u64,
    pub build_watch_poll_ms: u64,
    pub build_watch_retry_ms: u64,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated model list, dropping empty entries.
pub fn parse_models(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let models_raw = get_str("LLM_MODELS", &dotenv, "claude-sonnet-4-6,claude-haiku-4-5");

        Ok(Config {
            workspace_root: PathBuf::from(get_str("WORKSPACE_ROOT", &dotenv, "/workspace")),
            store_path: PathBuf::from(get_str("STORE_PATH", &dotenv, "/data/pipelines.json")),
            llm_api_key: get_str("LLM_API_KEY", &dotenv, ""),
            llm_models: parse_models(&models_raw),
            llm_base_url: get_str("LLM_BASE_URL", &dotenv, "https://api.anthropic.com"),
            repo_owner: get_str("REPO_OWNER", &dotenv, ""),
            repo_token: get_str("REPO_TOKEN", &dotenv, ""),
            repo_api_url: get_str("REPO_API_URL", &dotenv, "https://api.github.com"),
            deploy_url: get_str("DEPLOY_URL", &dotenv, ""),
            deploy_token: get_str("DEPLOY_TOKEN", &dotenv, ""),
            deploy_base_domain: get_str("DEPLOY_BASE_DOMAIN", &dotenv, ""),
            skills_url: get_str("SKILLS_URL", &dotenv, ""),
            git_author_name: get_str("GIT_AUTHOR_NAME", &dotenv, "Atelier"),
            git_author_email: get_str("GIT_AUTHOR_EMAIL", &dotenv, "atelier@localhost"),
            agent_timeout_ms: get_u64("AGENT_TIMEOUT_MS", &dotenv, 300_000),
            build_watch_initial_ms: get_u64("BUILD_WATCH_INITIAL_MS", &dotenv, 10_000),
            build_watch_poll_ms: get_u64("BUILD_WATCH_POLL_MS", &dotenv, 10_000),
            build_watch_retry_ms: get_u64("BUILD_WATCH_RETRY_MS", &dotenv, 15_000),
        })
    }

    pub fn repo_configured(&self) -> bool {
        !self.repo_owner.is_empty() && !self.repo_token.is_empty()
    }

    pub fn deploy_configured(&self) -> bool {
        !self.deploy_url.is_empty() && !self.deploy_token.is_empty()
    }
}
