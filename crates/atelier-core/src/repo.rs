use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::{PipelineError, Provider, StatusClass};
use crate::git::Git;

/// Remote repository as created (or reused) by the host.
#[derive(Debug, Clone)]
pub struct RepoCreated {
    pub owner: String,
    pub repo: String,
    /// Browser URL.
    pub url: String,
    /// True when the host reported the repo as already existing (409/422).
    pub reused: bool,
}

/// Source-hosting adapter: repo creation plus local git plumbing.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoCreated, PipelineError>;
    async fn clone_repo(&self, repo: &str, dest: &Path) -> Result<(), PipelineError>;
    async fn set_identity(&self, dir: &Path, name: &str, email: &str) -> Result<(), PipelineError>;
    /// Commit all outstanding changes and push HEAD. Returns false when the
    /// worktree was clean.
    async fn push_all(&self, dir: &Path, repo: &str, message: &str) -> Result<bool, PipelineError>;
}

/// GitHub-backed host. Repo creation goes through the REST API; everything
/// else shells out to git with the token embedded in the remote URL.
pub struct GithubRepoHost {
    owner: String,
    token: String,
    api_url: String,
    http: reqwest::Client,
}

impl GithubRepoHost {
    pub fn new(owner: impl Into<String>, token: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            token: token.into(),
            api_url: api_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn authed_url(&self, repo: &str) -> String {
        format!("https://{}:{}@github.com/{}/{repo}.git", self.owner, self.token, self.owner)
    }

    fn repo_err(err: anyhow::Error) -> PipelineError {
        PipelineError::external(Provider::Repo, StatusClass::Unexpected, err.to_string())
    }
}

#[async_trait]
impl RepoHost for GithubRepoHost {
    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoCreated, PipelineError> {
        let body = json!({
            "name": name,
            "description": description,
            "private": false,
            "auto_init": true,
        });
        let resp = self
            .http
            .post(format!("{}/user/repos", self.api_url))
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "atelier")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external(Provider::Repo, StatusClass::Transport, e.to_string()))?;

        let status = resp.status().as_u16();
        let created = RepoCreated {
            owner: self.owner.clone(),
            repo: name.to_string(),
            url: format!("https://github.com/{}/{name}", self.owner),
            reused: false,
        };
        match status {
            200..=299 => Ok(created),
            // Already exists: reuse it.
            409 | 422 => {
                info!(repo = name, "repository already exists, reusing");
                Ok(RepoCreated { reused: true, ..created })
            }
            _ => {
                let text = resp.text().await.unwrap_or_default();
                Err(PipelineError::external(
                    Provider::Repo,
                    StatusClass::from_http(status),
                    text,
                ))
            }
        }
    }

    async fn clone_repo(&self, repo: &str, dest: &Path) -> Result<(), PipelineError> {
        Git::clone_shallow(&self.authed_url(repo), dest).map_err(Self::repo_err)
    }

    async fn set_identity(&self, dir: &Path, name: &str, email: &str) -> Result<(), PipelineError> {
        Git::set_identity(dir, name, email).map_err(Self::repo_err)
    }

    async fn push_all(&self, dir: &Path, repo: &str, message: &str) -> Result<bool, PipelineError> {
        let changed = Git::commit_all(dir, message).map_err(Self::repo_err)?;
        Git::push_head(dir, &self.authed_url(repo), "main").map_err(Self::repo_err)?;
        Ok(changed)
    }
}
