use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PipelineError, Provider, StatusClass};

#[derive(Debug, Clone)]
pub struct DeployProject {
    pub project_id: String,
    pub environment_id: String,
}

#[derive(Debug, Clone)]
pub struct DeployApplication {
    pub application_id: String,
    pub app_name: String,
}

#[derive(Debug, Clone)]
pub struct ApplicationSpec {
    pub name: String,
    pub project_id: String,
    pub environment_id: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub build_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub status: DeploymentStatus,
    pub log: Option<String>,
}

/// Deployment-platform adapter.
#[async_trait]
pub trait DeployHost: Send + Sync {
    async fn create_project(&self, name: &str, description: &str) -> Result<DeployProject, PipelineError>;
    async fn create_application(&self, spec: &ApplicationSpec) -> Result<DeployApplication, PipelineError>;
    /// Returns the created domain host.
    async fn create_domain(&self, application_id: &str, host: &str, port: u16) -> Result<String, PipelineError>;
    async fn trigger_deploy(&self, application_id: &str) -> Result<(), PipelineError>;
    async fn latest_deployment(&self, application_id: &str) -> Result<Deployment, PipelineError>;
    async fn build_logs(&self, application_id: &str) -> Result<String, PipelineError>;
}

/// HTTP implementation against a Dokploy-style API.
pub struct HttpDeployHost {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl HttpDeployHost {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, PipelineError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external(Provider::Deploy, StatusClass::Transport, e.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::external(Provider::Deploy, StatusClass::from_http(status), text));
        }
        resp.json()
            .await
            .map_err(|e| PipelineError::external(Provider::Deploy, StatusClass::Transport, e.to_string()))
    }

    fn str_field(value: &Value, keys: &[&str]) -> String {
        keys.iter()
            .find_map(|k| value.get(k).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl DeployHost for HttpDeployHost {
    async fn create_project(&self, name: &str, description: &str) -> Result<DeployProject, PipelineError> {
        let v = self
            .post("/api/project.create", json!({"name": name, "description": description}))
            .await?;
        Ok(DeployProject {
            project_id: Self::str_field(&v, &["projectId", "id"]),
            environment_id: Self::str_field(&v, &["environmentId", "defaultEnvironmentId"]),
        })
    }

    async fn create_application(&self, spec: &ApplicationSpec) -> Result<DeployApplication, PipelineError> {
        let v = self
            .post(
                "/api/application.create",
                json!({
                    "name": spec.name,
                    "projectId": spec.project_id,
                    "environmentId": spec.environment_id,
                    "owner": spec.owner,
                    "repository": spec.repo,
                    "branch": spec.branch,
                    "buildType": spec.build_type,
                }),
            )
            .await?;
        Ok(DeployApplication {
            application_id: Self::str_field(&v, &["applicationId", "id"]),
            app_name: Self::str_field(&v, &["appName", "name"]),
        })
    }

    async fn create_domain(&self, application_id: &str, host: &str, port: u16) -> Result<String, PipelineError> {
        let v = self
            .post(
                "/api/domain.create",
                json!({"applicationId": application_id, "host": host, "port": port, "https": true}),
            )
            .await?;
        let created = Self::str_field(&v, &["host"]);
        Ok(if created.is_empty() { host.to_string() } else { created })
    }

    async fn trigger_deploy(&self, application_id: &str) -> Result<(), PipelineError> {
        self.post("/api/application.deploy", json!({"applicationId": application_id}))
            .await?;
        Ok(())
    }

    async fn latest_deployment(&self, application_id: &str) -> Result<Deployment, PipelineError> {
        let v = self
            .post("/api/deployment.latest", json!({"applicationId": application_id}))
            .await?;
        let status = match Self::str_field(&v, &["status"]).as_str() {
            "done" => DeploymentStatus::Done,
            "error" => DeploymentStatus::Error,
            "running" => DeploymentStatus::Running,
            _ => DeploymentStatus::Queued,
        };
        let log = v.get("log").and_then(Value::as_str).map(str::to_string);
        Ok(Deployment { status, log })
    }

    async fn build_logs(&self, application_id: &str) -> Result<String, PipelineError> {
        let v = self
            .post("/api/deployment.logs", json!({"applicationId": application_id}))
            .await?;
        Ok(Self::str_field(&v, &["logs", "log"]))
    }
}
