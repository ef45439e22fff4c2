use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// External catalog entry used to bias the Architect's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub title: String,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Best-effort catalog lookup; implementations never fail, they return an
/// empty list instead.
#[async_trait]
pub trait SkillsCatalog: Send + Sync {
    async fn find_for_context(&self, keywords: &[String], limit: usize) -> Vec<Skill>;
}

/// HTTP catalog. An empty base URL disables lookup entirely.
pub struct HttpSkillsCatalog {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSkillsCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }
}

#[async_trait]
impl SkillsCatalog for HttpSkillsCatalog {
    async fn find_for_context(&self, keywords: &[String], limit: usize) -> Vec<Skill> {
        if self.base_url.is_empty() || keywords.is_empty() {
            return Vec::new();
        }
        let query = keywords.join(" ");
        let result = self
            .http
            .get(format!("{}/api/search", self.base_url))
            .query(&[("q", query.as_str()), ("limit", &limit.to_string())])
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("skills lookup failed: {e}");
                return Vec::new();
            }
        };
        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "skills lookup rejected");
            return Vec::new();
        }
        let value: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("skills response unreadable: {e}");
                return Vec::new();
            }
        };
        value
            .get("results")
            .or(Some(&value))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(Skill {
                            title: item.get("title")?.as_str()?.to_string(),
                            href: item.get("href")?.as_str()?.to_string(),
                            content: item.get("content").and_then(Value::as_str).map(str::to_string),
                        })
                    })
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }
}
