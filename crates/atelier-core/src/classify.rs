use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::types::ProjectType;

#[allow(clippy::expect_used)]
fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("classifier pattern is valid"))
}

fn python_hints() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(
        &RE,
        r"(?i)\b(python|flask|fastapi|django|pandas|scraper|bot|cron|daemon|trading|ia|ml)\b|data.?sci|machine.?learn",
    )
}

fn worker_hints() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?i)\b(bot|scraper|cron|daemon|worker)\b")
}

fn spa_hints() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?i)\b(react|vue|svelte|angular|vite|next|nuxt|remix)\b")
}

fn stack_field(analysis: &Value, key: &str) -> String {
    analysis
        .get("stack")
        .and_then(|s| s.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

fn is_meaningful(field: &str) -> bool {
    let field = field.trim();
    !field.is_empty() && !matches!(field, "none" | "no" | "n/a" | "null" | "aucun" | "-")
}

/// Map an analysis artifact to a project type. The explicit `type` field
/// wins; otherwise the stack and summary are inspected, first match wins.
pub fn classify(analysis: &Value) -> ProjectType {
    if let Some(t) = analysis.get("type").and_then(Value::as_str) {
        if let Some(known) = ProjectType::from_str(t) {
            return known;
        }
    }

    let backend = stack_field(analysis, "backend");
    let frontend = stack_field(analysis, "frontend");
    let summary = analysis
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    let node_backend = backend.contains("node") || backend.contains("express");
    if backend.contains("python") || (!node_backend && python_hints().is_match(&summary)) {
        return ProjectType::PythonWorker;
    }
    if node_backend && worker_hints().is_match(&summary) {
        return ProjectType::NodeWorker;
    }

    let has_backend = is_meaningful(&backend) && !backend.contains("static");
    let has_frontend = is_meaningful(&frontend);

    if !has_backend && has_frontend && spa_hints().is_match(&frontend) {
        return ProjectType::Spa;
    }
    if !has_backend {
        return ProjectType::Static;
    }
    if !has_frontend {
        return ProjectType::Api;
    }
    ProjectType::Fullstack
}
