use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use atelier_core::agent::ToolName;

use crate::llm::ToolDef;

/// Wall-clock limit for one `bash` invocation.
pub const BASH_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes the four core tools inside one pipeline workspace. Every path
/// is clamped to the workspace root; failures come back as tool-result
/// text, never as errors.
pub struct ToolExecutor {
    root: PathBuf,
    bash_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), bash_timeout: BASH_TIMEOUT }
    }

    pub fn with_bash_timeout(mut self, timeout: Duration) -> Self {
        self.bash_timeout = timeout;
        self
    }

    /// Tool catalog sent to the model, optionally restricted to a subset.
    pub fn definitions(allowed: Option<&[ToolName]>) -> Vec<ToolDef> {
        ToolName::ALL
            .iter()
            .filter(|name| allowed.map_or(true, |set| set.contains(*name)))
            .map(|name| match name {
                ToolName::ReadFile => ToolDef {
                    name: "read_file".into(),
                    description: "Read a UTF-8 file from the workspace.".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"path": {"type": "string"}},
                        "required": ["path"]
                    }),
                },
                ToolName::WriteFile => ToolDef {
                    name: "write_file".into(),
                    description: "Create or overwrite a file; parent directories are created.".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "path": {"type": "string"},
                            "content": {"type": "string"}
                        },
                        "required": ["path", "content"]
                    }),
                },
                ToolName::ListDir => ToolDef {
                    name: "list_dir".into(),
                    description: "List a directory, one entry per line.".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"path": {"type": "string"}},
                        "required": ["path"]
                    }),
                },
                ToolName::Bash => ToolDef {
                    name: "bash".into(),
                    description: "Run a shell command in the workspace (60 second limit).".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"command": {"type": "string"}},
                        "required": ["command"]
                    }),
                },
            })
            .collect()
    }

    /// Clamp a model-supplied path inside the workspace. Absolute paths
    /// and `..` segments are stripped rather than rejected.
    fn resolve(&self, raw: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in Path::new(raw).components() {
            if let Component::Normal(part) = component {
                resolved.push(part);
            }
        }
        resolved
    }

    pub async fn execute(&self, name: &str, input: &Value, cancel: &CancellationToken) -> String {
        match name {
            "read_file" => {
                let Some(path) = input.get("path").and_then(Value::as_str) else {
                    return "missing `path` argument".into();
                };
                match tokio::fs::read_to_string(self.resolve(path)).await {
                    Ok(content) => content,
                    Err(e) => format!("could not read {path}: {e}"),
                }
            }
            "write_file" => {
                let Some(path) = input.get("path").and_then(Value::as_str) else {
                    return "missing `path` argument".into();
                };
                let Some(content) = input.get("content").and_then(Value::as_str) else {
                    return "missing `content` argument".into();
                };
                let resolved = self.resolve(path);
                if let Some(parent) = resolved.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return format!("could not create directories for {path}: {e}");
                    }
                }
                match tokio::fs::write(&resolved, content).await {
                    Ok(()) => format!("wrote {} bytes to {path}", content.len()),
                    Err(e) => format!("could not write {path}: {e}"),
                }
            }
            "list_dir" => {
                let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
                let mut entries = match tokio::fs::read_dir(self.resolve(path)).await {
                    Ok(rd) => rd,
                    Err(e) => return format!("could not list {path}: {e}"),
                };
                let mut lines = Vec::new();
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let kind = match entry.file_type().await {
                        Ok(t) if t.is_dir() => "[dir] ",
                        _ => "[file]",
                    };
                    lines.push(format!("{kind} {}", entry.file_name().to_string_lossy()));
                }
                lines.sort();
                if lines.is_empty() {
                    "(empty)".into()
                } else {
                    lines.join("\n")
                }
            }
            "bash" => {
                let Some(command) = input.get("command").and_then(Value::as_str) else {
                    return "missing `command` argument".into();
                };
                self.run_bash(command, cancel).await
            }
            other => format!("unknown_tool: {other}"),
        }
    }

    async fn run_bash(&self, command: &str, cancel: &CancellationToken) -> String {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => return format!("failed to spawn shell: {e}"),
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return "failed to capture shell output".into();
        };
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let deadline = tokio::time::Instant::now() + self.bash_timeout;
        let mut collected = String::new();
        let mut out_done = false;
        let mut err_done = false;
        let mut timed_out = false;
        let mut cancelled = false;

        // Capture output incrementally so a timeout still returns the
        // partial stdout/stderr.
        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(l)) => {
                        collected.push_str(&l);
                        collected.push('\n');
                    }
                    _ => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(l)) => {
                        collected.push_str(&l);
                        collected.push('\n');
                    }
                    _ => err_done = true,
                },
                () = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }

        if timed_out || cancelled {
            if let Err(e) = child.start_kill() {
                warn!("could not kill shell: {e}");
            }
            if cancelled {
                collected.push_str("[cancelled — process terminated]");
            } else {
                collected.push_str(&format!(
                    "[timed out ({}s elapsed) — process terminated]",
                    self.bash_timeout.as_secs()
                ));
            }
            return collected;
        }

        match child.wait().await {
            Ok(status) if !status.success() => {
                collected.push_str(&format!("[exit code: {}]", status.code().unwrap_or(1)));
            }
            Err(e) => collected.push_str(&format!("[wait failed: {e}]")),
            Ok(_) => {}
        }
        if collected.is_empty() {
            "(no output)".into()
        } else {
            collected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(dir: &Path) -> ToolExecutor {
        ToolExecutor::new(dir)
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let cancel = CancellationToken::new();

        let out = exec
            .execute("write_file", &json!({"path": "src/index.html", "content": "<html>"}), &cancel)
            .await;
        assert!(out.contains("wrote 6 bytes"));

        let content = exec
            .execute("read_file", &json!({"path": "src/index.html"}), &cancel)
            .await;
        assert_eq!(content, "<html>");
    }

    #[tokio::test]
    async fn paths_are_clamped_into_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let cancel = CancellationToken::new();

        exec.execute(
            "write_file",
            &json!({"path": "../../etc/escape.txt", "content": "nope"}),
            &cancel,
        )
        .await;
        assert!(dir.path().join("etc/escape.txt").exists());
        assert!(!dir.path().parent().unwrap().join("etc/escape.txt").exists());

        exec.execute("write_file", &json!({"path": "/absolute.txt", "content": "x"}), &cancel)
            .await;
        assert!(dir.path().join("absolute.txt").exists());
    }

    #[tokio::test]
    async fn list_dir_marks_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();
        let exec = executor(dir.path());

        let out = exec
            .execute("list_dir", &json!({"path": "."}), &CancellationToken::new())
            .await;
        assert!(out.contains("[dir]  css"));
        assert!(out.contains("[file] index.html"));
    }

    #[tokio::test]
    async fn bash_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let out = exec
            .execute("bash", &json!({"command": "echo oops >&2; exit 3"}), &CancellationToken::new())
            .await;
        assert!(out.contains("oops"));
        assert!(out.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn bash_timeout_returns_partial_output_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path()).with_bash_timeout(Duration::from_millis(300));
        let out = exec
            .execute("bash", &json!({"command": "echo before; sleep 5; echo after"}), &CancellationToken::new())
            .await;
        assert!(out.contains("before"));
        assert!(!out.contains("after"));
        assert!(out.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_terminates_bash() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = exec.execute("bash", &json!({"command": "sleep 5"}), &cancel).await;
        assert!(out.contains("[cancelled"));
    }

    #[tokio::test]
    async fn unknown_tools_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let out = exec.execute("edit_file", &json!({}), &CancellationToken::new()).await;
        assert_eq!(out, "unknown_tool: edit_file");
    }

    #[test]
    fn definitions_respect_the_allowed_subset() {
        let all = ToolExecutor::definitions(None);
        assert_eq!(all.len(), 4);
        let restricted = ToolExecutor::definitions(Some(&[ToolName::ReadFile, ToolName::ListDir]));
        let names: Vec<&str> = restricted.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "list_dir"]);
        assert!(ToolExecutor::definitions(Some(&[])).is_empty());
    }
}
