use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Thin wrapper over the `git` CLI, scoped to one working directory.
pub struct Git;

impl Git {
    pub fn exec(dir: &Path, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git -C {} {}", dir.display(), args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    /// Shallow-clone `url` into `dest` (which may not exist yet).
    pub fn clone_shallow(url: &str, dest: &Path) -> Result<()> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let dest_str = dest.to_string_lossy();
        let result = Self::exec(parent, &["clone", "--depth", "1", url, &dest_str])?;
        if !result.success() {
            return Err(anyhow!("git clone into {dest_str} failed: {}", result.combined_output()));
        }
        Ok(())
    }

    pub fn set_identity(dir: &Path, name: &str, email: &str) -> Result<()> {
        for (key, value) in [("user.name", name), ("user.email", email)] {
            let result = Self::exec(dir, &["config", key, value])?;
            if !result.success() {
                return Err(anyhow!("git config {key} failed: {}", result.combined_output()));
            }
        }
        Ok(())
    }

    /// Stage everything and commit. Returns false when there was nothing
    /// to commit.
    pub fn commit_all(dir: &Path, message: &str) -> Result<bool> {
        let add = Self::exec(dir, &["add", "-A"])?;
        if !add.success() {
            return Err(anyhow!("git add -A failed: {}", add.combined_output()));
        }

        let status = Self::exec(dir, &["status", "--porcelain"])?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }

        let result = Self::exec(dir, &["commit", "-m", message])?;
        if !result.success() {
            return Err(anyhow!("git commit failed: {}", result.combined_output()));
        }
        Ok(true)
    }

    /// Push HEAD to `remote_url` (which may embed credentials).
    pub fn push_head(dir: &Path, remote_url: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:{branch}");
        let result = Self::exec(dir, &["push", remote_url, &refspec])?;
        if !result.success() {
            return Err(anyhow!("git push failed: {}", result.combined_output()));
        }
        Ok(())
    }

    pub fn is_repo(dir: &Path) -> bool {
        dir.join(".git").exists()
    }
}
