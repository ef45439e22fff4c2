use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::Pipeline;

/// Atomic JSON snapshot of the whole pipeline registry.
///
/// The on-disk layout is a single object mapping pipeline id → Pipeline.
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save the registry atomically (write to .tmp, sync, then rename).
    pub fn save(&self, pipelines: &HashMap<String, Pipeline>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create store dir {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("create {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, pipelines).context("serialize pipelines")?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename {} into place", tmp_path.display()))?;
        Ok(())
    }

    /// Load the registry. A missing file is an empty registry; a corrupt
    /// file is a hard error.
    pub fn load(&self) -> Result<HashMap<String, Pipeline>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("corrupt store file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, Pipeline, TokenUsage};

    fn sample(id: &str, phase: Phase) -> Pipeline {
        let mut p = Pipeline::new(
            id.to_string(),
            "demo".into(),
            "a demo project".into(),
            PathBuf::from(format!("/tmp/ws/{id}")),
        );
        p.phase = phase;
        p.token_usage = TokenUsage { input_tokens: 42, output_tokens: 7 };
        p.artifacts.insert("analysis".into(), serde_json::json!({"type": "static"}));
        p
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("pipelines.json"));

        let mut pipelines = HashMap::new();
        pipelines.insert("aaa".to_string(), sample("aaa", Phase::Development));
        pipelines.insert("bbb".to_string(), sample("bbb", Phase::Completed));
        store.save(&pipelines).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        let a = &loaded["aaa"];
        assert_eq!(a.phase, Phase::Development);
        assert_eq!(a.token_usage.input_tokens, 42);
        assert_eq!(a.artifacts["analysis"]["type"], "static");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Store::new(path).load().is_err());
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("deep/nested/pipelines.json"));
        store.save(&HashMap::new()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
