use std::{io::ErrorKind, path::PathBuf};

use anyhow::Context;
use async_trait::async_trait;

/// Named-blob persistence for the settings document.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored under `name` yet.
    async fn get(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn set(&self, name: &str, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.xml"))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn set(&self, name: &str, payload: &[u8]) -> anyhow::Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
