//! Project persistence
//!
//! Providers and the bootstrap orchestrator mutate a [`Project`] in memory
//! and hand it to a [`ProjectStore`] after every committed change.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::project::Project;
use crate::{Error, Result};

/// Persists the current state of a project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Persist `project`, replacing whatever was stored before
    async fn persist(&self, project: &Project) -> Result<()>;
}

/// Stores a project as pretty-printed JSON in a single file
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the project stored in the file
    pub async fn load(&self) -> Result<Project> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::persistence(&self.path, format!("failed to read: {}", e)))?;
        let project: Project = serde_json::from_str(&data)?;
        project.validate()?;
        Ok(project)
    }
}

#[async_trait]
impl ProjectStore for JsonFileStore {
    async fn persist(&self, project: &Project) -> Result<()> {
        let data = serde_json::to_string_pretty(project)?;

        // Write next to the target and rename so readers never see a torn file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::persistence(&tmp, format!("failed to write: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::persistence(&self.path, format!("failed to replace: {}", e)))?;

        debug!(project = %project.name, path = %self.path.display(), "Project persisted");
        Ok(())
    }
}

/// Keeps every persisted snapshot in memory
///
/// Used by the local k3d back end and by tests that assert on what was
/// committed and when.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<Vec<Project>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every persisted snapshot, oldest first
    pub fn snapshots(&self) -> Vec<Project> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// The most recently persisted snapshot
    pub fn latest(&self) -> Option<Project> {
        self.snapshots().pop()
    }

    /// Number of persisted snapshots
    pub fn persist_count(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn persist(&self, project: &Project) -> Result<()> {
        self.snapshots
            .lock()
            .map_err(|_| Error::persistence("<memory>", "snapshot lock poisoned"))?
            .push(project.clone());
        Ok(())
    }
}
