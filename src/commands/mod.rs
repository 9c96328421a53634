//! CLI commands

use std::path::{Path, PathBuf};

use ertia_common::{ErtiaPaths, JsonFileStore, Project};
use tracing::debug;

use crate::Result;

pub mod status;
pub mod sync;
pub mod validate;

/// Open the project file and load the validated project from it
pub async fn open_project(path: &Path) -> Result<(JsonFileStore, Project)> {
    let store = JsonFileStore::new(path);
    let project = store.load().await?;
    debug!(project = %project.name, nodes = project.nodes.len(), "Project loaded");
    Ok((store, project))
}

/// Use `home` as the ertia home directory, or resolve the default one
pub fn resolve_paths(home: Option<&PathBuf>) -> Result<ErtiaPaths> {
    match home {
        Some(root) => Ok(ErtiaPaths::new(root)),
        None => Ok(ErtiaPaths::resolve()?),
    }
}
