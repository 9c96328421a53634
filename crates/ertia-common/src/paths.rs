//! Local ertia state stored at `~/.ertia/`.
//!
//! - `~/.ertia/keys/` — private keys tried when connecting to nodes (`*.pub`
//!   companions are ignored)
//! - `~/.ertia/kube/config` — admin kubeconfig fetched from the master
//!
//! The root can be moved with the `ERTIA_HOME` environment variable.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

const HOME_DIR_NAME: &str = ".ertia";
const KEYS_DIR_NAME: &str = "keys";
const KUBE_DIR_NAME: &str = "kube";
const KUBECONFIG_FILE_NAME: &str = "config";

/// Environment variable overriding the ertia home directory
pub const ERTIA_HOME_ENV: &str = "ERTIA_HOME";

/// Well-known local paths
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErtiaPaths {
    root: PathBuf,
}

impl ErtiaPaths {
    /// Use `root` as the ertia home directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the home directory: `$ERTIA_HOME`, then `~/.ertia`
    pub fn resolve() -> Result<Self> {
        if let Ok(root) = std::env::var(ERTIA_HOME_ENV) {
            if !root.is_empty() {
                return Ok(Self::new(root));
            }
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Paths("could not determine home directory".to_string()))?;
        Ok(Self::new(home.join(HOME_DIR_NAME)))
    }

    /// The ertia home directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding private keys
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR_NAME)
    }

    /// Directory holding fetched kubeconfigs
    pub fn kube_dir(&self) -> PathBuf {
        self.root.join(KUBE_DIR_NAME)
    }

    /// Path of the admin kubeconfig
    pub fn kubeconfig(&self) -> PathBuf {
        self.kube_dir().join(KUBECONFIG_FILE_NAME)
    }

    /// Create the keys and kube directories if they don't exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.keys_dir(), self.kube_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::persistence(&dir, format!("failed to create: {}", e)))?;
        }
        Ok(())
    }
}
