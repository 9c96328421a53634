//! The K3S installer script shipped to every node
//!
//! The artifact is loaded once at startup from a local file or an HTTP(S)
//! URL and identified by the SHA-256 of its bytes. Pinning a digest makes
//! startup fail if the loaded script is not the one expected.

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::K3sError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Versioned, content-addressed installer script
#[derive(Clone)]
pub struct InstallerArtifact {
    version: String,
    digest: String,
    script: Vec<u8>,
}

impl std::fmt::Debug for InstallerArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallerArtifact")
            .field("version", &self.version)
            .field("digest", &self.digest)
            .field("len", &self.script.len())
            .finish()
    }
}

impl InstallerArtifact {
    /// Wrap an in-memory script
    pub fn from_bytes(version: impl Into<String>, script: impl Into<Vec<u8>>) -> Self {
        let script = script.into();
        let digest = hex::encode(Sha256::digest(&script));
        Self {
            version: version.into(),
            digest,
            script,
        }
    }

    /// Read the script from a local file
    pub async fn from_file(version: impl Into<String>, path: &Path) -> Result<Self, K3sError> {
        let script = tokio::fs::read(path)
            .await
            .map_err(|e| K3sError::io(path, e))?;
        if script.is_empty() {
            return Err(K3sError::artifact(format!(
                "installer {} is empty",
                path.display()
            )));
        }
        debug!(path = %path.display(), "Loaded installer from file");
        Ok(Self::from_bytes(version, script))
    }

    /// Download the script over HTTP(S)
    pub async fn fetch(version: impl Into<String>, url: &str) -> Result<Self, K3sError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| K3sError::artifact(format!("failed to build HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| K3sError::artifact(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(K3sError::artifact(format!(
                "failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let script = response
            .bytes()
            .await
            .map_err(|e| K3sError::artifact(format!("failed to read {}: {}", url, e)))?;
        if script.is_empty() {
            return Err(K3sError::artifact(format!("installer at {} is empty", url)));
        }
        info!(url = %url, bytes = script.len(), "Fetched installer");
        Ok(Self::from_bytes(version, script.to_vec()))
    }

    /// Load from a URL if `source` looks like one, from a file otherwise
    pub async fn load(version: impl Into<String>, source: &str) -> Result<Self, K3sError> {
        if source.starts_with("https://") || source.starts_with("http://") {
            Self::fetch(version, source).await
        } else {
            Self::from_file(version, Path::new(source)).await
        }
    }

    /// Fail unless the script's digest equals `expected` (hex, any case)
    pub fn verify(&self, expected: &str) -> Result<(), K3sError> {
        if self.digest.eq_ignore_ascii_case(expected.trim()) {
            Ok(())
        } else {
            Err(K3sError::artifact(format!(
                "installer digest mismatch: expected {}, got {}",
                expected.trim(),
                self.digest
            )))
        }
    }

    /// Release the script is known as
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Hex SHA-256 of the script
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Script contents
    pub fn bytes(&self) -> &[u8] {
        &self.script
    }
}
