//! Error types for the remote install protocol
//!
//! A target that cannot be reached yet is not an error: it is reported as
//! [`Attempt::NotReady`](crate::Attempt::NotReady). Everything in here is a
//! hard failure that callers must not retry blindly.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while installing K3S on a node
#[derive(Debug, Error)]
pub enum K3sError {
    /// Local configuration prevents any attempt (no keys, no address, ...)
    #[error("install configuration error: {0}")]
    Config(String),

    /// The master returned an empty join token
    #[error("node {node} returned an empty join token")]
    EmptyToken {
        /// Node the token was read from
        node: String,
    },

    /// Uploading the installer failed
    #[error("upload to {path} failed: {message}")]
    Upload {
        /// Remote destination
        path: String,
        /// Captured output or transport error
        message: String,
    },

    /// A remote command exited unsuccessfully
    #[error("command failed: {command} - {output}")]
    CommandFailed {
        /// Redacted description of the command
        command: String,
        /// Captured stdout and stderr
        output: String,
    },

    /// A remote command did not finish in time
    #[error("command timed out after {after:?}: {command}{}", partial_output(.output))]
    Timeout {
        /// Redacted description of the command
        command: String,
        /// The timeout that elapsed
        after: Duration,
        /// Stdout and stderr captured before the command was killed
        output: String,
    },

    /// The admin kubeconfig could not be parsed or rewritten
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Loading or verifying the installer artifact failed
    #[error("installer artifact error: {0}")]
    Artifact(String),

    /// Local file I/O failed
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Spawning the local ssh client failed
    #[error("failed to run ssh: {0}")]
    Spawn(#[source] std::io::Error),
}

fn partial_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(" - {}", output)
    }
}

impl K3sError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an artifact error
    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }

    /// Create a kubeconfig error
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create an I/O error for a local file
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure comes from local configuration rather than the node
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            K3sError::Config(_) | K3sError::EmptyToken { .. } | K3sError::Artifact(_)
        )
    }
}
