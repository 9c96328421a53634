//! Error types for the project model
//!
//! Errors carry the project or node they are about so that the message a
//! driver logs is enough to find the offending entry in the project file.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Errors raised by the project model and its persistence
#[derive(Debug, Error)]
pub enum Error {
    /// The project failed validation
    #[error("validation error for {project}: {message}")]
    Validation {
        /// Name of the project with invalid content
        project: String,
        /// Description of what's invalid
        message: String,
    },

    /// A node lookup by name found nothing
    #[error("node not found: {name}")]
    NodeNotFound {
        /// Name that was looked up
        name: String,
    },

    /// No node is marked as master
    #[error("no master node: exactly one node must have isMaster set")]
    NoMaster,

    /// More than one node is marked as master
    #[error("multiple master nodes ({}): exactly one node must have isMaster set", names.join(", "))]
    MultipleMasters {
        /// Names of every node claiming to be master
        names: Vec<String>,
    },

    /// The project has no SSH key configured
    #[error("project {project} has no SSH key")]
    MissingKey {
        /// Name of the project
        project: String,
    },

    /// Reading or writing the project file failed
    #[error("persistence error for {}: {message}", path.display())]
    Persistence {
        /// File being read or written
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Encoding or decoding a project failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local paths could not be resolved
    #[error("path error: {0}")]
    Paths(String),
}

impl Error {
    /// Create a validation error without project context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            project: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named project
    pub fn validation_for(project: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            project: project.into(),
            message: msg.into(),
        }
    }

    /// Create a node-not-found error
    pub fn node_not_found(name: impl Into<String>) -> Self {
        Self::NodeNotFound { name: name.into() }
    }

    /// Create a persistence error for a file
    pub fn persistence(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Whether this error describes a broken cluster topology
    pub fn is_topology(&self) -> bool {
        matches!(self, Error::NoMaster | Error::MultipleMasters { .. })
    }

    /// Check if this error is retryable
    ///
    /// Only persistence failures may succeed on a second attempt; everything
    /// else needs the project file to be fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence { .. })
    }
}
