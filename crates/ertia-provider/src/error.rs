//! Error types for providers and the bootstrap orchestrator

use std::time::Duration;

use ertia_k3s::K3sError;
use thiserror::Error;

/// Errors raised by back ends and the bootstrap orchestrator
#[derive(Debug, Error)]
pub enum Error {
    /// The infrastructure API rejected a request or could not be reached
    #[error("{provider} API error{}: {message}", fmt_status(.status))]
    Api {
        /// Back end name
        provider: &'static str,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Error message from the API or the transport
        message: String,
    },

    /// Project model or persistence error
    #[error(transparent)]
    Common(#[from] ertia_common::Error),

    /// Installing K3S on a node failed
    #[error("K3S install on node {node} failed: {source}")]
    Install {
        /// Node being installed
        node: String,
        /// Underlying install failure
        #[source]
        source: K3sError,
    },

    /// A node stayed unreachable until the retry budget ran out
    #[error("node {node} not reachable after {attempts} attempts in {elapsed:?}")]
    ConvergenceTimedOut {
        /// Last node reported not ready
        node: String,
        /// Passes that ended in not-ready
        attempts: u32,
        /// Time spent converging
        elapsed: Duration,
    },

    /// Nodes are pending but nothing can make progress
    #[error("bootstrap stalled, waiting on a master that is not ready: {}", .pending.join(", "))]
    Stalled {
        /// Nodes that still require K3S
        pending: Vec<String>,
    },

    /// Invalid back end or project configuration
    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl Error {
    /// Create an API error
    pub fn api(provider: &'static str, status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Api {
            provider,
            status,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an install failure for `node`
    pub fn install(node: impl Into<String>, source: K3sError) -> Self {
        Self::Install {
            node: node.into(),
            source,
        }
    }

    /// Whether retrying the whole operation later might succeed
    ///
    /// Transport failures, rate limiting and server errors are retryable;
    /// configuration, topology and install failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Error::Common(e) => e.is_retryable(),
            Error::ConvergenceTimedOut { .. } => true,
            Error::Install { .. } | Error::Stalled { .. } | Error::Config(_) => false,
        }
    }
}
