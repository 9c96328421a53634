//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Project(#[from] ertia_common::Error),

    #[error(transparent)]
    Install(#[from] ertia_k3s::K3sError),

    #[error(transparent)]
    Provider(#[from] ertia_provider::Error),

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// What the operator should do next, when the error says
    pub fn hint(&self) -> Option<&'static str> {
        let (topology, retryable) = match self {
            Error::Project(e) => (e.is_topology(), e.is_retryable()),
            Error::Provider(ertia_provider::Error::Common(e)) => {
                (e.is_topology(), e.is_retryable())
            }
            Error::Provider(e) => (false, e.is_retryable()),
            Error::Install(_) | Error::Validation { .. } => (false, false),
        };
        if topology {
            Some("mark exactly one live node as master in the project file")
        } else if retryable {
            Some("the failure looks transient, run the command again later")
        } else {
            None
        }
    }
}
