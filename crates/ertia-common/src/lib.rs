//! Common types for ertia: the project model, errors, persistence and paths
//!
//! A [`Project`] is the aggregate root. It owns an ordered list of [`Node`]s,
//! the SSH key registered with the infrastructure back end and the optional
//! wildcard DNS configuration. Everything that provisions or bootstraps a
//! cluster reads and mutates a `Project` and hands it to a [`ProjectStore`]
//! to persist the result.

#![deny(missing_docs)]

pub mod dependency;
pub mod dns;
pub mod error;
pub mod key;
pub mod node;
pub mod paths;
pub mod project;
pub mod secret;
pub mod store;

pub use dependency::{Dependency, DependencyStatus, K3S_DEPENDENCY};
pub use dns::{DnsConfig, DnsStatus};
pub use error::Error;
pub use key::{KeyStatus, SshKey};
pub use node::{Node, NodeStatus};
pub use paths::ErtiaPaths;
pub use project::{find_master, Project};
pub use secret::Secret;
pub use store::{JsonFileStore, MemoryStore, ProjectStore};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
