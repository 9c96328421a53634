//! Infrastructure back ends and cluster bootstrap
//!
//! A back end provides three capabilities, each behind its own trait:
//!
//! - [`NodeProvider`]: create, delete, stop, start, restart and replace
//!   servers, and bootstrap K3S on them
//! - [`KeyProvider`]: register the project's SSH key
//! - [`DnsProvider`]: point a wildcard record at the cluster's ingress
//!
//! # Supported back ends
//!
//! - [`HetznerProvider`]: Hetzner Cloud
//! - [`GlesysProvider`]: GleSYS
//! - [`K3dProvider`]: local k3d clusters, where nodes ship with K3S
//!
//! [`Backend`] selects one of them at startup. Every operation takes the
//! project by `&mut` and persists what it changed through a
//! [`ProjectStore`](ertia_common::ProjectStore).

#![deny(missing_docs)]

use async_trait::async_trait;
use ertia_common::{DependencyStatus, Node, NodeStatus, Project, ProjectStore, SshKey};
#[cfg(test)]
use mockall::automock;
use tracing::warn;

pub mod backend;
pub mod bootstrap;
pub mod driver;
pub mod error;
pub mod glesys;
pub mod hetzner;
pub mod k3d;
pub mod retry;

pub use backend::{Backend, BackendKind};
pub use bootstrap::ClusterBootstrapper;
pub use driver::{reconcile, ReconcileSummary};
pub use error::Error;
pub use glesys::GlesysProvider;
pub use hetzner::HetznerProvider;
pub use k3d::K3dProvider;
pub use retry::ConvergencePolicy;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Manages the lifecycle of a project's nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// Back end name
    fn name(&self) -> &'static str;

    /// Provision the named node
    ///
    /// On success the node is Active, carries its provider id, addresses and
    /// install credentials, and requires K3S. On failure it is Failing with
    /// the error recorded.
    async fn create_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Remove the server behind the node and mark it Deleted
    async fn delete_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Reboot the node, keeping its status
    async fn restart_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Power the node off and mark it Stopped
    async fn stop_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Power the node on and mark it Active
    async fn start_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Provision the node again
    async fn replace_node(&self, project: &mut Project, node: &str) -> Result<()>;

    /// Create every New node in declaration order, stopping at the first failure
    async fn sync_nodes(&self, project: &mut Project) -> Result<()> {
        let new_nodes: Vec<String> = project
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::New)
            .map(|n| n.name.clone())
            .collect();

        for name in new_nodes {
            self.create_node(project, &name).await?;
        }
        Ok(())
    }

    /// Bring every node's dependencies to Ready
    async fn sync_dependencies(&self, project: &mut Project) -> Result<()>;
}

/// Manages the project's SSH key at the back end
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Register the project key
    async fn create_key(&self, project: &mut Project) -> Result<()>;

    /// Remove the project key and mark it Deleted
    async fn delete_key(&self, project: &mut Project) -> Result<()>;

    /// Register the key if it is still New
    async fn sync_keys(&self, project: &mut Project) -> Result<()>;
}

/// Manages the cluster's wildcard DNS record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Back end name
    fn name(&self) -> &'static str;

    /// Point the wildcard record at the ingress node, if it needs adapting
    async fn create_record(&self, project: &mut Project) -> Result<()>;
}

/// Apply `change` to a copy of the named node and write it back
pub(crate) fn modify_node(
    project: &mut Project,
    node: &str,
    change: impl FnOnce(&mut Node),
) -> Result<()> {
    let mut entry = project.find_node(node)?.clone();
    change(&mut entry);
    project.update_node(entry)?;
    Ok(())
}

/// Apply `change` to a copy of the project key and write it back
pub(crate) fn modify_key(project: &mut Project, change: impl FnOnce(&mut SshKey)) -> Result<()> {
    let mut key = project
        .ssh_key
        .clone()
        .ok_or_else(|| ertia_common::Error::MissingKey {
            project: project.name.clone(),
        })?;
    change(&mut key);
    project.update_key(key);
    Ok(())
}

pub(crate) fn set_status(project: &mut Project, node: &str, status: NodeStatus) -> Result<()> {
    modify_node(project, node, |n| n.status = status)
}

/// Mark a node Failing with `err` recorded, persist, and hand `err` back
pub(crate) async fn record_failure(
    store: &dyn ProjectStore,
    project: &mut Project,
    node: &str,
    err: Error,
) -> Error {
    let message = err.to_string();
    if let Err(e) = modify_node(project, node, |entry| {
        entry.status = NodeStatus::Failing;
        entry.error = Some(message);
    }) {
        return e;
    }
    if let Err(persist_err) = store.persist(project).await {
        warn!(node = %node, error = %persist_err, "Failed to persist node failure");
    }
    err
}

/// Forget everything a previous server left on the node
///
/// Dependencies go back to New since the replacement starts from a blank
/// image.
pub(crate) fn reset_provisioning(node: &mut Node) {
    node.provider_id = None;
    node.ipv4 = None;
    node.ipv6 = None;
    node.master_ip = None;
    node.node_token = None;
    node.install_password = None;
    node.error = None;
    node.status = NodeStatus::New;
    for dep in &mut node.dependencies {
        dep.status = DependencyStatus::New;
        dep.retries = 0;
    }
}
