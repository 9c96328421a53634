//! Remote install protocol for K3S
//!
//! [`K3sInstaller`] installs the K3S server on a master node and the agent
//! on worker nodes over SSH. Each install call opens its own session and
//! closes it on every return path.
//!
//! # Outcomes
//!
//! Every install returns `Result<Attempt<T>, K3sError>`:
//!
//! - `Ok(Attempt::Completed(_))`: the node is installed
//! - `Ok(Attempt::NotReady)`: no SSH key was accepted yet, try again later
//! - `Err(_)`: a hard failure (configuration, command failure, timeout)

#![deny(missing_docs)]

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use async_trait::async_trait;
use ertia_common::Secret;
#[cfg(test)]
use mockall::automock;

pub mod artifact;
pub mod command;
pub mod error;
pub mod installer;
pub mod kubeconfig;
pub mod session;

pub use artifact::InstallerArtifact;
pub use command::{CommandOutput, RemoteCommand};
pub use error::K3sError;
pub use installer::{InstallSettings, K3sInstaller};
pub use session::{OpenSshConnector, RemoteSession, SessionOpener, SessionTarget};

/// Result type alias for install operations
pub type Result<T> = std::result::Result<T, K3sError>;

/// Port the K3S API server listens on and agents join through
pub const K3S_API_PORT: u16 = 6443;
/// Scheme of the join URL
pub const K3S_URL_SCHEME: &str = "https";
/// Where the server writes the join token
pub const NODE_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
/// Where the server writes the admin kubeconfig
pub const K3S_KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Outcome of an operation that may have to wait for infrastructure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation finished
    Completed(T),
    /// The node is not reachable yet; nothing was changed
    NotReady,
}

impl<T> Attempt<T> {
    /// Whether the node was not reachable
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Attempt::NotReady)
    }

    /// Transform the completed value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Attempt::Completed(value) => Attempt::Completed(f(value)),
            Attempt::NotReady => Attempt::NotReady,
        }
    }
}

/// The node an install runs against
#[derive(Clone, Debug)]
pub struct InstallTarget {
    /// Node name
    pub node: String,
    /// Address to connect to
    pub address: IpAddr,
    /// Login user
    pub user: String,
    /// Password for privilege escalation
    pub password: Option<Secret>,
    /// K3S release channel
    pub channel: Option<String>,
}

impl InstallTarget {
    pub(crate) fn session_target(&self) -> SessionTarget {
        SessionTarget {
            node: self.node.clone(),
            address: self.address,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// What an agent needs to join the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinConfig {
    /// Address of the master
    pub master_ip: IpAddr,
    /// Join token read from the master
    pub token: Secret,
}

impl JoinConfig {
    /// The `K3S_URL` agents register with
    pub fn url(&self) -> String {
        format!(
            "{}://{}",
            K3S_URL_SCHEME,
            SocketAddr::new(self.master_ip, K3S_API_PORT)
        )
    }
}

/// Result of a master install
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterInstall {
    /// Join token, newlines stripped
    pub node_token: Secret,
    /// Where the admin kubeconfig was written
    pub kubeconfig: PathBuf,
}

/// Installs K3S on nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInstaller: Send + Sync {
    /// Install the K3S server and read back its join token and kubeconfig
    async fn install_master(&self, target: &InstallTarget) -> Result<Attempt<MasterInstall>>;

    /// Install the K3S agent and join it to the master
    async fn install_agent(&self, target: &InstallTarget, join: &JoinConfig)
        -> Result<Attempt<()>>;
}
