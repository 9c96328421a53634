//! Compute nodes and their lifecycle status
//!
//! # Lifecycle
//!
//! ```text
//! New ──create──▶ Active ──all dependencies ready──▶ Ready
//!                   │
//!                   ├──stop──▶ Stopped ──start──▶ Active
//!                   ├──restart──▶ Restarting ──▶ (previous status)
//!                   ├──create failed──▶ Failing
//!                   └──delete──▶ Deleted
//! ```
//!
//! Infrastructure transitions belong to the node providers. The bootstrap
//! orchestrator never touches `status`; it only drives the node's
//! [`Dependency`] entries and copies join credentials between nodes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::dependency::{Dependency, DependencyStatus};
use crate::secret::Secret;

/// Lifecycle status of a node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum NodeStatus {
    /// Requested but not yet provisioned
    #[default]
    New,
    /// Provisioned and running
    Active,
    /// Active with every dependency fulfilled
    Ready,
    /// Powered off by an operator action
    Stopped,
    /// Reboot in progress
    Restarting,
    /// Provisioning failed, see the node's `error`
    Failing,
    /// Removed from the back end; the node is retired
    Deleted,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Active => write!(f, "Active"),
            Self::Ready => write!(f, "Ready"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Restarting => write!(f, "Restarting"),
            Self::Failing => write!(f, "Failing"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// One compute instance of a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable identifier, unique within the project
    pub name: String,
    /// Identifier assigned by the infrastructure back end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Public IPv4 address, set once provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    /// Public IPv6 address, set once provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    /// Lifecycle status
    #[serde(default)]
    pub status: NodeStatus,
    /// Whether this node runs the K3S control plane
    #[serde(default)]
    pub is_master: bool,
    /// Address of the control plane this agent joins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_ip: Option<Ipv4Addr>,
    /// Cluster join token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_token: Option<Secret>,
    /// User the install protocol logs in as
    #[serde(default)]
    pub install_user: String,
    /// Password used for privilege escalation during install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_password: Option<Secret>,
    /// Cluster this node belongs to
    #[serde(default)]
    pub cluster_name: String,
    /// Post-provisioning requirements
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Last failure reported by the provider layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Node {
    /// Create a node in status New
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark this node as the control plane
    pub fn as_master(mut self) -> Self {
        self.is_master = true;
        self
    }

    /// Set the lifecycle status
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the public IPv4 address
    pub fn with_ipv4(mut self, ip: Ipv4Addr) -> Self {
        self.ipv4 = Some(ip);
        self
    }

    /// Attach a dependency
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.add_dependency(dependency);
        self
    }

    /// Attach a dependency unless one with the same name is already present
    pub fn add_dependency(&mut self, dependency: Dependency) {
        if !self.dependencies.iter().any(|d| d.name == dependency.name) {
            self.dependencies.push(dependency);
        }
    }

    /// The dependency with this name, if exactly one exists
    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        let mut matching = self.dependencies.iter().filter(|d| d.name == name);
        match (matching.next(), matching.next()) {
            (Some(dep), None) => Some(dep),
            _ => None,
        }
    }

    /// Mutable access to the dependency with this name, if exactly one exists
    pub fn dependency_mut(&mut self, name: &str) -> Option<&mut Dependency> {
        if self.dependency(name).is_none() {
            return None;
        }
        self.dependencies.iter_mut().find(|d| d.name == name)
    }

    /// True iff exactly one dependency with this name exists and it is not Ready
    pub fn requires(&self, name: &str) -> bool {
        self.dependency(name).is_some_and(|d| !d.is_ready())
    }

    /// True iff exactly one dependency with this name exists and it is Ready
    pub fn fulfils(&self, name: &str) -> bool {
        self.dependency(name).is_some_and(Dependency::is_ready)
    }

    /// Mark a dependency Ready. Returns false if the node has no such dependency.
    pub fn mark_ready(&mut self, name: &str) -> bool {
        match self.dependency_mut(name) {
            Some(dep) => {
                dep.status = DependencyStatus::Ready;
                true
            }
            None => false,
        }
    }

    /// Whether any dependency is still unsatisfied
    pub fn has_pending_dependencies(&self) -> bool {
        self.dependencies.iter().any(|d| !d.is_ready())
    }

    /// Whether the node is provisioned and every dependency is fulfilled
    pub fn is_ready(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Ready)
            && !self.has_pending_dependencies()
    }

    /// Whether the node has been removed from its back end
    pub fn is_retired(&self) -> bool {
        self.status == NodeStatus::Deleted
    }

    /// Address used to reach the node, IPv4 preferred
    pub fn address(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }
}
