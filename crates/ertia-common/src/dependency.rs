//! Post-provisioning dependencies attached to nodes
//!
//! A dependency is a named requirement with its own New/Ready status,
//! independent of the node's lifecycle status. Provisioning attaches them;
//! the bootstrap orchestrator drives them to Ready.

use serde::{Deserialize, Serialize};

/// Name of the dependency that installs K3S on a node
pub const K3S_DEPENDENCY: &str = "K3S";

/// Status of a single dependency
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Not yet satisfied
    #[default]
    New,
    /// Satisfied
    Ready,
}

/// A named post-provisioning requirement of a node
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency kind, e.g. [`K3S_DEPENDENCY`]
    pub name: String,
    /// Current status
    #[serde(default)]
    pub status: DependencyStatus,
    /// Number of attempts that found the node not yet reachable
    #[serde(default)]
    pub retries: u32,
}

impl Dependency {
    /// Create a new, unsatisfied dependency
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DependencyStatus::New,
            retries: 0,
        }
    }

    /// The K3S dependency attached to freshly provisioned nodes
    pub fn k3s() -> Self {
        Self::new(K3S_DEPENDENCY)
    }

    /// Whether this dependency is satisfied
    pub fn is_ready(&self) -> bool {
        self.status == DependencyStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k3s_dependency_starts_new_without_retries() {
        let dep = Dependency::k3s();
        assert_eq!(dep.name, "K3S");
        assert_eq!(dep.status, DependencyStatus::New);
        assert_eq!(dep.retries, 0);
        assert!(!dep.is_ready());
    }

    #[test]
    fn missing_fields_default_when_deserializing() {
        let dep: Dependency = serde_json::from_str(r#"{"name":"K3S"}"#).unwrap();
        assert_eq!(dep, Dependency::k3s());
    }
}
