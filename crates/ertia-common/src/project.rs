//! The project: aggregate root of everything ertia provisions
//!
//! Mutations go through [`Project::update_node`], [`Project::update_key`] and
//! [`Project::update_dns`], which replace the matching entry in memory, or
//! through [`Project::commit_nodes`] for a whole pass over the node list. A
//! [`ProjectStore`](crate::ProjectStore) persists the result.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dns::DnsConfig;
use crate::key::SshKey;
use crate::node::{Node, NodeStatus};
use crate::secret::Secret;
use crate::{Error, Result};

/// A cluster project and its infrastructure
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name
    pub name: String,
    /// Account identifier at the back end (GleSYS project id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// API token for the back end
    #[serde(default)]
    pub provider_token: Secret,
    /// K3S release channel, e.g. `stable` or `v1.28`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k3s_channel: Option<String>,
    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Key registered with the back end for node creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SshKey>,
    /// Wildcard DNS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,
}

/// Find the unique master among `nodes`, ignoring retired nodes
///
/// Returns [`Error::NoMaster`] or [`Error::MultipleMasters`] instead of
/// picking one when the topology is broken.
pub fn find_master(nodes: &[Node]) -> Result<&Node> {
    let mut masters = nodes.iter().filter(|n| n.is_master && !n.is_retired());
    match (masters.next(), masters.next()) {
        (Some(master), None) => Ok(master),
        (None, _) => Err(Error::NoMaster),
        (Some(first), Some(second)) => {
            let mut names = vec![first.name.clone(), second.name.clone()];
            names.extend(masters.map(|n| n.name.clone()));
            Err(Error::MultipleMasters { names })
        }
    }
}

impl Project {
    /// Create an empty project
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a node
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Look up a node by name
    pub fn find_node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| Error::node_not_found(name))
    }

    /// Replace the node with the same name
    pub fn update_node(&mut self, node: Node) -> Result<()> {
        let slot = self
            .nodes
            .iter_mut()
            .find(|n| n.name == node.name)
            .ok_or_else(|| Error::node_not_found(&node.name))?;
        *slot = node;
        Ok(())
    }

    /// Replace the project's SSH key
    pub fn update_key(&mut self, key: SshKey) {
        self.ssh_key = Some(key);
    }

    /// Replace the DNS configuration
    pub fn update_dns(&mut self, dns: DnsConfig) {
        self.dns = Some(dns);
    }

    /// Replace the whole node list with a modified copy of itself
    ///
    /// The copy must hold the same nodes in the same order; only their
    /// content may differ.
    pub fn commit_nodes(&mut self, nodes: Vec<Node>) -> Result<()> {
        let same_shape = nodes.len() == self.nodes.len()
            && nodes.iter().zip(&self.nodes).all(|(a, b)| a.name == b.name);
        if !same_shape {
            return Err(Error::validation_for(
                &self.name,
                "committed node list does not match the project's nodes",
            ));
        }
        self.nodes = nodes;
        Ok(())
    }

    /// The unique master node
    pub fn master(&self) -> Result<&Node> {
        find_master(&self.nodes)
    }

    /// The first live node that is not the master
    pub fn find_non_master_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| !n.is_master && !n.is_retired())
    }

    /// Check the project for structural problems
    ///
    /// Node names must be unique, no node may carry two dependencies with
    /// the same name, and if any live node exists exactly one of them must
    /// be the master.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(Error::validation_for(&self.name, "node with empty name"));
            }
            if !names.insert(node.name.as_str()) {
                return Err(Error::validation_for(
                    &self.name,
                    format!("duplicate node name '{}'", node.name),
                ));
            }

            let mut deps = HashSet::new();
            for dep in &node.dependencies {
                if !deps.insert(dep.name.as_str()) {
                    return Err(Error::validation_for(
                        &self.name,
                        format!("node '{}' lists dependency '{}' twice", node.name, dep.name),
                    ));
                }
            }
        }

        if self.nodes.iter().any(|n| !n.is_retired()) {
            self.master()?;
        }
        Ok(())
    }

    /// Move every Active node whose dependencies are all fulfilled to Ready
    ///
    /// Returns the names of the promoted nodes.
    pub fn promote_ready_nodes(&mut self) -> Vec<String> {
        let mut promoted = Vec::new();
        for node in &mut self.nodes {
            if node.status == NodeStatus::Active && node.is_ready() {
                node.status = NodeStatus::Ready;
                promoted.push(node.name.clone());
            }
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::{Dependency, K3S_DEPENDENCY};

    fn two_node_project() -> Project {
        Project::new("demo")
            .with_node(
                Node::new("m1")
                    .as_master()
                    .with_status(NodeStatus::Active)
                    .with_dependency(Dependency::k3s()),
            )
            .with_node(
                Node::new("a1")
                    .with_status(NodeStatus::Active)
                    .with_dependency(Dependency::k3s()),
            )
    }

    // ==========================================================================
    // Story: the topology has exactly one master
    // ==========================================================================

    #[test]
    fn master_lookup_returns_the_unique_master() {
        let project = two_node_project();
        assert_eq!(project.master().unwrap().name, "m1");
        assert!(project.validate().is_ok());
    }

    #[test]
    fn master_lookup_without_master_is_an_error() {
        let mut project = two_node_project();
        project.nodes[0].is_master = false;

        assert!(matches!(project.master(), Err(Error::NoMaster)));
        assert!(matches!(project.validate(), Err(Error::NoMaster)));
    }

    #[test]
    fn master_lookup_with_two_masters_names_both() {
        let mut project = two_node_project();
        project.nodes[1].is_master = true;

        match project.master() {
            Err(Error::MultipleMasters { names }) => assert_eq!(names, vec!["m1", "a1"]),
            other => panic!("Expected MultipleMasters, got {:?}", other),
        }
    }

    #[test]
    fn retired_master_does_not_count() {
        let mut project = two_node_project();
        project.nodes[1].is_master = true;
        project.nodes[0].status = NodeStatus::Deleted;

        assert_eq!(project.master().unwrap().name, "a1");
    }

    #[test]
    fn empty_project_is_valid() {
        assert!(Project::new("empty").validate().is_ok());
    }

    // ==========================================================================
    // Story: structural validation
    // ==========================================================================

    #[test]
    fn duplicate_node_names_are_rejected() {
        let project = two_node_project().with_node(Node::new("a1"));
        let err = project.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate node name 'a1'"));
    }

    #[test]
    fn duplicate_dependencies_are_rejected() {
        let mut project = two_node_project();
        project.nodes[1].dependencies.push(Dependency::k3s());

        let err = project.validate().unwrap_err();
        assert!(err.to_string().contains("dependency 'K3S' twice"));
    }

    // ==========================================================================
    // Story: updates replace entries by name
    // ==========================================================================

    #[test]
    fn update_node_replaces_by_name() {
        let mut project = two_node_project();
        let mut agent = project.find_node("a1").unwrap().clone();
        agent.mark_ready(K3S_DEPENDENCY);

        project.update_node(agent).unwrap();
        assert!(project.find_node("a1").unwrap().fulfils(K3S_DEPENDENCY));
    }

    #[test]
    fn update_of_unknown_node_fails() {
        let mut project = two_node_project();
        let err = project.update_node(Node::new("ghost")).unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { .. }));
    }

    #[test]
    fn commit_nodes_rejects_a_reshaped_list() {
        let mut project = two_node_project();
        let mut reordered = project.nodes.clone();
        reordered.reverse();

        assert!(project.commit_nodes(reordered).is_err());
        assert!(project.commit_nodes(project.nodes.clone()).is_ok());
    }

    #[test]
    fn non_master_lookup_skips_master_and_retired_nodes() {
        let mut project = two_node_project().with_node(Node::new("a2"));
        assert_eq!(project.find_non_master_node().unwrap().name, "a1");

        project.nodes[1].status = NodeStatus::Deleted;
        assert_eq!(project.find_non_master_node().unwrap().name, "a2");
    }

    // ==========================================================================
    // Story: node-level Ready is derived from dependencies
    // ==========================================================================

    #[test]
    fn promotion_only_touches_fully_bootstrapped_active_nodes() {
        let mut project = two_node_project();
        project.nodes[0].mark_ready(K3S_DEPENDENCY);

        let promoted = project.promote_ready_nodes();
        assert_eq!(promoted, vec!["m1"]);
        assert_eq!(project.nodes[0].status, NodeStatus::Ready);
        assert_eq!(project.nodes[1].status, NodeStatus::Active);

        assert!(project.promote_ready_nodes().is_empty());
    }

    #[test]
    fn project_file_roundtrip_keeps_secrets() {
        let mut project = two_node_project();
        project.provider_token = Secret::new("api-token");
        project.nodes[0].node_token = Some(Secret::new("K10token"));

        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, project);
        assert!(json.contains("\"providerToken\":\"api-token\""));
    }
}
