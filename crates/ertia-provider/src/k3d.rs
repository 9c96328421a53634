//! Local k3d back end
//!
//! k3d runs K3S nodes as containers on the operator's machine, so there is
//! no infrastructure API to call and no installer to run. Every operation is
//! a status change on the project. Dependencies are marked Ready directly;
//! promotion to node-level Ready is left to the driver like everywhere else.

use std::sync::Arc;

use async_trait::async_trait;
use ertia_common::{KeyStatus, NodeStatus, Project, ProjectStore, K3S_DEPENDENCY};
use tracing::{debug, info};

use crate::{
    modify_key, modify_node, set_status, DnsProvider, KeyProvider, NodeProvider, Result,
};

const NAME: &str = "k3d";

/// Back end for local k3d clusters
#[derive(Clone)]
pub struct K3dProvider {
    store: Arc<dyn ProjectStore>,
}

impl K3dProvider {
    /// Create a provider persisting to `store`
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    async fn transition(&self, project: &mut Project, node: &str, status: NodeStatus) -> Result<()> {
        set_status(project, node, status)?;
        self.store.persist(project).await?;
        debug!(node = %node, status = %status, "k3d node updated");
        Ok(())
    }
}

#[async_trait]
impl NodeProvider for K3dProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn create_node(&self, project: &mut Project, node: &str) -> Result<()> {
        modify_node(project, node, |entry| {
            entry.status = NodeStatus::Active;
            entry.error = None;
        })?;
        self.store.persist(project).await?;
        info!(node = %node, "k3d node active");
        Ok(())
    }

    async fn delete_node(&self, project: &mut Project, node: &str) -> Result<()> {
        self.transition(project, node, NodeStatus::Deleted).await
    }

    async fn restart_node(&self, project: &mut Project, node: &str) -> Result<()> {
        // containers restart in place
        project.find_node(node)?;
        Ok(())
    }

    async fn stop_node(&self, project: &mut Project, node: &str) -> Result<()> {
        self.transition(project, node, NodeStatus::Stopped).await
    }

    async fn start_node(&self, project: &mut Project, node: &str) -> Result<()> {
        self.transition(project, node, NodeStatus::Active).await
    }

    async fn replace_node(&self, project: &mut Project, node: &str) -> Result<()> {
        project.find_node(node)?;
        Ok(())
    }

    async fn sync_dependencies(&self, project: &mut Project) -> Result<()> {
        let mut working = project.nodes.clone();
        let mut changed = false;
        for node in working.iter_mut() {
            if node.status == NodeStatus::Active && node.requires(K3S_DEPENDENCY) {
                changed |= node.mark_ready(K3S_DEPENDENCY);
            }
        }
        if changed {
            project.commit_nodes(working)?;
            self.store.persist(project).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyProvider for K3dProvider {
    async fn create_key(&self, project: &mut Project) -> Result<()> {
        if project.ssh_key.is_none() {
            return Ok(());
        }
        modify_key(project, |key| key.status = KeyStatus::Active)?;
        self.store.persist(project).await?;
        Ok(())
    }

    async fn delete_key(&self, project: &mut Project) -> Result<()> {
        if project.ssh_key.is_none() {
            return Ok(());
        }
        modify_key(project, |key| key.status = KeyStatus::Deleted)?;
        self.store.persist(project).await?;
        Ok(())
    }

    async fn sync_keys(&self, project: &mut Project) -> Result<()> {
        match &project.ssh_key {
            Some(key) if key.status == KeyStatus::New => self.create_key(project).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DnsProvider for K3dProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn create_record(&self, _project: &mut Project) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ertia_common::{Dependency, DnsConfig, MemoryStore, Node, SshKey};

    fn provider() -> (K3dProvider, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (K3dProvider::new(store.clone()), store)
    }

    fn project() -> Project {
        Project::new("local")
            .with_node(Node::new("m1").as_master().with_dependency(Dependency::k3s()))
            .with_node(Node::new("a1").with_dependency(Dependency::k3s()))
    }

    #[tokio::test]
    async fn sync_nodes_activates_new_nodes() {
        let (provider, store) = provider();
        let mut project = project();

        provider.sync_nodes(&mut project).await.unwrap();

        assert!(project.nodes.iter().all(|n| n.status == NodeStatus::Active));
        assert_eq!(store.persist_count(), 2);
    }

    #[tokio::test]
    async fn dependencies_become_ready_but_nodes_stay_active() {
        let (provider, store) = provider();
        let mut project = project();
        provider.sync_nodes(&mut project).await.unwrap();

        provider.sync_dependencies(&mut project).await.unwrap();

        for node in &project.nodes {
            assert!(node.fulfils(K3S_DEPENDENCY));
            assert_eq!(node.status, NodeStatus::Active);
        }
        assert_eq!(store.persist_count(), 3);

        // second run has nothing to do
        provider.sync_dependencies(&mut project).await.unwrap();
        assert_eq!(store.persist_count(), 3);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let (provider, _store) = provider();
        let mut project = project();
        provider.create_node(&mut project, "a1").await.unwrap();

        provider.stop_node(&mut project, "a1").await.unwrap();
        assert_eq!(project.find_node("a1").unwrap().status, NodeStatus::Stopped);

        provider.start_node(&mut project, "a1").await.unwrap();
        assert_eq!(project.find_node("a1").unwrap().status, NodeStatus::Active);

        provider.restart_node(&mut project, "a1").await.unwrap();
        provider.replace_node(&mut project, "a1").await.unwrap();
        assert_eq!(project.find_node("a1").unwrap().status, NodeStatus::Active);

        provider.delete_node(&mut project, "a1").await.unwrap();
        assert_eq!(project.find_node("a1").unwrap().status, NodeStatus::Deleted);

        assert!(provider.stop_node(&mut project, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn keys_activate_immediately() {
        let (provider, _store) = provider();
        let mut project = project();
        project.update_key(SshKey::new("ertia", "ssh-ed25519 AAAA"));

        provider.sync_keys(&mut project).await.unwrap();
        assert_eq!(project.ssh_key.as_ref().unwrap().status, KeyStatus::Active);

        provider.delete_key(&mut project).await.unwrap();
        assert_eq!(project.ssh_key.as_ref().unwrap().status, KeyStatus::Deleted);
    }

    #[tokio::test]
    async fn dns_is_a_no_op() {
        let (provider, store) = provider();
        let mut project = project();
        project.dns = Some(DnsConfig::new("apps.example.com"));

        provider.create_record(&mut project).await.unwrap();
        assert!(project.dns.as_ref().unwrap().needs_adapting());
        assert_eq!(store.persist_count(), 0);
    }
}
