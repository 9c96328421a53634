//! Hetzner Cloud back end
//!
//! Servers are created from a stock Ubuntu image with the project key
//! installed for `root`, which is also the install user. Hetzner offers no
//! DNS integration here, so [`DnsProvider::create_record`] does nothing.

mod client;

pub use client::{
    AddressBlock, CreateServerRequest, HetznerClient, PublicNet, Server, ServerAction,
    SshKeyInfo, DEFAULT_BASE_URL,
};

use std::sync::Arc;

use async_trait::async_trait;
use ertia_common::{Dependency, KeyStatus, NodeStatus, Project, ProjectStore};
use tracing::{info, instrument, warn};

use crate::bootstrap::ClusterBootstrapper;
use crate::{
    modify_key, modify_node, record_failure, reset_provisioning, set_status, DnsProvider, Error,
    KeyProvider, NodeProvider, Result,
};

const NAME: &str = "hetzner";
const INSTALL_USER: &str = "root";

/// Server sizing and placement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HetznerSettings {
    /// Server type name
    pub server_type: String,
    /// Image name
    pub image: String,
    /// Location name; Hetzner picks one when unset
    pub location: Option<String>,
}

impl Default for HetznerSettings {
    fn default() -> Self {
        Self {
            server_type: "cx11".to_string(),
            image: "ubuntu-20.04".to_string(),
            location: None,
        }
    }
}

/// Hetzner Cloud implementation of the provider traits
pub struct HetznerProvider {
    client: HetznerClient,
    settings: HetznerSettings,
    store: Arc<dyn ProjectStore>,
    bootstrapper: Arc<ClusterBootstrapper>,
}

impl HetznerProvider {
    /// Create a provider
    pub fn new(
        client: HetznerClient,
        store: Arc<dyn ProjectStore>,
        bootstrapper: Arc<ClusterBootstrapper>,
    ) -> Self {
        Self {
            client,
            settings: HetznerSettings::default(),
            store,
            bootstrapper,
        }
    }

    /// Override server sizing and placement
    pub fn with_settings(mut self, settings: HetznerSettings) -> Self {
        self.settings = settings;
        self
    }

    fn create_request(&self, project: &Project, node: &str) -> CreateServerRequest {
        let ssh_keys = project
            .ssh_key
            .iter()
            .filter(|k| k.status == KeyStatus::Active)
            .filter_map(|k| k.provider_id.as_deref()?.parse().ok())
            .collect();

        CreateServerRequest {
            name: node.to_string(),
            server_type: self.settings.server_type.clone(),
            image: self.settings.image.clone(),
            ssh_keys,
            start_after_create: true,
            location: self.settings.location.clone(),
        }
    }
}

/// The numeric server id of a provisioned node
fn server_id(project: &Project, node: &str) -> Result<u64> {
    let entry = project.find_node(node)?;
    entry
        .provider_id
        .as_deref()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::config(format!("node {} has no Hetzner server id", node)))
}

fn key_id(project: &Project) -> Result<u64> {
    project
        .ssh_key
        .as_ref()
        .and_then(|k| k.provider_id.as_deref())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::config("project key has no Hetzner key id"))
}

#[async_trait]
impl NodeProvider for HetznerProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn create_node(&self, project: &mut Project, node: &str) -> Result<()> {
        project.find_node(node)?;
        let request = self.create_request(project, node);

        let server = match self.client.create_server(&request).await {
            Ok(server) => server,
            Err(e) => return Err(record_failure(self.store.as_ref(), project, node, e).await),
        };

        modify_node(project, node, |entry| {
            entry.provider_id = Some(server.id.to_string());
            entry.ipv4 = server.public_net.ipv4_addr();
            entry.ipv6 = server.public_net.ipv6_addr();
            entry.install_user = INSTALL_USER.to_string();
            entry.status = NodeStatus::Active;
            entry.error = None;
            entry.add_dependency(Dependency::k3s());
        })?;
        self.store.persist(project).await?;

        info!(server_id = server.id, "Hetzner server created");
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn delete_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.delete_server(id).await?;
        set_status(project, node, NodeStatus::Deleted)?;
        self.store.persist(project).await?;
        info!(server_id = id, "Hetzner server deleted");
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn restart_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        let original = project.find_node(node)?.status;

        set_status(project, node, NodeStatus::Restarting)?;
        self.store.persist(project).await?;

        let rebooted = self.client.server_action(id, ServerAction::Reboot).await;

        set_status(project, node, original)?;
        self.store.persist(project).await?;
        rebooted
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn stop_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.server_action(id, ServerAction::Shutdown).await?;
        set_status(project, node, NodeStatus::Stopped)?;
        self.store.persist(project).await?;
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn start_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.server_action(id, ServerAction::PowerOn).await?;
        set_status(project, node, NodeStatus::Active)?;
        self.store.persist(project).await?;
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn replace_node(&self, project: &mut Project, node: &str) -> Result<()> {
        if let Ok(id) = server_id(project, node) {
            if let Err(e) = self.client.delete_server(id).await {
                match e {
                    Error::Api {
                        status: Some(404), ..
                    } => warn!(server_id = id, "Server to replace is already gone"),
                    other => return Err(other),
                }
            }
        }
        modify_node(project, node, reset_provisioning)?;
        self.create_node(project, node).await
    }

    async fn sync_dependencies(&self, project: &mut Project) -> Result<()> {
        self.bootstrapper.sync_dependencies(project).await
    }
}

#[async_trait]
impl KeyProvider for HetznerProvider {
    #[instrument(skip_all, fields(provider = NAME))]
    async fn create_key(&self, project: &mut Project) -> Result<()> {
        let mut registration = (String::new(), String::new());
        modify_key(project, |key| {
            key.status = KeyStatus::Adapting;
            registration = (key.name.clone(), key.public_key.clone());
        })?;
        let (name, public_key) = registration;
        self.store.persist(project).await?;

        let result = self.client.create_ssh_key(&name, &public_key).await;

        match result {
            Ok(created) => {
                modify_key(project, |key| {
                    key.provider_id = Some(created.id.to_string());
                    key.fingerprint = Some(created.fingerprint.clone());
                    key.status = KeyStatus::Active;
                    key.error = None;
                })?;
                self.store.persist(project).await?;
                info!(key_id = created.id, "SSH key registered");
                Ok(())
            }
            Err(e) => {
                modify_key(project, |key| {
                    key.status = KeyStatus::Failing;
                    key.error = Some(e.to_string());
                })?;
                if let Err(persist_err) = self.store.persist(project).await {
                    warn!(error = %persist_err, "Failed to persist key failure");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn delete_key(&self, project: &mut Project) -> Result<()> {
        let id = key_id(project)?;
        self.client.delete_ssh_key(id).await?;
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
impl DnsProvider for HetznerProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn create_record(&self, _project: &mut Project) -> Result<()> {
        Ok(())
    }
}
