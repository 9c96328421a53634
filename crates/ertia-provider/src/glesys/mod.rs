//! GleSYS back end
//!
//! Servers get a dedicated `ertia` login carrying the project key and a
//! random password, which the installer later uses for `sudo`. GleSYS takes
//! the public key with every server create, so there is nothing to register
//! up front and the project key becomes Active locally.

mod client;
mod dns;

pub use client::{
    AddRecordRequest, CreateServerRequest, DnsRecord, GlesysClient, IpEntry, Server, ServerUser,
    DEFAULT_BASE_URL, USER_AGENT,
};

use std::sync::Arc;

use async_trait::async_trait;
use ertia_common::{Dependency, KeyStatus, NodeStatus, Project, ProjectStore, Secret};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::bootstrap::ClusterBootstrapper;
use crate::{
    modify_key, modify_node, record_failure, reset_provisioning, set_status, Error, KeyProvider,
    NodeProvider, Result,
};

const NAME: &str = "glesys";
const INSTALL_USER: &str = "ertia";

/// Server sizing and placement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlesysSettings {
    /// Data center name
    pub datacenter: String,
    /// OS template
    pub template: String,
    /// Disk size in GB
    pub disk_gb: u32,
    /// Memory in MB
    pub memory_mb: u32,
    /// CPU cores
    pub cpu_cores: u32,
    /// Bandwidth in Mbit/s
    pub bandwidth: u32,
}

impl Default for GlesysSettings {
    fn default() -> Self {
        Self {
            datacenter: "Falkenberg".to_string(),
            template: "debian-11".to_string(),
            disk_gb: 150,
            memory_mb: 12288,
            cpu_cores: 8,
            bandwidth: 100,
        }
    }
}

/// GleSYS implementation of the provider traits
pub struct GlesysProvider {
    client: GlesysClient,
    settings: GlesysSettings,
    store: Arc<dyn ProjectStore>,
    bootstrapper: Arc<ClusterBootstrapper>,
}

impl GlesysProvider {
    /// Create a provider
    pub fn new(
        client: GlesysClient,
        store: Arc<dyn ProjectStore>,
        bootstrapper: Arc<ClusterBootstrapper>,
    ) -> Self {
        Self {
            client,
            settings: GlesysSettings::default(),
            store,
            bootstrapper,
        }
    }

    /// Override server sizing and placement
    pub fn with_settings(mut self, settings: GlesysSettings) -> Self {
        self.settings = settings;
        self
    }

    fn create_request(&self, node: &str, public_key: &str, password: &str) -> CreateServerRequest {
        CreateServerRequest {
            hostname: node.to_string(),
            platform: "KVM".to_string(),
            datacenter: self.settings.datacenter.clone(),
            templatename: self.settings.template.clone(),
            disksize: self.settings.disk_gb,
            memorysize: self.settings.memory_mb,
            cpucores: self.settings.cpu_cores,
            bandwidth: self.settings.bandwidth,
            ip: "any".to_string(),
            ipv6: "any".to_string(),
            users: vec![ServerUser {
                username: INSTALL_USER.to_string(),
                publickeys: vec![public_key.to_string()],
                password: password.to_string(),
            }],
        }
    }
}

fn server_id(project: &Project, node: &str) -> Result<String> {
    project
        .find_node(node)?
        .provider_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::config(format!("node {} has no GleSYS server id", node)))
}

#[async_trait]
impl NodeProvider for GlesysProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn create_node(&self, project: &mut Project, node: &str) -> Result<()> {
        project.find_node(node)?;
        let public_key = match &project.ssh_key {
            Some(key) if !key.public_key.is_empty() => key.public_key.clone(),
            _ => {
                return Err(ertia_common::Error::MissingKey {
                    project: project.name.clone(),
                }
                .into())
            }
        };

        let password = Uuid::new_v4().to_string();
        let request = self.create_request(node, &public_key, &password);

        let server = match self.client.create_server(&request).await {
            Ok(server) => server,
            Err(e) => return Err(record_failure(self.store.as_ref(), project, node, e).await),
        };

        modify_node(project, node, |entry| {
            entry.provider_id = Some(server.serverid.clone());
            entry.ipv4 = server.ipv4();
            entry.ipv6 = server.ipv6();
            entry.install_user = INSTALL_USER.to_string();
            entry.install_password = Some(Secret::new(password));
            entry.status = NodeStatus::Active;
            entry.error = None;
            entry.add_dependency(Dependency::k3s());
        })?;
        self.store.persist(project).await?;

        info!(server_id = %server.serverid, "GleSYS server created");
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn delete_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.destroy_server(&id).await?;
        set_status(project, node, NodeStatus::Deleted)?;
        self.store.persist(project).await?;
        info!(server_id = %id, "GleSYS server destroyed");
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn restart_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        let original = project.find_node(node)?.status;

        set_status(project, node, NodeStatus::Restarting)?;
        self.store.persist(project).await?;

        let cycled = match self.client.stop_server(&id).await {
            Ok(()) => self.client.start_server(&id).await,
            Err(e) => Err(e),
        };

        set_status(project, node, original)?;
        self.store.persist(project).await?;
        cycled
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn stop_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.stop_server(&id).await?;
        set_status(project, node, NodeStatus::Stopped)?;
        self.store.persist(project).await?;
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn start_node(&self, project: &mut Project, node: &str) -> Result<()> {
        let id = server_id(project, node)?;
        self.client.start_server(&id).await?;
        set_status(project, node, NodeStatus::Active)?;
        self.store.persist(project).await?;
        Ok(())
    }

    #[instrument(skip(self, project), fields(provider = NAME))]
    async fn replace_node(&self, project: &mut Project, node: &str) -> Result<()> {
        if let Ok(id) = server_id(project, node) {
            self.client.destroy_server(&id).await?;
        }
        modify_node(project, node, reset_provisioning)?;
        self.create_node(project, node).await
    }

    async fn sync_dependencies(&self, project: &mut Project) -> Result<()> {
        self.bootstrapper.sync_dependencies(project).await
    }
}

#[async_trait]
impl KeyProvider for GlesysProvider {
    async fn create_key(&self, project: &mut Project) -> Result<()> {
        let mut empty = false;
        modify_key(project, |key| {
            empty = key.public_key.is_empty();
            if empty {
                key.status = KeyStatus::Failing;
                key.error = Some("public key is empty".to_string());
            } else {
                key.status = KeyStatus::Active;
                key.error = None;
            }
        })?;
        self.store.persist(project).await?;
        if empty {
            return Err(Error::config("project public key is empty"));
        }
        debug!("Key will be sent with each server create");
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
