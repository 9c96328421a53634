//! Sync command - drive a project towards its declared state
//!
//! One run:
//! 1. Loads and validates the project file
//! 2. Loads the K3S installer and checks its digest when one is pinned
//! 3. Registers the project key and creates every New node
//! 4. Installs K3S, master first, waiting for fresh servers to accept SSH
//! 5. Points the wildcard DNS record at the ingress node
//! 6. Marks fully bootstrapped nodes Ready
//!
//! Every step writes the project file as it goes, so an interrupted run picks
//! up where it stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use ertia_common::ProjectStore;
use ertia_k3s::{InstallSettings, InstallerArtifact, K3sInstaller, OpenSshConnector};
use ertia_provider::backend::BackendOptions;
use ertia_provider::glesys::GlesysSettings;
use ertia_provider::hetzner::HetznerSettings;
use ertia_provider::{
    Backend, BackendKind, ClusterBootstrapper, ConvergencePolicy, ReconcileSummary,
};
use tracing::{info, warn};

use super::{open_project, resolve_paths};
use crate::Result;

/// Upstream K3S install script
pub const DEFAULT_INSTALLER: &str = "https://get.k3s.io";

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Project file
    #[arg(short, long, env = "ERTIA_PROJECT")]
    pub project: PathBuf,

    /// Infrastructure back end: hetzner, glesys or k3d
    #[arg(short, long, env = "ERTIA_BACKEND")]
    pub backend: BackendKind,

    /// K3S installer script, as a local path or an http(s) URL
    #[arg(long, env = "ERTIA_INSTALLER", default_value = DEFAULT_INSTALLER)]
    pub installer: String,

    /// Expected SHA-256 of the installer script, hex encoded
    #[arg(long, env = "ERTIA_INSTALLER_SHA256")]
    pub installer_sha256: Option<String>,

    /// Version label recorded for the installer script
    #[arg(long, env = "ERTIA_INSTALLER_VERSION", default_value = "latest")]
    pub installer_version: String,

    /// ertia home directory holding private keys and kubeconfigs
    #[arg(long, env = "ERTIA_HOME")]
    pub home: Option<PathBuf>,

    /// Passes that may end with a node unreachable before giving up
    #[arg(long, default_value_t = 200)]
    pub max_attempts: u32,

    /// Overall time budget for waiting on unreachable nodes, in seconds
    #[arg(long, default_value_t = 1800)]
    pub deadline_secs: u64,

    /// Timeout for each remote command, in seconds
    #[arg(long, default_value_t = 60)]
    pub command_timeout_secs: u64,

    /// Timeout for the SSH connect and handshake, in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Hetzner Cloud API base URL
    #[arg(long, env = "ERTIA_HETZNER_URL", help_heading = "Hetzner")]
    pub hetzner_url: Option<String>,

    /// Hetzner server type [default: cx11]
    #[arg(long, help_heading = "Hetzner")]
    pub server_type: Option<String>,

    /// Hetzner image [default: ubuntu-20.04]
    #[arg(long, help_heading = "Hetzner")]
    pub image: Option<String>,

    /// Hetzner location; Hetzner picks one when unset
    #[arg(long, help_heading = "Hetzner")]
    pub location: Option<String>,

    /// GleSYS API base URL
    #[arg(long, env = "ERTIA_GLESYS_URL", help_heading = "GleSYS")]
    pub glesys_url: Option<String>,

    /// GleSYS data center [default: Falkenberg]
    #[arg(long, help_heading = "GleSYS")]
    pub datacenter: Option<String>,

    /// GleSYS OS template [default: debian-11]
    #[arg(long, help_heading = "GleSYS")]
    pub template: Option<String>,

    /// GleSYS disk size in GB [default: 150]
    #[arg(long, help_heading = "GleSYS")]
    pub disk_gb: Option<u32>,

    /// GleSYS memory in MB [default: 12288]
    #[arg(long, help_heading = "GleSYS")]
    pub memory_mb: Option<u32>,

    /// GleSYS CPU cores [default: 8]
    #[arg(long, help_heading = "GleSYS")]
    pub cpu_cores: Option<u32>,

    /// GleSYS bandwidth in Mbit/s [default: 100]
    #[arg(long, help_heading = "GleSYS")]
    pub bandwidth: Option<u32>,
}

impl SyncArgs {
    fn policy(&self) -> ConvergencePolicy {
        ConvergencePolicy::with_max_attempts(self.max_attempts)
            .with_deadline(Duration::from_secs(self.deadline_secs))
    }

    fn backend_options(&self) -> BackendOptions {
        let mut hetzner = HetznerSettings::default();
        if let Some(server_type) = &self.server_type {
            hetzner.server_type = server_type.clone();
        }
        if let Some(image) = &self.image {
            hetzner.image = image.clone();
        }
        hetzner.location = self.location.clone();

        let mut glesys = GlesysSettings::default();
        if let Some(datacenter) = &self.datacenter {
            glesys.datacenter = datacenter.clone();
        }
        if let Some(template) = &self.template {
            glesys.template = template.clone();
        }
        glesys.disk_gb = self.disk_gb.unwrap_or(glesys.disk_gb);
        glesys.memory_mb = self.memory_mb.unwrap_or(glesys.memory_mb);
        glesys.cpu_cores = self.cpu_cores.unwrap_or(glesys.cpu_cores);
        glesys.bandwidth = self.bandwidth.unwrap_or(glesys.bandwidth);

        BackendOptions {
            hetzner_url: self.hetzner_url.clone(),
            glesys_url: self.glesys_url.clone(),
            hetzner,
            glesys,
        }
    }
}

pub async fn run(args: SyncArgs) -> Result<ReconcileSummary> {
    let paths = resolve_paths(args.home.as_ref())?;
    paths.ensure_dirs()?;

    let (store, mut project) = open_project(&args.project).await?;
    let store: Arc<dyn ProjectStore> = Arc::new(store);
    info!(project = %project.name, backend = %args.backend, "Syncing project");

    let artifact = load_installer(&args).await?;
    let settings = InstallSettings::new(paths.kubeconfig())
        .with_command_timeout(Duration::from_secs(args.command_timeout_secs));
    let installer = K3sInstaller::new(
        OpenSshConnector::new(paths.keys_dir())
            .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs)),
        Arc::new(artifact),
        settings,
    );
    let bootstrapper = Arc::new(ClusterBootstrapper::new(
        Arc::new(installer),
        store.clone(),
        args.policy(),
    ));

    let options = args.backend_options();
    let backend =
        Backend::with_options(args.backend, &project, store.clone(), bootstrapper, &options)?;

    let summary = backend.reconcile(store.as_ref(), &mut project).await?;

    let ready = project.nodes.iter().filter(|n| n.is_ready()).count();
    info!(
        promoted = summary.promoted.len(),
        ready,
        total = project.nodes.len(),
        "Sync complete"
    );
    if ready == project.nodes.len() {
        println!("{}: all {} nodes ready", project.name, ready);
    } else {
        println!(
            "{}: {} of {} nodes ready",
            project.name,
            ready,
            project.nodes.len()
        );
    }
    Ok(summary)
}

/// The installer script for this run
///
/// k3d nodes ship with K3S and never run the installer, so nothing is
/// fetched for them.
async fn load_installer(args: &SyncArgs) -> Result<InstallerArtifact> {
    if args.backend == BackendKind::K3d {
        return Ok(InstallerArtifact::from_bytes("bundled", Vec::new()));
    }

    let artifact = InstallerArtifact::load(args.installer_version.as_str(), &args.installer).await?;
    match &args.installer_sha256 {
        Some(expected) => artifact.verify(expected)?,
        None => warn!(
            digest = %artifact.digest(),
            "Installer digest not pinned, pass --installer-sha256 to pin it"
        ),
    }
    info!(
        version = %artifact.version(),
        digest = %artifact.digest(),
        "Installer loaded"
    );
    Ok(artifact)
}
