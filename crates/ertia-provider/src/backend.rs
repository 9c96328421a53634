//! Back end selection
//!
//! The back end is chosen once at startup. [`Backend`] is a closed set of
//! the supported implementations and hands out each one's three contracts.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ertia_common::{Project, ProjectStore};

use crate::bootstrap::ClusterBootstrapper;
use crate::driver::{reconcile, ReconcileSummary};
use crate::glesys::{GlesysClient, GlesysProvider, GlesysSettings};
use crate::hetzner::{HetznerClient, HetznerProvider, HetznerSettings};
use crate::k3d::K3dProvider;
use crate::{DnsProvider, Error, KeyProvider, NodeProvider, Result};

/// Name of a supported back end
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Hetzner Cloud
    Hetzner,
    /// GleSYS
    Glesys,
    /// Local k3d
    K3d,
}

impl BackendKind {
    /// Every supported back end
    pub const ALL: [BackendKind; 3] = [BackendKind::Hetzner, BackendKind::Glesys, BackendKind::K3d];

    /// Lowercase name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Hetzner => "hetzner",
            BackendKind::Glesys => "glesys",
            BackendKind::K3d => "k3d",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::config(format!(
                    "unknown backend '{}', expected one of hetzner, glesys, k3d",
                    s
                ))
            })
    }
}

/// Per back end tuning: API base URLs and server sizing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Hetzner Cloud API base URL, for tests and API proxies
    pub hetzner_url: Option<String>,
    /// GleSYS API base URL, for tests and API proxies
    pub glesys_url: Option<String>,
    /// Hetzner server type, image and location
    pub hetzner: HetznerSettings,
    /// GleSYS server sizing and placement
    pub glesys: GlesysSettings,
}

/// The selected back end
pub enum Backend {
    /// Hetzner Cloud
    Hetzner(HetznerProvider),
    /// GleSYS
    Glesys(GlesysProvider),
    /// Local k3d
    K3d(K3dProvider),
}

impl Backend {
    /// Build the back end `kind` with the credentials stored in `project`
    ///
    /// k3d needs neither credentials nor the bootstrapper.
    pub fn new(
        kind: BackendKind,
        project: &Project,
        store: Arc<dyn ProjectStore>,
        bootstrapper: Arc<ClusterBootstrapper>,
    ) -> Result<Self> {
        Self::with_options(kind, project, store, bootstrapper, &BackendOptions::default())
    }

    /// Like [`Backend::new`], with endpoint and sizing overrides
    pub fn with_options(
        kind: BackendKind,
        project: &Project,
        store: Arc<dyn ProjectStore>,
        bootstrapper: Arc<ClusterBootstrapper>,
        options: &BackendOptions,
    ) -> Result<Self> {
        let backend = match kind {
            BackendKind::Hetzner => {
                let mut client = HetznerClient::new(project.provider_token.clone())?;
                if let Some(url) = &options.hetzner_url {
                    client = client.with_base_url(url.as_str());
                }
                Backend::Hetzner(
                    HetznerProvider::new(client, store, bootstrapper)
                        .with_settings(options.hetzner.clone()),
                )
            }
            BackendKind::Glesys => {
                let mut client = GlesysClient::new(
                    project.provider_id.clone().unwrap_or_default(),
                    project.provider_token.clone(),
                )?;
                if let Some(url) = &options.glesys_url {
                    client = client.with_base_url(url.as_str());
                }
                Backend::Glesys(
                    GlesysProvider::new(client, store, bootstrapper)
                        .with_settings(options.glesys.clone()),
                )
            }
            BackendKind::K3d => Backend::K3d(K3dProvider::new(store)),
        };
        Ok(backend)
    }

    /// Which back end this is
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Hetzner(_) => BackendKind::Hetzner,
            Backend::Glesys(_) => BackendKind::Glesys,
            Backend::K3d(_) => BackendKind::K3d,
        }
    }

    /// Node lifecycle and bootstrap
    pub fn nodes(&self) -> &dyn NodeProvider {
        match self {
            Backend::Hetzner(p) => p,
            Backend::Glesys(p) => p,
            Backend::K3d(p) => p,
        }
    }

    /// Project key registration
    pub fn keys(&self) -> &dyn KeyProvider {
        match self {
            Backend::Hetzner(p) => p,
            Backend::Glesys(p) => p,
            Backend::K3d(p) => p,
        }
    }

    /// Wildcard DNS record
    pub fn dns(&self) -> &dyn DnsProvider {
        match self {
            Backend::Hetzner(p) => p,
            Backend::Glesys(p) => p,
            Backend::K3d(p) => p,
        }
    }

    /// Run a full reconcile pass with this back end's three contracts
    pub async fn reconcile(
        &self,
        store: &dyn ProjectStore,
        project: &mut Project,
    ) -> Result<ReconcileSummary> {
        reconcile(self.nodes(), self.keys(), self.dns(), store, project).await
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}
