//! One desired-state pass over a project
//!
//! Keys come first because node creation needs them, nodes next, then K3S
//! on the fresh nodes, and finally the DNS record that needs an Active
//! ingress node. Nodes whose dependencies are all fulfilled are promoted to
//! Ready at the end.

use ertia_common::{Project, ProjectStore};
use tracing::{info, instrument};

use crate::{DnsProvider, KeyProvider, NodeProvider, Result};

/// What a reconcile pass changed at the node level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Nodes promoted to Ready by this pass
    pub promoted: Vec<String>,
}

/// Run `sync_keys`, `sync_nodes`, `sync_dependencies` and `create_record`
/// in order, then promote fully bootstrapped nodes
///
/// Stops at the first failing step. Each step persists its own changes;
/// promotion is persisted here.
#[instrument(skip_all, fields(project = %project.name))]
pub async fn reconcile(
    nodes: &dyn NodeProvider,
    keys: &dyn KeyProvider,
    dns: &dyn DnsProvider,
    store: &dyn ProjectStore,
    project: &mut Project,
) -> Result<ReconcileSummary> {
    keys.sync_keys(project).await?;
    nodes.sync_nodes(project).await?;
    nodes.sync_dependencies(project).await?;
    dns.create_record(project).await?;

    let promoted = project.promote_ready_nodes();
    if !promoted.is_empty() {
        store.persist(project).await?;
        info!(nodes = ?promoted, "Nodes ready");
    }

    Ok(ReconcileSummary { promoted })
}
