//! Cluster bootstrap orchestrator
//!
//! Drives every node's K3S dependency from New to Ready. The master is
//! installed first; its join token and address are then propagated to the
//! agents. Ordering is data-dependent: an agent is only installed once the
//! master fulfils K3S, so an agent declared before the master is picked up
//! on a later pass.
//!
//! # Passes
//!
//! Each pass works on a copy of the node list and visits nodes in
//! declaration order. When the pass ends the copy is committed to the
//! project and persisted once, whether the pass finished, hit a node that
//! is not reachable yet, or failed. There is no rollback.
//!
//! A not-ready node ends the pass. The orchestrator then backs off and
//! starts over from the first node, up to the limits of its
//! [`ConvergencePolicy`].

use std::net::IpAddr;
use std::sync::Arc;

use ertia_common::{find_master, Node, Project, ProjectStore, K3S_DEPENDENCY};
use ertia_k3s::{Attempt, ClusterInstaller, InstallTarget, JoinConfig};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::retry::{Backoff, ConvergencePolicy};
use crate::{Error, Result};

const DEFAULT_INSTALL_USER: &str = "root";

/// What a single pass achieved
#[derive(Debug, Default, PartialEq, Eq)]
struct PassReport {
    installed: usize,
    not_ready: Option<String>,
}

/// Installs K3S across a project's nodes
pub struct ClusterBootstrapper {
    installer: Arc<dyn ClusterInstaller>,
    store: Arc<dyn ProjectStore>,
    policy: ConvergencePolicy,
}

impl ClusterBootstrapper {
    /// Create an orchestrator
    pub fn new(
        installer: Arc<dyn ClusterInstaller>,
        store: Arc<dyn ProjectStore>,
        policy: ConvergencePolicy,
    ) -> Self {
        Self {
            installer,
            store,
            policy,
        }
    }

    /// The retry policy in use
    pub fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    /// Bring every live node's K3S dependency to Ready
    ///
    /// Returns without touching any node or the store when nothing requires
    /// K3S. Fails fast on a broken topology, on any install failure, and
    /// when the retry budget is exhausted.
    #[instrument(skip_all, fields(project = %project.name))]
    pub async fn sync_dependencies(&self, project: &mut Project) -> Result<()> {
        if pending_nodes(&project.nodes).is_empty() {
            debug!("No node requires K3S");
            return Ok(());
        }
        project.validate()?;

        let started = Instant::now();
        let mut backoff = Backoff::new(&self.policy);
        let mut attempts = 0u32;

        loop {
            let mut nodes = project.nodes.clone();
            let outcome = self.run_pass(project, &mut nodes).await;

            if nodes != project.nodes {
                project.commit_nodes(nodes)?;
                self.store.persist(project).await?;
            }
            let report = outcome?;

            let pending = pending_nodes(&project.nodes);
            if pending.is_empty() {
                info!("All nodes bootstrapped");
                return Ok(());
            }

            if let Some(node) = report.not_ready {
                attempts += 1;
                let elapsed = started.elapsed();
                let delay = backoff.next_delay();
                if attempts >= self.policy.max_attempts || elapsed + delay > self.policy.deadline {
                    warn!(node = %node, attempts, elapsed_ms = elapsed.as_millis(), "Giving up on unreachable node");
                    return Err(Error::ConvergenceTimedOut {
                        node,
                        attempts,
                        elapsed,
                    });
                }

                info!(
                    node = %node,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Node not ready, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if report.installed == 0 {
                return Err(Error::Stalled { pending });
            }
            debug!(installed = report.installed, pending = pending.len(), "Pass made progress");
        }
    }

    /// Visit every pending node once, mutating `nodes` in place
    async fn run_pass(&self, project: &Project, nodes: &mut [Node]) -> Result<PassReport> {
        let channel = project.k3s_channel.as_deref();
        let mut report = PassReport::default();

        for i in 0..nodes.len() {
            let node = &nodes[i];
            if node.is_retired() || !node.requires(K3S_DEPENDENCY) {
                continue;
            }

            let attempt = if node.is_master {
                self.install_master(&mut nodes[i], channel).await?
            } else {
                let join = match stored_join(node) {
                    Some(join) => join,
                    None => {
                        let master = find_master(nodes)?;
                        if !master.fulfils(K3S_DEPENDENCY) {
                            debug!(node = %nodes[i].name, master = %master.name, "Master not ready, skipping agent");
                            continue;
                        }
                        let (ip, token) = match (master.ipv4, &master.node_token) {
                            (Some(ip), Some(token)) => (ip, token.clone()),
                            _ => {
                                return Err(Error::config(format!(
                                    "master {} is ready but has no IPv4 address or join token",
                                    master.name
                                )))
                            }
                        };
                        let agent = &mut nodes[i];
                        agent.master_ip = Some(ip);
                        agent.node_token = Some(token.clone());
                        JoinConfig {
                            master_ip: IpAddr::V4(ip),
                            token,
                        }
                    }
                };
                self.install_agent(&nodes[i], &join, channel).await?
            };

            let node = &mut nodes[i];
            match attempt {
                Attempt::Completed(()) => {
                    node.mark_ready(K3S_DEPENDENCY);
                    report.installed += 1;
                    info!(node = %node.name, master = node.is_master, "K3S dependency ready");
                }
                Attempt::NotReady => {
                    if let Some(dep) = node.dependency_mut(K3S_DEPENDENCY) {
                        dep.retries += 1;
                    }
                    report.not_ready = Some(node.name.clone());
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn install_master(&self, node: &mut Node, channel: Option<&str>) -> Result<Attempt<()>> {
        let target = install_target(node, channel)?;
        let attempt = self
            .installer
            .install_master(&target)
            .await
            .map_err(|e| Error::install(&node.name, e))?;

        Ok(attempt.map(|install| {
            node.node_token = Some(install.node_token);
        }))
    }

    async fn install_agent(
        &self,
        node: &Node,
        join: &JoinConfig,
        channel: Option<&str>,
    ) -> Result<Attempt<()>> {
        let target = install_target(node, channel)?;
        self.installer
            .install_agent(&target, join)
            .await
            .map_err(|e| Error::install(&node.name, e))
    }
}

/// Names of live nodes that still require K3S
fn pending_nodes(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| !n.is_retired() && n.requires(K3S_DEPENDENCY))
        .map(|n| n.name.clone())
        .collect()
}

/// Join settings an agent already carries from an earlier pass
fn stored_join(node: &Node) -> Option<JoinConfig> {
    match (node.master_ip, &node.node_token) {
        (Some(ip), Some(token)) if !token.is_empty() => Some(JoinConfig {
            master_ip: IpAddr::V4(ip),
            token: token.clone(),
        }),
        _ => None,
    }
}

fn install_target(node: &Node, channel: Option<&str>) -> Result<InstallTarget> {
    let address = node
        .address()
        .ok_or_else(|| Error::config(format!("node {} has no address", node.name)))?;
    let user = if node.install_user.is_empty() {
        DEFAULT_INSTALL_USER.to_string()
    } else {
        node.install_user.clone()
    };

    Ok(InstallTarget {
        node: node.name.clone(),
        address,
        user,
        password: node.install_password.clone(),
        channel: channel.map(String::from),
    })
}
