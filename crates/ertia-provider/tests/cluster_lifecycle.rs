//! Reconcile passes through the public API
//!
//! A Hetzner project goes from declared nodes to a Ready cluster against a
//! fake Hetzner API and a recording installer; a k3d project converges
//! without any remote work.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ertia_common::{
    DependencyStatus, KeyStatus, MemoryStore, Node, NodeStatus, Project, ProjectStore, Secret,
    SshKey,
};
use ertia_k3s::{Attempt, ClusterInstaller, InstallTarget, JoinConfig, MasterInstall};
use ertia_provider::backend::BackendOptions;
use ertia_provider::hetzner::HetznerSettings;
use ertia_provider::{Backend, BackendKind, ClusterBootstrapper, ConvergencePolicy};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "K10f00d::server:cafe";

#[derive(Debug, Clone, PartialEq)]
enum Install {
    Master(String, IpAddr),
    Agent(String, IpAddr, IpAddr),
}

/// Installer that records what it was asked to do; the first `unreachable`
/// calls report the node as not reachable yet
#[derive(Default)]
struct RecordingInstaller {
    installs: Mutex<Vec<Install>>,
    unreachable: Mutex<u32>,
}

impl RecordingInstaller {
    fn flaky(unreachable: u32) -> Self {
        Self {
            unreachable: Mutex::new(unreachable),
            ..Default::default()
        }
    }

    fn still_unreachable(&self) -> bool {
        let mut left = self.unreachable.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl ClusterInstaller for RecordingInstaller {
    async fn install_master(&self, target: &InstallTarget) -> ertia_k3s::Result<Attempt<MasterInstall>> {
        if self.still_unreachable() {
            return Ok(Attempt::NotReady);
        }
        self.installs
            .lock()
            .unwrap()
            .push(Install::Master(target.node.clone(), target.address));
        Ok(Attempt::Completed(MasterInstall {
            node_token: Secret::new(TOKEN),
            kubeconfig: "/tmp/ertia-test/kubeconfig".into(),
        }))
    }

    async fn install_agent(
        &self,
        target: &InstallTarget,
        join: &JoinConfig,
    ) -> ertia_k3s::Result<Attempt<()>> {
        assert_eq!(join.token.expose(), TOKEN);
        self.installs.lock().unwrap().push(Install::Agent(
            target.node.clone(),
            target.address,
            join.master_ip,
        ));
        Ok(Attempt::Completed(()))
    }
}

fn hetzner_project() -> Project {
    let mut project = Project::new("demo")
        .with_node(Node::new("m1").as_master())
        .with_node(Node::new("a1"));
    project.provider_token = Secret::new("hcloud-token");
    project.update_key(SshKey::new("ertia", "ssh-ed25519 AAAA"));
    project
}

async fn fake_hetzner() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ssh_keys"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "ssh_key": { "id": 42, "fingerprint": "b7:2f:30:a0" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    for (name, id, ip) in [("m1", 1001, "203.0.113.10"), ("a1", 1002, "203.0.113.11")] {
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(serde_json::json!({
                "name": name,
                "server_type": "cpx21",
                "location": "hel1",
                "ssh_keys": [42]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "server": { "id": id, "public_net": { "ipv4": { "ip": ip } } }
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    server
}

fn hetzner_backend(
    server: &MockServer,
    project: &Project,
    installer: Arc<RecordingInstaller>,
    store: Arc<MemoryStore>,
) -> Backend {
    let bootstrapper = Arc::new(ClusterBootstrapper::new(
        installer,
        store.clone(),
        ConvergencePolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..ConvergencePolicy::with_max_attempts(10).without_jitter()
        },
    ));
    let options = BackendOptions {
        hetzner_url: Some(server.uri()),
        hetzner: HetznerSettings {
            server_type: "cpx21".to_string(),
            location: Some("hel1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    Backend::with_options(BackendKind::Hetzner, project, store, bootstrapper, &options).unwrap()
}

// =============================================================================
// Story: a Hetzner cluster from scratch
// =============================================================================

#[tokio::test]
async fn hetzner_project_converges_to_a_ready_cluster() {
    let server = fake_hetzner().await;
    let installer = Arc::new(RecordingInstaller::flaky(2));
    let store = Arc::new(MemoryStore::new());
    let mut project = hetzner_project();
    let backend = hetzner_backend(&server, &project, installer.clone(), store.clone());

    let summary = backend.reconcile(store.as_ref(), &mut project).await.unwrap();

    assert_eq!(summary.promoted, vec!["m1", "a1"]);
    assert_eq!(project.ssh_key.as_ref().unwrap().status, KeyStatus::Active);
    for node in &project.nodes {
        assert_eq!(node.status, NodeStatus::Ready);
        assert_eq!(node.dependencies[0].status, DependencyStatus::Ready);
    }

    let master: IpAddr = "203.0.113.10".parse().unwrap();
    let agent: IpAddr = "203.0.113.11".parse().unwrap();
    assert_eq!(
        *installer.installs.lock().unwrap(),
        vec![
            Install::Master("m1".into(), master),
            Install::Agent("a1".into(), agent, master),
        ]
    );

    let a1 = project.find_node("a1").unwrap();
    assert_eq!(a1.master_ip, Some("203.0.113.10".parse().unwrap()));
    assert_eq!(a1.node_token.as_ref().map(Secret::expose), Some(TOKEN));
    assert_eq!(project.nodes[0].dependencies[0].retries, 2);

    assert_eq!(store.latest().unwrap(), project);
}

#[tokio::test]
async fn second_reconcile_changes_nothing() {
    let server = fake_hetzner().await;
    let installer = Arc::new(RecordingInstaller::default());
    let store = Arc::new(MemoryStore::new());
    let mut project = hetzner_project();
    let backend = hetzner_backend(&server, &project, installer.clone(), store.clone());

    backend.reconcile(store.as_ref(), &mut project).await.unwrap();
    let persisted = store.persist_count();
    let before = project.clone();

    let summary = backend.reconcile(store.as_ref(), &mut project).await.unwrap();

    assert!(summary.promoted.is_empty());
    assert_eq!(project, before);
    assert_eq!(store.persist_count(), persisted);
    assert_eq!(installer.installs.lock().unwrap().len(), 2);
}

// =============================================================================
// Story: a local k3d cluster
// =============================================================================

#[tokio::test]
async fn k3d_project_is_ready_after_one_pass() {
    let store = Arc::new(MemoryStore::new());
    let installer: Arc<dyn ClusterInstaller> = Arc::new(RecordingInstaller::default());
    let persist: Arc<dyn ProjectStore> = store.clone();
    let bootstrapper = Arc::new(ClusterBootstrapper::new(
        installer,
        persist.clone(),
        ConvergencePolicy::default(),
    ));
    let mut project = Project::new("local")
        .with_node(
            Node::new("server-0")
                .as_master()
                .with_dependency(ertia_common::Dependency::k3s()),
        )
        .with_node(Node::new("agent-0").with_dependency(ertia_common::Dependency::k3s()));

    let backend = Backend::new(BackendKind::K3d, &project, persist, bootstrapper).unwrap();
    let summary = backend.reconcile(store.as_ref(), &mut project).await.unwrap();

    assert_eq!(summary.promoted, vec!["server-0", "agent-0"]);
    assert!(project.nodes.iter().all(|n| n.status == NodeStatus::Ready));
    assert_eq!(store.latest().unwrap(), project);
}
