//! Hand-written project files through the public API

use std::net::Ipv4Addr;

use ertia_common::{
    DependencyStatus, DnsStatus, JsonFileStore, KeyStatus, NodeStatus, ProjectStore,
    K3S_DEPENDENCY,
};

const PROJECT: &str = r#"{
  "name": "demo",
  "providerId": "cl12345",
  "providerToken": "api-key",
  "k3sChannel": "stable",
  "nodes": [
    {
      "name": "m1",
      "isMaster": true,
      "status": "Active",
      "ipv4": "198.51.100.4",
      "installUser": "ertia",
      "installPassword": "s3cret",
      "dependencies": [{ "name": "K3S", "status": "Ready" }],
      "nodeToken": "K10abc::server:def"
    },
    {
      "name": "a1",
      "status": "Active",
      "ipv4": "198.51.100.5",
      "installUser": "ertia",
      "dependencies": [{ "name": "K3S", "retries": 4 }]
    },
    { "name": "a2" }
  ],
  "sshKey": { "name": "ertia", "publicKey": "ssh-ed25519 AAAA", "status": "Active" },
  "dns": { "domain": "apps.example.com" }
}"#;

#[tokio::test]
async fn operator_written_file_loads_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    tokio::fs::write(&path, PROJECT).await.unwrap();

    let project = JsonFileStore::new(&path).load().await.unwrap();

    assert_eq!(project.provider_id.as_deref(), Some("cl12345"));
    assert_eq!(project.provider_token.expose(), "api-key");
    assert_eq!(project.k3s_channel.as_deref(), Some("stable"));
    assert_eq!(project.master().unwrap().name, "m1");

    let a1 = project.find_node("a1").unwrap();
    assert_eq!(a1.ipv4, Some(Ipv4Addr::new(198, 51, 100, 5)));
    assert_eq!(a1.dependency(K3S_DEPENDENCY).unwrap().status, DependencyStatus::New);
    assert_eq!(a1.dependency(K3S_DEPENDENCY).unwrap().retries, 4);

    let a2 = project.find_node("a2").unwrap();
    assert_eq!(a2.status, NodeStatus::New);
    assert!(a2.dependencies.is_empty());

    assert_eq!(project.ssh_key.as_ref().unwrap().status, KeyStatus::Active);
    assert_eq!(project.dns.as_ref().unwrap().status, DnsStatus::New);
}

#[tokio::test]
async fn promotion_survives_a_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    tokio::fs::write(&path, PROJECT).await.unwrap();
    let store = JsonFileStore::new(&path);

    let mut project = store.load().await.unwrap();
    assert_eq!(project.promote_ready_nodes(), vec!["m1"]);
    store.persist(&project).await.unwrap();

    let reloaded = store.load().await.unwrap();
    assert_eq!(reloaded, project);
    assert_eq!(reloaded.nodes[0].status, NodeStatus::Ready);

    // secrets stay in the file but never in debug output
    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(raw.contains("K10abc::server:def"));
    assert!(!format!("{:?}", reloaded).contains("K10abc::server:def"));
    assert!(!format!("{:?}", reloaded).contains("s3cret"));
}
