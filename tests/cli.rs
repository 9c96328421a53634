//! Command line round trips against project files on disk

use clap::Parser;
use ertia::Cli;
use ertia_common::{Dependency, JsonFileStore, Node, NodeStatus, Project, ProjectStore};

async fn project_file(dir: &tempfile::TempDir, project: &Project) -> String {
    let path = dir.path().join("project.json");
    JsonFileStore::new(&path).persist(project).await.unwrap();
    path.to_string_lossy().into_owned()
}

fn local_project() -> Project {
    Project::new("local")
        .with_node(
            Node::new("server-0")
                .as_master()
                .with_dependency(Dependency::k3s()),
        )
        .with_node(Node::new("agent-0").with_dependency(Dependency::k3s()))
        .with_node(Node::new("agent-1").with_dependency(Dependency::k3s()))
}

#[tokio::test]
async fn validate_sync_and_status_on_a_k3d_project() {
    let dir = tempfile::tempdir().unwrap();
    let path = project_file(&dir, &local_project()).await;
    let home = dir.path().join("home");
    let home = home.to_str().unwrap();

    Cli::try_parse_from(["ertia", "validate", "--project", &path])
        .unwrap()
        .run()
        .await
        .unwrap();

    Cli::try_parse_from([
        "ertia", "sync", "--project", &path, "--backend", "k3d", "--home", home,
    ])
    .unwrap()
    .run()
    .await
    .unwrap();

    let synced = JsonFileStore::new(&path).load().await.unwrap();
    assert!(synced.nodes.iter().all(|n| n.status == NodeStatus::Ready));

    // a second sync finds nothing to do
    Cli::try_parse_from([
        "ertia", "sync", "--project", &path, "--backend", "k3d", "--home", home,
    ])
    .unwrap()
    .run()
    .await
    .unwrap();
    assert_eq!(JsonFileStore::new(&path).load().await.unwrap(), synced);

    Cli::try_parse_from(["ertia", "status", "--project", &path])
        .unwrap()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn masterless_project_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let project = Project::new("broken").with_node(Node::new("a1"));
    let path = project_file(&dir, &project).await;

    let err = Cli::try_parse_from(["ertia", "validate", "--project", &path])
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no master node"));
}
