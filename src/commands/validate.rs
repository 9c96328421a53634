//! Validate command

use std::path::PathBuf;

use clap::Args;

use super::open_project;
use crate::Result;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Project file
    #[arg(short, long, env = "ERTIA_PROJECT")]
    pub project: PathBuf,
}

pub async fn run(args: ValidateArgs) -> Result<()> {
    let (_, project) = open_project(&args.project).await?;

    let live = project.nodes.iter().filter(|n| !n.is_retired()).count();
    match project.master() {
        Ok(master) => println!(
            "{}: valid, {} live nodes, master {}",
            project.name, live, master.name
        ),
        Err(_) => println!("{}: valid, no live nodes", project.name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ertia_common::{JsonFileStore, Node, Project, ProjectStore};

    async fn write(dir: &tempfile::TempDir, project: &Project) -> PathBuf {
        let path = dir.path().join("project.json");
        JsonFileStore::new(&path).persist(project).await.unwrap();
        path
    }

    #[tokio::test]
    async fn single_master_project_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("demo")
            .with_node(Node::new("m1").as_master())
            .with_node(Node::new("a1"));
        let path = write(&dir, &project).await;

        run(ValidateArgs { project: path }).await.unwrap();
    }

    #[tokio::test]
    async fn two_masters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("demo")
            .with_node(Node::new("m1").as_master())
            .with_node(Node::new("m2").as_master());
        let path = write(&dir, &project).await;

        let err = run(ValidateArgs { project: path }).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Project(ertia_common::Error::MultipleMasters { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(ValidateArgs {
            project: dir.path().join("absent.json"),
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Project(ertia_common::Error::Persistence { .. })
        ));
    }
}
