//! Status command

use std::path::PathBuf;

use clap::Args;
use ertia_common::{DependencyStatus, Node, Project};

use super::open_project;
use crate::Result;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project file
    #[arg(short, long, env = "ERTIA_PROJECT")]
    pub project: PathBuf,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let (_, project) = open_project(&args.project).await?;
    for line in render(&project) {
        println!("{}", line);
    }
    Ok(())
}

/// One line per node: name, status, role, dependency states and last error
pub fn render(project: &Project) -> Vec<String> {
    project.nodes.iter().map(node_line).collect()
}

fn node_line(node: &Node) -> String {
    let role = if node.is_master { "master" } else { "agent" };
    let deps = if node.dependencies.is_empty() {
        "-".to_string()
    } else {
        node.dependencies
            .iter()
            .map(|d| {
                let state = match d.status {
                    DependencyStatus::New => "New",
                    DependencyStatus::Ready => "Ready",
                };
                if d.retries > 0 {
                    format!("{}={} ({} retries)", d.name, state, d.retries)
                } else {
                    format!("{}={}", d.name, state)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut line = format!(
        "{:<20} {:<10} {:<6} {}",
        node.name,
        node.status.to_string(),
        role,
        deps
    );
    if let Some(error) = &node.error {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ertia_common::{Dependency, NodeStatus, K3S_DEPENDENCY};

    #[test]
    fn renders_one_line_per_node() {
        let mut master = Node::new("m1")
            .as_master()
            .with_status(NodeStatus::Ready)
            .with_dependency(Dependency::k3s());
        master.mark_ready(K3S_DEPENDENCY);

        let mut agent = Node::new("a1")
            .with_status(NodeStatus::Active)
            .with_dependency(Dependency::k3s());
        if let Some(dep) = agent.dependency_mut(K3S_DEPENDENCY) {
            dep.retries = 3;
        }

        let mut failed = Node::new("a2").with_status(NodeStatus::Failing);
        failed.error = Some("quota exceeded".into());

        let project = Project::new("demo")
            .with_node(master)
            .with_node(agent)
            .with_node(failed);

        let lines = render(&project);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("m1"));
        assert!(lines[0].contains("Ready"));
        assert!(lines[0].contains("master"));
        assert!(lines[0].ends_with("K3S=Ready"));
        assert!(lines[1].contains("agent"));
        assert!(lines[1].contains("K3S=New (3 retries)"));
        assert!(lines[2].contains("-  error: quota exceeded"));
    }
}
