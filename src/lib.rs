//! ertia CLI library
//!
//! Loads a project file, picks a back end and drives the project towards its
//! declared state.

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// ertia - Frictionless K3S clusters
#[derive(Parser, Debug)]
#[command(name = "ertia")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision nodes, install K3S and publish the ingress record
    Sync(commands::sync::SyncArgs),
    /// Load a project file and check its topology
    Validate(commands::validate::ValidateArgs),
    /// Print one line per node
    Status(commands::status::StatusArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Sync(args) => commands::sync::run(args).await.map(|_| ()),
            Commands::Validate(args) => commands::validate::run(args).await,
            Commands::Status(args) => commands::status::run(args).await,
        }
    }
}
