//! ertia CLI
//!
//! Provisions K3S clusters on Hetzner Cloud, GleSYS or local k3d.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ertia::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let result = cli.run().await;
    if let Err(e) = &result {
        if let Some(hint) = e.hint() {
            eprintln!("hint: {}", hint);
        }
    }
    result
}
