//! Ferrolink Agent Binary
//!
//! Accepts encrypted connections and serves transfer and module
//! commands under a configured root directory.

use anyhow::{bail, Context, Result};
use ferrolink_agent::{Agent, AgentConfig};
use std::path::PathBuf;
use tracing::info;

struct Args {
    listen: Option<String>,
    root: Option<PathBuf>,
    capacity: Option<usize>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        listen: None,
        root: None,
        capacity: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--listen" => {
                args.listen = Some(iter.next().context("--listen requires an address")?);
            }
            "--root" => {
                args.root = Some(PathBuf::from(
                    iter.next().context("--root requires a directory")?,
                ));
            }
            "--modules" => {
                let value = iter.next().context("--modules requires a count")?;
                args.capacity = Some(value.parse().context("--modules takes a number")?);
            }
            "--help" | "-h" => {
                println!(
                    "usage: ferrolink-agent [--listen ADDR] [--root DIR] [--modules COUNT]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    let mut config = AgentConfig::default();
    if let Some(listen) = args.listen {
        config.listen_addr = listen.parse().context("invalid listen address")?;
    }
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if let Some(capacity) = args.capacity {
        config.module_capacity = capacity;
    }

    std::fs::create_dir_all(&config.root_dir)
        .with_context(|| format!("creating root directory {}", config.root_dir.display()))?;

    info!("starting ferrolink agent");
    let agent = Agent::new(config)?;
    agent.run().await?;
    Ok(())
}
