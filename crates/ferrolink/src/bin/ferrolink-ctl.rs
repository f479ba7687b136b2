//! Command line front end for the ferrolink client.

use anyhow::{bail, Context, Result};
use ferrolink::{Client, ClientConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

const USAGE: &str = "\
usage: ferrolink-ctl [--addr ADDR] <command>

commands:
  put <local> <remote>     upload a file to the agent
  get <remote> <local>     download a file from the agent
  load <id> <file>         load module code under an identifier
  do <id> [args...]        execute a loaded module
";

enum Command {
    Put { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
    Load { identifier: String, file: PathBuf },
    Do { identifier: String, args: Vec<String> },
}

fn parse_args() -> Result<(SocketAddr, Command)> {
    let mut addr: SocketAddr = ([127, 0, 0, 1], 4815).into();
    let mut iter = std::env::args().skip(1).peekable();

    while let Some(arg) = iter.peek() {
        match arg.as_str() {
            "--addr" => {
                iter.next();
                let value = iter.next().context("--addr requires an address")?;
                addr = value.parse().context("invalid agent address")?;
            }
            "--help" | "-h" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            _ => break,
        }
    }

    let command = match iter.next().as_deref() {
        Some("put") => Command::Put {
            local: PathBuf::from(iter.next().context("put requires a local path")?),
            remote: iter.next().context("put requires a remote path")?,
        },
        Some("get") => Command::Get {
            remote: iter.next().context("get requires a remote path")?,
            local: PathBuf::from(iter.next().context("get requires a local path")?),
        },
        Some("load") => Command::Load {
            identifier: iter.next().context("load requires an identifier")?,
            file: PathBuf::from(iter.next().context("load requires a code file")?),
        },
        Some("do") => Command::Do {
            identifier: iter.next().context("do requires an identifier")?,
            args: iter.collect(),
        },
        Some(other) => bail!("unknown command: {other}\n{USAGE}"),
        None => bail!("no command given\n{USAGE}"),
    };
    Ok((addr, command))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (addr, command) = parse_args()?;
    let mut client = Client::connect(ClientConfig::new(addr)).await?;

    match command {
        Command::Put { local, remote } => {
            client.put(&local, &remote).await?;
            println!("uploaded {} to {remote}", local.display());
        }
        Command::Get { remote, local } => {
            let received = client.get(&remote, &local).await?;
            println!(
                "downloaded {remote} to {} ({} bytes)",
                local.display(),
                received.size
            );
        }
        Command::Load { identifier, file } => {
            let code = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            client.load(&identifier, code).await?;
            println!("loaded module {identifier}");
        }
        Command::Do { identifier, args } => {
            let output = client.execute(&identifier, args).await?;
            if !output.output.is_empty() {
                println!("{}", output.output);
            }
            eprintln!("completed in {} ms", output.duration_ms);
        }
    }
    Ok(())
}
