//! qrchain: operator CLI for the QRChain provenance ledger
//!
//! Keeps ledger state in a sealed JSON file between invocations. Each write
//! command acts as the identity given with `--as`.

mod commands;
mod config;
mod demo;

use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

use commands::{CommandContext, Commands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "qrchain")]
#[command(about = "Farm-to-shelf provenance ledger for durian supply chains")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "qrchain.toml")]
    config: PathBuf,

    /// State file (overrides config file)
    #[arg(short, long, env = "QRCHAIN_STATE")]
    state: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qrchain=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = CliConfig::load(&cli.config)?;
    if let Some(state) = cli.state {
        config.state.path = state;
    }
    debug!(state = %config.state.path.display(), "Using state file");

    let ctx = CommandContext::new(config, cli.json);
    match commands::execute(&ctx, cli.command).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
