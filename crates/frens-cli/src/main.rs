mod bootstrap_helpers;
mod cli_args;
mod cli_types;
mod startup;

use anyhow::Result;
use clap::Parser;

use bootstrap_helpers::{init_tracing, load_env_file_from_args};
use cli_args::Cli;
use startup::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env_file = load_env_file_from_args(&args)?;
    init_tracing();
    if let Some(path) = env_file {
        tracing::info!(path = %path.display(), "loaded env file");
    }
    let cli = Cli::parse_from(args);
    run_cli(cli).await
}
