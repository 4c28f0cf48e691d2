//! Geofence simulator: the `geofence-sim` command.

mod cli;
mod run;
mod scenario;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,geofence=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            store,
            json,
        } => {
            run::run(run::Args {
                scenario,
                config,
                store,
                json,
            })
            .await
        }
        Commands::Check { scenario } => run::check(&scenario),
        Commands::Fences { store, json } => run::list_fences(&store, json),
    }
}
