use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "geofence-sim",
    about = "Replay geofence scenarios against a simulated location host",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register the scenario's fences, play its steps and print every delivered transition
    Run {
        /// Path to the scenario JSON
        scenario: PathBuf,

        /// Registry config JSON (notification options, coalescing window, ...)
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite file to restore fences from and save the final snapshot to
        #[arg(long)]
        store: Option<PathBuf>,

        /// Print transitions as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Validate the scenario's fences without running it
    Check {
        /// Path to the scenario JSON
        scenario: PathBuf,
    },

    /// List fences saved in a store
    Fences {
        /// SQLite file written by `run --store`
        store: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
