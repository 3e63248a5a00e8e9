//! Swarmscan CLI
//!
//! Runs the swarmscan core and talks to it from the terminal.

mod commands;
mod config;
mod http;
mod logging;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "swarmscan")]
#[command(version)]
#[command(about = "Swarmscan - trust-weighted malware verdicts shared between peers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the core: container jobs, proxy listener and peer endpoint
    Serve(commands::serve::ServeArgs),

    /// Ask a running core whether a URL is allowed
    Classify(commands::classify::ClassifyArgs),

    /// Show the header of a digest or log file
    Inspect(commands::inspect::InspectArgs),

    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Classify(args) => commands::classify::run(args).await,
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Config => commands::config::run(),
    };

    std::process::exit(exit_code);
}
