use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::check::CheckArgs;

/// credlock - password policy and soft-lockout operator tool
#[derive(Parser)]
#[command(name = "credlock")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (environment variables still apply)
    #[arg(long, global = true, env = "CREDLOCK_CONFIG", default_value = "credlock.toml")]
    config: PathBuf,

    /// Emit JSON logs at the configured level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a candidate password against the configured rules
    Check(CheckArgs),
    /// Print the history fingerprint of a password read from stdin
    Fingerprint,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check(args) => commands::check::execute(&cli.config, cli.verbose, args).await,
        Commands::Fingerprint => commands::fingerprint::execute(),
        Commands::Config => commands::config::execute(&cli.config),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            for cause in e.chain().skip(1) {
                eprintln!("\n{} {}", "Caused by:".yellow(), cause);
            }

            std::process::exit(1);
        }
    }
}
