pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "outlay",
    about = "Outlay operator CLI",
    long_about = "Operate the Outlay approval engine: apply migrations, load seed data, \
                  inspect effective configuration, and run readiness checks.",
    after_help = "Examples:\n  outlay migrate\n  outlay seed\n  outlay doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Load and verify the deterministic seed dataset
    Seed,
    /// Print effective configuration with source attribution and redaction
    Config,
    /// Check configuration, approvals readiness, and database connectivity
    Doctor {
        /// Emit machine-readable JSON output
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn execute(self) -> commands::CommandResult {
        match self {
            Self::Migrate => commands::migrate::run(),
            Self::Seed => commands::seed::run(),
            Self::Config => {
                commands::CommandResult { exit_code: 0, output: commands::config::run() }
            }
            Self::Doctor { json } => {
                commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
            }
        }
    }
}

pub fn run() -> ExitCode {
    let result = Cli::parse().command.execute();
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
