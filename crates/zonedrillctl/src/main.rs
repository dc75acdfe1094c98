//! Zonedrill Control - CLI for availability zone failover drills

use clap::Parser;
use owo_colors::OwoColorize;
use zonedrillctl::cli::Cli;
use zonedrillctl::{commands, errors};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // clap would exit 2, which is reserved for timed-out drills
            let code = if e.use_stderr() {
                errors::EXIT_USAGE
            } else {
                errors::EXIT_SUCCESS
            };
            std::process::exit(code);
        }
    };

    let code = match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            errors::exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}
