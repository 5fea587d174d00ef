use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(
    name = "windsnap",
    version,
    about = "Hourly snapshot sync with content dedup and a rebuilt index ledger"
)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation cycle over every slot
    Sync {
        /// Skip the git commit step even when enabled in config
        #[arg(long)]
        no_commit: bool,
    },
    /// Repeat cycles every poll interval
    Watch {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Skip the git commit step even when enabled in config
        #[arg(long)]
        no_commit: bool,
    },
    /// Rebuild the index ledger from the store without fetching
    Index,
    /// Check the ledger and stored records for drift
    Verify {
        /// Treat records sharing identical content as issues
        #[arg(long)]
        strict: bool,
    },
    /// Show resolved paths, config and the last cycle
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "issues" }
    );
    for line in &report.details {
        println!("  {line}");
    }
    for line in &report.issues {
        println!("  ! {line}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Sync { no_commit } => {
            commands::sync::run(&commands::sync::SyncOptions { no_commit })?
        }
        Command::Watch { once, no_commit } => {
            commands::watch::run(&commands::watch::WatchOptions { once, no_commit })?
        }
        Command::Index => commands::index::run()?,
        Command::Verify { strict } => {
            commands::verify::run(&commands::verify::VerifyOptions { strict })?
        }
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        return Err(anyhow!(
            "{} reported {} issue(s)",
            report.command,
            report.issues.len()
        ));
    }
    Ok(())
}
