//! segdl CLI - Command-line interface
//!
//! Downloads files in concurrent byte-range segments, keeps their state in a
//! JSON file and picks unfinished transfers back up with `segdl resume`.

mod commands;
mod error;
mod progress;
mod runner;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use segdl::model::TransferStatus;

use commands::config::ConfigCommands;
use commands::get::GetArgs;
use commands::list::ListArgs;
use commands::resume::ResumeArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "segdl", version = segdl::VERSION, about = "Segmented, resumable file downloads")]
struct Cli {
    /// Also write log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a URL
    Get(GetArgs),

    /// Continue unfinished transfers
    Resume {
        /// Paused transfers to resume (id or unique id prefix)
        ids: Vec<String>,

        /// Resume every paused transfer
        #[arg(long)]
        all: bool,
    },

    /// List recorded transfers
    List {
        /// Only show transfers in this state (e.g. paused, failed)
        #[arg(long)]
        status: Option<TransferStatus>,
    },

    /// Pause a queued transfer so `resume` skips it
    Pause {
        /// Transfer id or unique id prefix
        id: String,
    },

    /// Cancel a transfer and delete its partial data
    Cancel {
        /// Transfer id or unique id prefix
        id: String,
    },

    /// Forget a finished, failed or cancelled transfer
    Remove {
        /// Transfer id or unique id prefix
        id: String,
    },

    /// View or change settings in config.ini
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Get(args) => commands::get::run(args, verbose),
        Commands::Resume { ids, all } => commands::resume::run(ResumeArgs { ids, all }, verbose),
        Commands::List { status } => commands::list::run(ListArgs { status }, verbose),
        Commands::Pause { id } => commands::manage::run_pause(&id, verbose),
        Commands::Cancel { id } => commands::manage::run_cancel(&id, verbose),
        Commands::Remove { id } => commands::manage::run_remove(&id, verbose),
        Commands::Config(command) => commands::config::run(command),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from([
            "segdl",
            "get",
            "https://example.com/file.iso",
            "-o",
            "/tmp/out",
            "-s",
            "8",
            "-p",
            "high",
            "-H",
            "X-Token: abc",
            "--checksum",
            &format!("sha256:{}", "0".repeat(64)),
        ])
        .unwrap();

        let Commands::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.segments, Some(8));
        assert_eq!(args.priority, segdl::Priority::HIGH);
        assert_eq!(args.headers, vec![("X-Token".to_string(), "abc".to_string())]);
        assert!(args.checksum.is_some());
    }

    #[test]
    fn test_parse_list_status() {
        let cli = Cli::try_parse_from(["segdl", "list", "--status", "paused"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                status: Some(TransferStatus::Paused)
            }
        ));
        assert!(Cli::try_parse_from(["segdl", "list", "--status", "sleeping"]).is_err());
    }
}
