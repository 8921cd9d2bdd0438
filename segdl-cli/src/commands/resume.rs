//! Resume command - continue unfinished transfers from the state file.

use segdl::model::TransferStatus;
use segdl::orchestrator::Orchestrator;

use super::common::find_transfer;
use crate::error::CliError;
use crate::progress::ProgressDisplay;
use crate::runner::{interrupt_token, report, run_session, CliRunner};

/// Arguments for the resume command.
pub struct ResumeArgs {
    /// Paused transfers to resume, by id or unique id prefix.
    pub ids: Vec<String>,
    /// Resume every paused transfer.
    pub all: bool,
}

/// Run the resume command.
///
/// Transfers that were queued or running when the last process stopped are
/// always picked up. Paused ones stay paused unless named or `--all` is given.
pub fn run(args: ResumeArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("resume");

    let store = runner.open_store()?;
    let transport = runner.transport()?;
    let interrupt = interrupt_token()?;

    let mut paused = Vec::with_capacity(args.ids.len());
    for prefix in &args.ids {
        let transfer = find_transfer(store.as_ref(), prefix)?;
        if transfer.status == TransferStatus::Paused {
            paused.push(transfer.id);
        } else {
            println!("{} is {}, not paused", transfer.id, transfer.status);
        }
    }

    let config = runner.config().orchestrator_config();

    runner.block_on(async {
        let orchestrator = Orchestrator::new(store, transport, config);
        let events = orchestrator.subscribe();

        let recovered = orchestrator.recover()?;
        let resumed = if args.all {
            orchestrator.resume_all()
        } else {
            for id in &paused {
                orchestrator.resume(id)?;
            }
            paused.len()
        };

        let restarted = recovered.started + recovered.queued;
        if restarted + resumed == 0 {
            println!("Nothing to resume.");
            if recovered.held > 0 {
                println!(
                    "{} paused transfer(s); name them or use --all to resume.",
                    recovered.held
                );
            }
            orchestrator.shutdown().await;
            return Ok(());
        }

        println!(
            "Resuming {} transfer(s) ({} recovered, {} unpaused)",
            restarted + resumed,
            restarted,
            resumed
        );
        if recovered.demoted > 0 {
            println!("{} waiting for a free slot", recovered.demoted);
        }
        println!();

        orchestrator.start();
        let summary = run_session(&orchestrator, events, ProgressDisplay::new(), interrupt).await;
        report(&summary)
    })
}
