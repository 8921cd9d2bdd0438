//! Pause, cancel and remove commands.
//!
//! These edit the state file directly; they do not talk to a running
//! `segdl` process. A transfer paused here stays paused until
//! `segdl resume <ID>`.

use segdl::merge::remove_sinks;
use segdl::model::TransferStatus;
use segdl::orchestrator::Orchestrator;
use segdl::storage::TransferStore;
use tracing::info;

use super::common::find_transfer;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Marks a queued or interrupted transfer paused.
pub fn run_pause(id: &str, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    let store = runner.open_store()?;

    let mut transfer = find_transfer(store.as_ref(), id)?;
    if transfer.status == TransferStatus::Paused {
        println!("{} is already paused", transfer.id);
        return Ok(());
    }
    transfer.transition(TransferStatus::Paused)?;
    store.update(&transfer)?;

    info!(transfer_id = %transfer.id, "transfer paused from CLI");
    println!("Paused {}", transfer.id);
    Ok(())
}

/// Cancels a transfer and deletes its partial data.
pub fn run_cancel(id: &str, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    let store = runner.open_store()?;

    let mut transfer = find_transfer(store.as_ref(), id)?;
    if transfer.status == TransferStatus::Cancelled {
        println!("{} is already cancelled", transfer.id);
        return Ok(());
    }
    transfer.transition(TransferStatus::Cancelled)?;

    let segments = store.segments_for(&transfer.id)?;
    remove_sinks(&segments);
    store.delete_segments(&transfer.id)?;
    transfer.speed = 0;
    store.update(&transfer)?;

    info!(transfer_id = %transfer.id, sinks = segments.len(), "transfer cancelled from CLI");
    println!("Cancelled {}", transfer.id);
    Ok(())
}

/// Forgets a finished transfer. The downloaded file itself is kept.
pub fn run_remove(id: &str, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    let store = runner.open_store()?;
    let transfer = find_transfer(store.as_ref(), id)?;

    let orchestrator = Orchestrator::new(
        store,
        runner.transport()?,
        runner.config().orchestrator_config(),
    );
    orchestrator.remove(&transfer.id)?;

    println!("Removed {}", transfer.id);
    Ok(())
}
