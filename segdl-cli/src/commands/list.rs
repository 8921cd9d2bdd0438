//! List command - show transfers recorded in the state file.

use console::style;
use segdl::config::human_size;
use segdl::model::{Transfer, TransferStatus};
use segdl::storage::{scheduling_order, TransferStore};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the list command.
pub struct ListArgs {
    /// Only show transfers in this state.
    pub status: Option<TransferStatus>,
}

/// Run the list command.
pub fn run(args: ListArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    let store = runner.open_store()?;

    let transfers: Vec<Transfer> = match args.status {
        Some(status) => store.with_status(&[status])?,
        None => {
            let mut all = store.list()?;
            all.sort_by(scheduling_order);
            all
        }
    };

    if transfers.is_empty() {
        println!("No transfers.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:>5} {:>21} {:>9}  FILE",
        "ID", "STATUS", "PRI", "PROGRESS", "SPEED"
    );
    for transfer in &transfers {
        println!("{}", format_row(transfer));
        if let Some(ref error) = transfer.error {
            println!("{:<16} {}", "", style(error).dim());
        }
    }

    Ok(())
}

fn format_row(transfer: &Transfer) -> String {
    let status = format!("{:<10}", transfer.status.as_str());
    let status = match transfer.status {
        TransferStatus::Completed => style(status).green(),
        TransferStatus::Failed | TransferStatus::Cancelled => style(status).red(),
        TransferStatus::Paused => style(status).yellow(),
        TransferStatus::Active | TransferStatus::Merging => style(status).cyan(),
        TransferStatus::Pending | TransferStatus::Queued => style(status),
    };

    let progress = match transfer.total_size {
        Some(total) => format!(
            "{} / {} {:>3}%",
            human_size(transfer.downloaded),
            human_size(total),
            transfer.percent()
        ),
        None => human_size(transfer.downloaded),
    };
    let speed = if transfer.status.is_running() && transfer.speed > 0 {
        format!("{}/s", human_size(transfer.speed))
    } else {
        "-".to_string()
    };
    let name = transfer
        .destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| transfer.destination.display().to_string());

    format!(
        "{:<16} {} {:>5} {:>21} {:>9}  {}",
        transfer.id.as_str(),
        status,
        transfer.priority.value(),
        progress,
        speed,
        name
    )
}
