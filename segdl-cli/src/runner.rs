//! Shared setup for commands that touch the state file or the network.
//!
//! [`CliRunner`] loads `config.ini`, installs logging and owns the Tokio
//! runtime. [`run_session`] drives an orchestrator until it has nothing left
//! to do, or until Ctrl+C asks it to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use segdl::config::ConfigFile;
use segdl::engine::TransferEvent;
use segdl::logging::{self, LoggingGuard};
use segdl::orchestrator::Orchestrator;
use segdl::storage::JsonFileStore;
use segdl::transport::ReqwestTransport;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::progress::{ProgressDisplay, SessionSummary};

/// How often the session checks whether the orchestrator went idle.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Loads configuration and installs logging. With `verbose`, log lines
    /// also go to stderr.
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let logging = logging::init(&config.logging_config().with_stderr(verbose))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            config,
            runtime,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = segdl::VERSION,
            command,
            state_file = %self.config.state_file().display(),
            "segdl starting"
        );
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn open_store(&self) -> Result<Arc<JsonFileStore>, CliError> {
        Ok(Arc::new(JsonFileStore::open(self.config.state_file())?))
    }

    pub fn transport(&self) -> Result<Arc<ReqwestTransport>, CliError> {
        Ok(Arc::new(ReqwestTransport::new(
            &self.config.transport_config(),
        )?))
    }
}

/// Cancelled by the Ctrl+C handler.
pub fn interrupt_token() -> Result<CancellationToken, CliError> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
    Ok(token)
}

/// Shows progress until no transfer is active or queued.
///
/// `events` should be subscribed before the orchestrator starts so the first
/// status changes are not missed. On interrupt the orchestrator is shut down,
/// which leaves the running transfers queued in the state file for
/// `segdl resume`.
pub async fn run_session(
    orchestrator: &Orchestrator,
    mut events: broadcast::Receiver<TransferEvent>,
    mut display: ProgressDisplay,
    interrupt: CancellationToken,
) -> SessionSummary {
    let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = interrupt.cancelled() => {
                display.println("Interrupted, saving progress...");
                display.set_interrupted();
                break;
            }

            event = events.recv() => match event {
                Ok(event) => display.handle(event, orchestrator),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress display fell behind");
                }
                Err(RecvError::Closed) => break,
            },

            _ = idle_check.tick() => {
                if orchestrator.active_count() == 0 && orchestrator.queued_count() == 0 {
                    break;
                }
            }
        }
    }

    orchestrator.shutdown().await;
    while let Ok(event) = events.try_recv() {
        display.handle(event, orchestrator);
    }
    display.finish()
}

/// Prints the summary and converts failures into an error.
pub fn report(summary: &SessionSummary) -> Result<(), CliError> {
    println!();
    if summary.interrupted {
        println!("Unfinished transfers were saved. Run 'segdl resume' to continue.");
    }
    if !summary.completed.is_empty() {
        println!("Completed: {}", summary.completed.len());
    }
    for (id, reason) in &summary.failed {
        println!("Failed:    {} ({})", id, reason);
    }
    for id in &summary.mismatched {
        println!("Checksum mismatch: {}", id);
    }

    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::TransferFailed {
            failed: summary.failed.len(),
        })
    }
}
