//! Terminal progress display driven by orchestrator events.

use std::collections::HashMap;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use segdl::engine::TransferEvent;
use segdl::model::{TransferId, TransferStatus};
use segdl::orchestrator::Orchestrator;

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {bytes} @ {bytes_per_sec} - {msg}";

// ============================================================================
// Progress Bars
// ============================================================================

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌")
}

fn make_bar(total: Option<u64>, name: &str) -> ProgressBar {
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(bar_style(BAR_TEMPLATE));
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(bar_style(SPINNER_TEMPLATE));
            bar
        }
    };
    bar.set_message(name.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

// ============================================================================
// Display
// ============================================================================

/// What happened to the transfers seen during one session.
#[derive(Debug, Default)]
pub struct SessionSummary {
    pub completed: Vec<TransferId>,
    pub failed: Vec<(TransferId, String)>,
    pub mismatched: Vec<TransferId>,
    pub interrupted: bool,
}

/// One bar per running transfer.
pub struct ProgressDisplay {
    multi: MultiProgress,
    bars: HashMap<TransferId, ProgressBar>,
    summary: SessionSummary,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            summary: SessionSummary::default(),
        }
    }

    /// Prints above the bars without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi.println(line.as_ref()).is_err() {
            println!("{}", line.as_ref());
        }
    }

    pub fn handle(&mut self, event: TransferEvent, orchestrator: &Orchestrator) {
        match event {
            TransferEvent::StatusChanged { id, status } => self.on_status(id, status, orchestrator),
            TransferEvent::Progress {
                id,
                downloaded,
                total,
                ..
            } => {
                if let Some(bar) = self.bars.get(&id) {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(downloaded);
                }
            }
            TransferEvent::SegmentFailed { id, index, reason } => {
                self.println(format!(
                    "{} {} segment {}: {}",
                    style("!").yellow(),
                    id,
                    index,
                    reason
                ));
            }
            TransferEvent::IntegrityMismatch {
                id,
                expected,
                actual,
            } => {
                self.println(format!(
                    "{} {} checksum mismatch (expected {}, got {})",
                    style("!").red(),
                    id,
                    expected,
                    actual
                ));
                self.summary.mismatched.push(id);
            }
            TransferEvent::Completed {
                id,
                path,
                verified,
                ..
            } => {
                let note = match verified {
                    Some(true) => " (checksum verified)",
                    Some(false) => " (checksum MISMATCH)",
                    None => "",
                };
                if let Some(bar) = self.bars.remove(&id) {
                    bar.finish_with_message(format!("{}{}", path.display(), note));
                } else {
                    self.println(format!("Saved {}{}", path.display(), note));
                }
                self.summary.completed.push(id);
            }
            TransferEvent::Error { id, message, .. } => {
                self.summary.failed.push((id, message));
            }
            TransferEvent::SegmentProgress { .. } => {}
        }
    }

    fn on_status(&mut self, id: TransferId, status: TransferStatus, orchestrator: &Orchestrator) {
        match status {
            TransferStatus::Active => {
                if self.bars.contains_key(&id) {
                    return;
                }
                let (name, total, downloaded) = match orchestrator.transfer(&id) {
                    Ok(t) => (
                        t.destination
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| id.to_string()),
                        t.total_size,
                        t.downloaded,
                    ),
                    Err(_) => (id.to_string(), None, 0),
                };
                let bar = self.multi.add(make_bar(total, &name));
                bar.set_position(downloaded);
                self.bars.insert(id, bar);
            }
            TransferStatus::Merging => {
                if let Some(bar) = self.bars.get(&id) {
                    bar.set_message("merging");
                }
            }
            TransferStatus::Paused | TransferStatus::Queued => {
                if let Some(bar) = self.bars.remove(&id) {
                    bar.abandon_with_message(status.as_str());
                }
            }
            TransferStatus::Failed | TransferStatus::Cancelled => {
                if let Some(bar) = self.bars.remove(&id) {
                    bar.abandon_with_message(style(status.as_str()).red().to_string());
                }
            }
            TransferStatus::Pending | TransferStatus::Completed => {}
        }
    }

    pub fn set_interrupted(&mut self) {
        self.summary.interrupted = true;
    }

    /// Stops any bars still drawing and returns the session summary.
    pub fn finish(mut self) -> SessionSummary {
        for (_, bar) in self.bars.drain() {
            bar.abandon();
        }
        self.summary
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}
