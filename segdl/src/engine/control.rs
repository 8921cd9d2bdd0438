//! Cooperative pause and cancel signalling.
//!
//! Each transfer owns a root cancellation token that fires only on cancel.
//! Every engine run derives a child token from it; pausing cancels just the
//! child, cancelling fires the root and with it every child. Workers select
//! on the run token at chunk boundaries and during backoff sleeps.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct TransferControl {
    cancel: CancellationToken,
    run: Mutex<CancellationToken>,
    paused: AtomicBool,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let run = cancel.child_token();
        Self {
            cancel,
            run: Mutex::new(run),
            paused: AtomicBool::new(false),
        }
    }

    /// Starts a new run and returns its token.
    ///
    /// The token is already cancelled if the transfer is paused or cancelled.
    pub fn begin_run(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if self.is_paused() {
            token.cancel();
        }
        *self.run.lock() = token.clone();
        token
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.run.lock().cancel();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
