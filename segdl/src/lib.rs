//! segdl - segmented, resumable file transfers
//!
//! A transfer is split into byte ranges that are fetched concurrently into
//! per-segment sink files, then merged and verified. The orchestrator bounds
//! how many transfers run at once, orders the rest by priority and recovers
//! unfinished work from a persistent store after a restart.
//!
//! # Layers
//!
//! | module          | role                                                  |
//! |-----------------|-------------------------------------------------------|
//! | [`planner`]     | splits a size into contiguous ranges                  |
//! | [`transport`]   | ranged GET and metadata probe (`reqwest`)             |
//! | [`engine`]      | segment workers, retries, progress, pause and cancel  |
//! | [`merge`]       | ordered concatenation with digest verification        |
//! | [`storage`]     | durable transfer and segment records                  |
//! | [`orchestrator`]| admission control, priority queue, recovery           |
//! | [`config`]      | `config.ini` settings                                 |
//!
//! # Example
//!
//! ```ignore
//! use segdl::orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(store, transport, OrchestratorConfig::default());
//! orchestrator.recover()?;
//! orchestrator.start();
//!
//! let id = orchestrator.submit(Transfer::builder(url, "/tmp/file.iso").build())?;
//! ```

pub mod checksum;
pub mod config;
pub mod engine;
pub mod logging;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod storage;
pub mod transport;

pub use model::{Priority, Transfer, TransferId, TransferStatus};

/// Crate version, reported in the default user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
