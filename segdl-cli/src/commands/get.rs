//! Get command - download a URL in segments.

use std::path::PathBuf;

use clap::Args;
use segdl::config::human_size;
use segdl::model::{Priority, RequestHeaders, Transfer};
use segdl::orchestrator::Orchestrator;
use segdl::transport::metadata::{resolve_destination, resolve_filename};
use segdl::transport::Transport;
use tracing::warn;

use super::common::{parse_checksum, parse_header, parse_priority, Checksum};
use crate::error::CliError;
use crate::progress::ProgressDisplay;
use crate::runner::{interrupt_token, report, run_session, CliRunner};

/// Arguments for the get command.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// URL to download
    pub url: String,

    /// Output file or directory (defaults to the configured download directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of segments to request (capped by segments.max_per_transfer)
    #[arg(short, long)]
    pub segments: Option<usize>,

    /// Queue priority: high, normal, low or a number
    #[arg(short, long, default_value = "normal", value_parser = parse_priority)]
    pub priority: Priority,

    /// Expected digest as ALGORITHM:HEX (e.g. sha256:9f86d0...)
    #[arg(long, value_parser = parse_checksum)]
    pub checksum: Option<Checksum>,

    /// Fail the transfer when the digest does not match
    #[arg(long)]
    pub strict: bool,

    /// Attempts per segment before the transfer fails
    #[arg(long)]
    pub retries: Option<u32>,

    /// User-Agent header (defaults to network.user_agent)
    #[arg(long)]
    pub user_agent: Option<String>,

    #[arg(long)]
    pub referer: Option<String>,

    #[arg(long)]
    pub cookie: Option<String>,

    /// Extra request header as 'Name: Value' (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

impl GetArgs {
    fn request_headers(&self) -> RequestHeaders {
        let mut headers = RequestHeaders::new();
        if let Some(ref agent) = self.user_agent {
            headers = headers.with_user_agent(agent.clone());
        }
        if let Some(ref referer) = self.referer {
            headers = headers.with_referer(referer.clone());
        }
        if let Some(ref cookie) = self.cookie {
            headers = headers.with_cookie(cookie.clone());
        }
        for (name, value) in &self.headers {
            headers = headers.with_header(name.clone(), value.clone());
        }
        headers
    }
}

/// Run the get command.
pub fn run(args: GetArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("get");
    let config = runner.config();

    let store = runner.open_store()?;
    let transport = runner.transport()?;
    let headers = args.request_headers();
    let interrupt = interrupt_token()?;

    let orchestrator_config = config.orchestrator_config().with_engine(
        config
            .engine_config()
            .with_strict_integrity(args.strict || config.integrity.strict),
    );

    runner.block_on(async {
        // The engine probes again if the size is still unknown.
        let info = match transport.probe(&args.url, &headers).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(url = %args.url, error = %e, "metadata probe failed");
                None
            }
        };
        let total_size = info.as_ref().and_then(|i| i.total_size);
        let ranged = info.as_ref().map_or(true, |i| i.accepts_ranges);
        let filename = info
            .and_then(|i| i.filename)
            .unwrap_or_else(|| resolve_filename(None, &args.url));

        let destination = match args.output {
            Some(ref output) => resolve_destination(output, &filename),
            None => {
                let dir = config.download_dir();
                std::fs::create_dir_all(&dir)?;
                dir.join(&filename)
            }
        };

        // A known size skips the engine's probe, so range support is
        // decided here.
        let segments = if ranged {
            args.segments.unwrap_or(config.segments.default_count)
        } else {
            1
        };

        let mut builder = Transfer::builder(args.url.clone(), destination.clone())
            .priority(args.priority)
            .segments(segments)
            .max_attempts(args.retries.unwrap_or(config.segments.max_attempts))
            .headers(headers)
            .algorithm(config.integrity.algorithm);
        if let Some(size) = total_size {
            builder = builder.total_size(size);
        }
        if let Some(ref checksum) = args.checksum {
            builder = builder.expected_digest(checksum.algorithm, checksum.hex.clone());
        }

        let orchestrator = Orchestrator::new(store, transport.clone(), orchestrator_config);
        let events = orchestrator.subscribe();
        let id = orchestrator.submit(builder.build())?;
        orchestrator.start();

        println!("segdl v{}", segdl::VERSION);
        println!("URL:  {}", args.url);
        println!("File: {}", destination.display());
        match total_size {
            Some(size) => println!("Size: {}", human_size(size)),
            None => println!("Size: unknown"),
        }
        if !ranged {
            println!("Server does not accept ranges, using one stream");
        }
        println!("ID:   {}", id);
        println!();

        let summary = run_session(&orchestrator, events, ProgressDisplay::new(), interrupt).await;
        report(&summary)
    })
}
